//! Per-handle HTTP client configuration.
//!
//! # Design
//! `HttpSession` holds only configuration plus the last `Response`. Setters
//! validate first and mutate second, so a rejected argument leaves the
//! session untouched. `build_request` resolves the configuration into an
//! `HttpRequest` for a `Transport` to execute; the session itself never does
//! I/O.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use url::Url;

use crate::error::{NetError, NetResult};
use crate::http::{HttpMethod, HttpRequest, Response};

/// Transport protocol selected when a client is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Protocol {
    Http = 0,
    Https = 1,
}

impl Protocol {
    pub fn from_raw(raw: i32) -> NetResult<Self> {
        match raw {
            0 => Ok(Protocol::Http),
            1 => Ok(Protocol::Https),
            other => Err(NetError::param(format!("unsupported protocol {other}"))),
        }
    }

    pub fn scheme(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpSession {
    protocol: Protocol,
    url: Option<Url>,
    method: HttpMethod,
    user: Option<String>,
    password: String,
    body: Vec<u8>,
    headers: Vec<(String, String)>,
    timeout_secs: u64,
    last_response: Arc<Response>,
    connected_addr: Option<String>,
}

impl HttpSession {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            url: None,
            method: HttpMethod::Get,
            user: None,
            password: String::new(),
            body: Vec::new(),
            headers: Vec::new(),
            timeout_secs: 0,
            last_response: Arc::new(Response::default()),
            connected_addr: None,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn set_url(&mut self, raw: &str) -> NetResult<()> {
        self.url = Some(parse_url(self.protocol, raw)?);
        Ok(())
    }

    pub fn set_method(&mut self, raw: &str) -> NetResult<()> {
        self.method = raw.parse()?;
        Ok(())
    }

    pub fn set_user(&mut self, user: &str) -> NetResult<()> {
        if user.is_empty() {
            return Err(NetError::param("user must not be empty"));
        }
        if user.contains(':') {
            return Err(NetError::param("user must not contain ':'"));
        }
        self.user = Some(user.to_string());
        Ok(())
    }

    pub fn set_password(&mut self, password: &str) -> NetResult<()> {
        self.password = password.to_string();
        Ok(())
    }

    pub fn set_body(&mut self, body: &[u8]) -> NetResult<()> {
        self.body = body.to_vec();
        Ok(())
    }

    /// Append a header. Repeated names are kept in insertion order.
    pub fn set_header(&mut self, name: &str, value: &str) -> NetResult<()> {
        if name.is_empty() || !name.bytes().all(is_token_byte) {
            return Err(NetError::param(format!("invalid header name {name:?}")));
        }
        if value.bytes().any(|b| matches!(b, b'\r' | b'\n' | 0)) {
            return Err(NetError::param("header value contains a line break"));
        }
        self.headers.push((name.to_string(), value.trim().to_string()));
        Ok(())
    }

    /// `0` restores the configured default.
    pub fn set_timeout(&mut self, seconds: i64) -> NetResult<()> {
        if seconds < 0 {
            return Err(NetError::param("timeout must not be negative"));
        }
        self.timeout_secs = seconds as u64;
        Ok(())
    }

    pub fn effective_timeout(&self, default: Duration) -> Duration {
        match self.timeout_secs {
            0 => default,
            secs => Duration::from_secs(secs),
        }
    }

    /// Resolve the configuration into a request. `method` overrides the
    /// configured method for this request only.
    pub fn build_request(
        &self,
        method: Option<HttpMethod>,
        default_timeout: Duration,
    ) -> NetResult<HttpRequest> {
        let url = self.url.as_ref().ok_or_else(|| NetError::param("url is not set"))?;
        let method = method.unwrap_or(self.method);
        let mut headers = self.headers.clone();
        if let Some(user) = &self.user {
            let credentials = STANDARD.encode(format!("{user}:{}", self.password));
            headers.push(("Authorization".to_string(), format!("Basic {credentials}")));
        }
        let body = if method.is_bodyless() { Vec::new() } else { self.body.clone() };
        Ok(HttpRequest {
            method,
            url: url.to_string(),
            headers,
            body,
            timeout: self.effective_timeout(default_timeout),
        })
    }

    pub fn last_response(&self) -> Arc<Response> {
        Arc::clone(&self.last_response)
    }

    pub fn store_response(&mut self, response: Response) -> Arc<Response> {
        self.last_response = Arc::new(response);
        self.last_response()
    }

    pub fn connected_addr(&self) -> Option<&str> {
        self.connected_addr.as_deref()
    }

    pub fn set_connected_addr(&mut self, addr: String) {
        self.connected_addr = Some(addr);
    }

    /// `host:port` of the configured URL, for connection checks.
    pub fn authority(&self) -> NetResult<String> {
        let url = self.url.as_ref().ok_or_else(|| NetError::param("url is not set"))?;
        let host = url.host_str().ok_or_else(|| NetError::param("url has no host"))?;
        let port = url.port().unwrap_or_else(|| self.protocol.default_port());
        if host.contains(':') {
            Ok(format!("[{}]:{port}", host.trim_matches(|c| c == '[' || c == ']')))
        } else {
            Ok(format!("{host}:{port}"))
        }
    }
}

/// Accept `scheme://host/...` or a bare `host/...`, which takes the
/// protocol's scheme.
pub fn parse_url(protocol: Protocol, raw: &str) -> NetResult<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(NetError::param("url must not be empty"));
    }
    let full = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("{}://{raw}", protocol.scheme())
    };
    let url = Url::parse(&full).map_err(|e| NetError::param(format!("invalid url {raw:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(NetError::param(format!("unsupported scheme {:?}", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(NetError::param("url has no host"));
    }
    Ok(url)
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}
