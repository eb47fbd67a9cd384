//! Execution of `HttpRequest` values.
//!
//! `Transport` is the seam between session state and the network. The
//! default `UreqTransport` runs each exchange on the blocking pool with a
//! per-request ureq agent whose global timeout equals the request timeout.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use ureq::RequestBuilder;

use crate::error::{NetError, NetResult};
use crate::http::{HttpMethod, HttpRequest, Response};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one request/response exchange. Non-2xx statuses are data,
    /// not errors.
    async fn execute(&self, request: HttpRequest) -> NetResult<Response>;

    /// Open and close a TCP connection to `authority`. Returns the peer
    /// address that was reached.
    async fn reach(&self, authority: &str) -> NetResult<String> {
        let stream = tokio::net::TcpStream::connect(authority)
            .await
            .map_err(|e| NetError::connection(format!("{authority}: {e}")))?;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| authority.to_string());
        Ok(peer)
    }
}

#[derive(Debug, Default, Clone)]
pub struct UreqTransport;

#[async_trait]
impl Transport for UreqTransport {
    async fn execute(&self, request: HttpRequest) -> NetResult<Response> {
        tokio::task::spawn_blocking(move || execute_blocking(request))
            .await
            .map_err(|e| NetError::connection(format!("transport task failed: {e}")))?
    }
}

fn with_headers<B>(mut builder: RequestBuilder<B>, headers: &[(String, String)]) -> RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

fn execute_blocking(request: HttpRequest) -> NetResult<Response> {
    let agent = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(request.timeout))
        .build()
        .new_agent();

    let HttpRequest { method, url, headers, body, .. } = request;
    debug!(%method, %url, body_len = body.len(), "executing request");

    let result = match method {
        HttpMethod::Get => with_headers(agent.get(&url), &headers).call(),
        HttpMethod::Head => with_headers(agent.head(&url), &headers).call(),
        HttpMethod::Options => with_headers(agent.options(&url), &headers).call(),
        HttpMethod::Delete if body.is_empty() => with_headers(agent.delete(&url), &headers).call(),
        HttpMethod::Delete => with_headers(agent.delete(&url), &headers)
            .force_send_body()
            .send(&body[..]),
        HttpMethod::Post => with_headers(agent.post(&url), &headers).send(&body[..]),
        HttpMethod::Put => with_headers(agent.put(&url), &headers).send(&body[..]),
        HttpMethod::Patch => with_headers(agent.patch(&url), &headers).send(&body[..]),
    };

    let mut response = result.map_err(map_ureq_error)?;
    let status_code = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect();
    let body = response.body_mut().read_to_vec().map_err(map_ureq_error)?;

    Ok(Response {
        status_code,
        body,
        headers,
        error: None,
    })
}

fn map_ureq_error(err: ureq::Error) -> NetError {
    match err {
        ureq::Error::Timeout(_) => NetError::Timeout,
        ureq::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => NetError::Timeout,
        other => NetError::connection(other.to_string()),
    }
}

/// Run `fut` under an optional deadline, mapping expiry to `Timeout`.
pub(crate) async fn with_deadline<T>(
    limit: Duration,
    fut: impl std::future::Future<Output = NetResult<T>>,
) -> NetResult<T> {
    tokio::time::timeout(limit, fut).await.unwrap_or(Err(NetError::Timeout))
}
