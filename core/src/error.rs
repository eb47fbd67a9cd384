//! Error codes and error types for the networking runtime.
//!
//! # Design
//! `ErrorCode` is the closed set of signed integers that cross the C boundary.
//! `NetError` is the rich Rust-side error; every variant maps onto exactly one
//! code via `NetError::code`. Two variants (`ShuttingDown`, `Aborted`) have no
//! code of their own: once shutdown starts the handle can no longer be used,
//! so both surface as `InvalidHandle` while keeping a distinct message.

use thiserror::Error;

/// Result codes shared with C callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,
    InvalidHandle = -1,
    InvalidParam = -2,
    ConnectionFailed = -3,
    Timeout = -4,
    SessionFailed = -5,
    StreamFailed = -6,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 7] = [
        ErrorCode::Success,
        ErrorCode::InvalidHandle,
        ErrorCode::InvalidParam,
        ErrorCode::ConnectionFailed,
        ErrorCode::Timeout,
        ErrorCode::SessionFailed,
        ErrorCode::StreamFailed,
    ];

    pub fn from_raw(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| *c as i32 == code)
    }

    /// Static human-readable message for this code.
    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::Success => "Success",
            ErrorCode::InvalidHandle => "Invalid handle",
            ErrorCode::InvalidParam => "Invalid parameter",
            ErrorCode::ConnectionFailed => "Connection failed",
            ErrorCode::Timeout => "Operation timed out",
            ErrorCode::SessionFailed => "Session operation failed",
            ErrorCode::StreamFailed => "Stream operation failed",
        }
    }
}

pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error";

/// Message lookup that is total over `i32`.
pub fn message_for(code: i32) -> &'static str {
    ErrorCode::from_raw(code).map_or(UNKNOWN_ERROR_MESSAGE, ErrorCode::message)
}

/// Errors produced by runtime operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetError {
    #[error("Invalid handle")]
    InvalidHandle,

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Session operation failed: {0}")]
    SessionFailed(String),

    #[error("Stream operation failed: {0}")]
    StreamFailed(String),

    #[error("shutdown requested: new operations are rejected")]
    ShuttingDown,

    #[error("operation aborted by forced shutdown")]
    Aborted,
}

impl NetError {
    pub fn code(&self) -> ErrorCode {
        match self {
            NetError::InvalidHandle | NetError::ShuttingDown | NetError::Aborted => {
                ErrorCode::InvalidHandle
            }
            NetError::InvalidParam(_) => ErrorCode::InvalidParam,
            NetError::ConnectionFailed(_) => ErrorCode::ConnectionFailed,
            NetError::Timeout => ErrorCode::Timeout,
            NetError::SessionFailed(_) => ErrorCode::SessionFailed,
            NetError::StreamFailed(_) => ErrorCode::StreamFailed,
        }
    }

    pub(crate) fn param(msg: impl Into<String>) -> Self {
        NetError::InvalidParam(msg.into())
    }

    pub(crate) fn session(msg: impl Into<String>) -> Self {
        NetError::SessionFailed(msg.into())
    }

    pub(crate) fn stream(msg: impl Into<String>) -> Self {
        NetError::StreamFailed(msg.into())
    }

    pub(crate) fn connection(msg: impl Into<String>) -> Self {
        NetError::ConnectionFailed(msg.into())
    }
}

pub type NetResult<T> = Result<T, NetError>;
