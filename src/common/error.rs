//! Error types for coordkv

use crate::client::LeaseId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Connection Errors ===
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Session closed")]
    SessionClosed,

    // === Request Errors ===
    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Request rejected: {0}")]
    Request(String),

    #[error("Lease not found: {0}")]
    LeaseNotFound(LeaseId),

    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // === Generic ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Could the session not reach the service at all?
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Connection(_) | Error::SessionClosed => true,
            Error::Grpc(status) => status.code() == tonic::Code::Unavailable,
            _ => false,
        }
    }

    /// Did the service (or the deadline) turn a single request down?
    pub fn is_request_error(&self) -> bool {
        match self {
            Error::Timeout(_)
            | Error::Request(_)
            | Error::LeaseNotFound(_)
            | Error::InvalidKey(_) => true,
            Error::Grpc(status) => status.code() != tonic::Code::Unavailable,
            _ => false,
        }
    }
}

impl From<etcd_client::Error> for Error {
    fn from(e: etcd_client::Error) -> Self {
        use tonic::Code;
        match e {
            etcd_client::Error::GRpcStatus(status) => match status.code() {
                Code::DeadlineExceeded => Error::Timeout(status.message().to_string()),
                Code::Unavailable => Error::Connection(status.message().to_string()),
                Code::NotFound | Code::InvalidArgument | Code::FailedPrecondition => {
                    Error::Request(status.message().to_string())
                }
                _ => Error::Grpc(status),
            },
            etcd_client::Error::TransportError(e) => Error::Connection(e.to_string()),
            other => Error::Request(other.to_string()),
        }
    }
}

// Implement From for common error types
impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}
