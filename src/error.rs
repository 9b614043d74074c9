//! Error types for the load balancer.

use thiserror::Error;

use crate::http::response::{Response, StatusCode};

/// Main error type for load balancer operations.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// A backend address could not be registered
    #[error("invalid backend address `{address}`: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Configuration file could not be read or parsed
    #[error("configuration error: {0}")]
    Config(String),

    /// The server was asked to start without any backend nodes
    #[error("no backend nodes registered")]
    NoNodes,

    /// The request body could not be read
    #[error("request body unreadable: {0}")]
    ClientBody(String),

    /// The request body exceeded the configured limit
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// Every node rejected the request under its current window
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// The selected node failed at the network level
    #[error("gateway error from {node}: {source}")]
    Gateway {
        node: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for load balancer operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    /// HTTP status reported to the client for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::ClientBody(_) => StatusCode::BadRequest,
            ProxyError::BodyTooLarge { .. } => StatusCode::PayloadTooLarge,
            ProxyError::RateLimitExceeded => StatusCode::TooManyRequests,
            ProxyError::Gateway { .. } => StatusCode::BadGateway,
            _ => StatusCode::InternalServerError,
        }
    }

    /// Renders the error as a plain-text response.
    pub fn to_response(&self) -> Response {
        let message = match self {
            ProxyError::RateLimitExceeded => "Rate limit exceeded".to_string(),
            ProxyError::ClientBody(_) => "Error reading request body".to_string(),
            other => other.to_string(),
        };
        Response::text(self.status_code(), message)
    }
}
