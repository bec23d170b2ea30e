//! Error types for broker operations.
//!
//! Every failure a client can observe maps onto an [`ErrorCode`] that is
//! carried in the `error` frame sent back on the originating connection.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire-level error code carried in `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    TopicNotFound,
    SlowConsumer,
    #[serde(rename = "INTERNAL_ERROR")]
    Internal,
}

/// Main error type for broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Topic '{0}' not found")]
    TopicNotFound(String),

    #[error("Topic '{0}' already exists")]
    TopicExists(String),

    #[error("Subscriber queue overflow for {0}")]
    SlowConsumer(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrokerError {
    /// Projects the error onto the code reported to clients.
    pub fn code(&self) -> ErrorCode {
        match self {
            BrokerError::BadRequest(_) => ErrorCode::BadRequest,
            BrokerError::TopicNotFound(_) => ErrorCode::TopicNotFound,
            BrokerError::SlowConsumer(_) => ErrorCode::SlowConsumer,
            BrokerError::TopicExists(_)
            | BrokerError::ConnectionClosed
            | BrokerError::Serialization(_)
            | BrokerError::Io(_) => ErrorCode::Internal,
        }
    }
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
