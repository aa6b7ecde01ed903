use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the management channel and the request/reply layer.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("failed to connect to management endpoint: {0}")]
    Connect(String),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("failed to encode message body: {0}")]
    Encode(String),

    #[error("failed to decode message: {0}")]
    Decode(String),

    #[error("unexpected response type: expected content type {expected}, got {actual}")]
    UnexpectedResponse { expected: i32, actual: i32 },

    #[error("{0}")]
    Remote(String),

    #[error("management channel closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
