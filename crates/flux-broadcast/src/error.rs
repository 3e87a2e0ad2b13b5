use std::time::Duration;
use thiserror::Error;

/// 广播中心错误
#[derive(Error, Debug)]
pub enum HubError {
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Broadcast hub is shut down")]
    Closed,
}

/// 消费者传输错误，任何一个都会结束该连接
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Send timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, HubError>;
