use std::time::Duration;
use thiserror::Error;

/// 推理服务错误
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Inference service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Inference service error: {0}")]
    Remote(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Administrative call aborted: {0}")]
    Aborted(String),
}

pub type Result<T> = std::result::Result<T, InferenceError>;
