use thiserror::Error;

/// 控制面错误
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Config(#[from] flux_config::ConfigError),

    #[error("{0}")]
    InvalidLabel(String),

    #[error("sample {0} not found")]
    SampleNotFound(u64),

    #[error("training already running (log {0})")]
    TrainingInProgress(u64),

    #[error("video source switch failed: {0}")]
    Capture(#[from] flux_capture::CaptureError),

    #[error("sample store error: {0}")]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ControlError>;
