use flux_config::SourceType;
use thiserror::Error;

/// 帧源错误
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No {0} source configured")]
    NoSource(SourceType),

    #[error("Failed to spawn decoder {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Decoder stdout is not piped")]
    StdoutUnavailable,

    #[error("Decoder (pid {pid:?}) did not exit after kill")]
    DecoderStuck { pid: Option<u32> },
}

pub type Result<T> = std::result::Result<T, CaptureError>;
