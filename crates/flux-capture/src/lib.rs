// flux-capture: 帧源引擎
//
// 解码子进程把 MJPEG 字节流写到 stdout，本 crate 负责管理子进程生命周期、
// 切分 JPEG 帧并以非阻塞方式投递到帧队列。

pub mod error;
pub mod launcher;
pub mod reader;
pub mod scanner;
pub mod source;
pub mod stats;

pub use error::{CaptureError, Result};
pub use launcher::{DecoderLauncher, FfmpegLauncher, SourceSpec};
pub use reader::{FrameReader, ReadOutcome};
pub use scanner::{JpegScanner, ScanEvent, MAX_FRAME_BYTES};
pub use source::FrameSource;
pub use stats::{CaptureCounters, CaptureStats};
