use flux_config::SourceType;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// 读循环与帧源共享的计数器
#[derive(Debug, Default)]
pub struct CaptureCounters {
    pub last_frame_id: AtomicI64,
    pub frames_read: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub oversized_frames: AtomicU64,
    pub read_errors: AtomicU64,
}

impl CaptureCounters {
    pub fn last_frame_id(&self) -> i64 {
        self.last_frame_id.load(Ordering::Relaxed)
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn oversized_frames(&self) -> u64 {
        self.oversized_frames.load(Ordering::Relaxed)
    }

    pub fn read_errors(&self) -> u64 {
        self.read_errors.load(Ordering::Relaxed)
    }
}

/// 帧源统计快照
#[derive(Debug, Clone, Serialize)]
pub struct CaptureStats {
    pub frame_id: i64,
    pub total_read: u64,
    pub dropped: u64,
    pub oversized: u64,
    pub errors: u64,
    pub is_open: bool,
    pub stream_ended: bool,
    pub source_type: SourceType,
    pub width: u32,
    pub height: u32,
    pub restarts: u64,
}
