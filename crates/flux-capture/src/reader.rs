use flux_types::{Frame, LogThrottle};
use metrics::counter;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::scanner::{JpegScanner, ScanEvent};
use crate::stats::CaptureCounters;

const READ_CHUNK: usize = 64 * 1024;
const READ_ERROR_PAUSE: Duration = Duration::from_millis(10);
const LOG_INTERVAL: Duration = Duration::from_secs(5);

/// 读循环结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Cancelled,
    /// 解码器关闭了 stdout
    EndOfStream,
    /// 帧队列的接收端已经关闭
    QueueClosed,
}

/// 从字节流切帧并投递到帧队列
pub struct FrameReader<R> {
    inner: R,
    scanner: JpegScanner,
    tx: mpsc::Sender<Frame>,
    counters: Arc<CaptureCounters>,
    width: u32,
    height: u32,
    next_id: i64,
    drop_log: LogThrottle,
    error_log: LogThrottle,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(
        inner: R,
        tx: mpsc::Sender<Frame>,
        counters: Arc<CaptureCounters>,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            inner,
            scanner: JpegScanner::new(),
            tx,
            counters,
            width,
            height,
            next_id: 0,
            drop_log: LogThrottle::new(LOG_INTERVAL),
            error_log: LogThrottle::new(LOG_INTERVAL),
        }
    }

    pub fn with_scanner(mut self, scanner: JpegScanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub async fn run(mut self, cancel: CancellationToken) -> ReadOutcome {
        let mut buf = vec![0u8; READ_CHUNK];
        let mut events = Vec::new();

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ReadOutcome::Cancelled,
                read = self.inner.read(&mut buf) => read,
            };

            match read {
                Ok(0) => {
                    debug!(target: "frame_source", last_frame_id = self.next_id, "Decoder stream ended");
                    return ReadOutcome::EndOfStream;
                }
                Ok(n) => {
                    self.scanner.feed(&buf[..n], &mut events);
                    for event in events.drain(..) {
                        if let Some(outcome) = self.handle(event) {
                            return outcome;
                        }
                    }
                }
                Err(e) => {
                    let errors = self.counters.read_errors.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(suppressed) = self.error_log.hit() {
                        warn!(target: "frame_source", error = %e, errors, suppressed, "Decoder read failed");
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return ReadOutcome::Cancelled,
                        _ = tokio::time::sleep(READ_ERROR_PAUSE) => {}
                    }
                }
            }
        }
    }

    fn handle(&mut self, event: ScanEvent) -> Option<ReadOutcome> {
        match event {
            ScanEvent::Oversized(len) => {
                self.counters.oversized_frames.fetch_add(1, Ordering::Relaxed);
                warn!(target: "frame_source", len, "Frame exceeds size limit, discarded");
                None
            }
            ScanEvent::Frame(data) => {
                self.next_id += 1;
                let id = self.next_id;
                self.counters.last_frame_id.store(id, Ordering::Relaxed);
                self.counters.frames_read.fetch_add(1, Ordering::Relaxed);
                counter!("flux_frames_captured_total", 1);

                match self.tx.try_send(Frame::new(id, data, self.width, self.height)) {
                    Ok(()) => None,
                    Err(TrySendError::Full(_)) => {
                        let dropped = self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        counter!("flux_frames_dropped_total", 1);
                        if let Some(suppressed) = self.drop_log.hit() {
                            warn!(target: "frame_source", frame_id = id, dropped, suppressed, "Frame queue full, dropping frame");
                        }
                        None
                    }
                    Err(TrySendError::Closed(_)) => Some(ReadOutcome::QueueClosed),
                }
            }
        }
    }
}
