use flux_config::{ConfigStore, DecoderConfig};
use flux_types::Frame;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{CaptureError, Result};
use crate::launcher::{DecoderLauncher, FfmpegLauncher, SourceSpec};
use crate::reader::{FrameReader, ReadOutcome};
use crate::stats::{CaptureCounters, CaptureStats};

const REAP_TIMEOUT: Duration = Duration::from_secs(5);
const REAP_ATTEMPTS: u32 = 2;
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// 正在运行的解码子进程及其读任务
struct RunningDecoder {
    spec: SourceSpec,
    child: Child,
    cancel: CancellationToken,
    reader: JoinHandle<ReadOutcome>,
    stderr: Option<JoinHandle<()>>,
}

/// 帧源引擎
///
/// 生命周期操作（start/stop/restart）由同一把异步锁串行化，
/// 同一实例任何时刻最多只有一个解码子进程。
pub struct FrameSource {
    config: Arc<ConfigStore>,
    decoder: DecoderConfig,
    launcher: Arc<dyn DecoderLauncher>,
    tx: mpsc::Sender<Frame>,
    running: Mutex<Option<RunningDecoder>>,
    counters: Arc<CaptureCounters>,
    open: AtomicBool,
    stream_ended: Arc<AtomicBool>,
    restarts: AtomicU64,
}

impl FrameSource {
    pub fn new(config: Arc<ConfigStore>, decoder: DecoderConfig, tx: mpsc::Sender<Frame>) -> Self {
        let launcher = Arc::new(FfmpegLauncher::new(decoder.program.clone()));
        Self {
            config,
            decoder,
            launcher,
            tx,
            running: Mutex::new(None),
            counters: Arc::new(CaptureCounters::default()),
            open: AtomicBool::new(false),
            stream_ended: Arc::new(AtomicBool::new(false)),
            restarts: AtomicU64::new(0),
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn DecoderLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// 启动采集；已在运行时直接返回
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }
        *running = Some(self.spawn()?);
        Ok(())
    }

    /// 停止采集；可重复调用
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        if let Err(e) = self.teardown(&mut *running).await {
            error!(target: "frame_source", error = %e, "Failed to stop decoder");
        }
    }

    /// 停止旧进程、读取最新配置并重新启动
    ///
    /// 旧进程无法回收时返回错误，不会启动新进程。
    pub async fn restart(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        self.teardown(&mut *running).await?;
        self.restarts.fetch_add(1, Ordering::Relaxed);
        *running = Some(self.spawn()?);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// 解码器输出已结束，需要显式重启
    pub fn stream_ended(&self) -> bool {
        self.stream_ended.load(Ordering::Acquire)
    }

    pub fn counters(&self) -> Arc<CaptureCounters> {
        self.counters.clone()
    }

    pub fn stats(&self) -> CaptureStats {
        let video = self.config.video();
        CaptureStats {
            frame_id: self.counters.last_frame_id(),
            total_read: self.counters.frames_read(),
            dropped: self.counters.frames_dropped(),
            oversized: self.counters.oversized_frames(),
            errors: self.counters.read_errors(),
            is_open: self.is_open(),
            stream_ended: self.stream_ended(),
            source_type: video.source_type,
            width: self.decoder.width,
            height: self.decoder.height,
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }

    /// 调用方必须持有生命周期锁
    fn spawn(&self) -> Result<RunningDecoder> {
        let video = self.config.video();
        if !video.has_source() {
            return Err(CaptureError::NoSource(video.source_type));
        }
        let spec = SourceSpec::from_config(&video, &self.decoder);

        info!(
            target: "frame_source",
            source_type = %spec.source_type,
            locator = %spec.locator,
            fps = spec.fps,
            width = spec.width,
            height = spec.height,
            "Starting decoder"
        );

        let mut child = self.launcher.command(&spec).spawn().map_err(|e| {
            error!(target: "frame_source", program = self.launcher.program(), error = %e, "Failed to spawn decoder");
            CaptureError::Spawn {
                program: self.launcher.program().to_string(),
                source: e,
            }
        })?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                if let Err(e) = child.start_kill() {
                    debug!(target: "frame_source", error = %e, "Kill after missing stdout failed");
                }
                return Err(CaptureError::StdoutUnavailable);
            }
        };
        let stderr = child.stderr.take().map(|s| tokio::spawn(drain_stderr(s)));

        // 每次运行帧序号从 1 开始
        self.counters.last_frame_id.store(0, Ordering::Relaxed);
        self.stream_ended.store(false, Ordering::Release);

        let cancel = CancellationToken::new();
        let reader = FrameReader::new(stdout, self.tx.clone(), self.counters.clone(), spec.width, spec.height);
        let stream_ended = self.stream_ended.clone();
        let token = cancel.clone();
        let reader = tokio::spawn(async move {
            let outcome = reader.run(token).await;
            match outcome {
                ReadOutcome::EndOfStream => {
                    stream_ended.store(true, Ordering::Release);
                    warn!(target: "frame_source", "Decoder stream ended, waiting for explicit restart");
                }
                ReadOutcome::QueueClosed => {
                    warn!(target: "frame_source", "Frame queue closed, read loop exiting");
                }
                ReadOutcome::Cancelled => {}
            }
            outcome
        });

        self.open.store(true, Ordering::Release);
        info!(target: "frame_source", pid = child.id(), "Decoder started");

        Ok(RunningDecoder {
            spec,
            child,
            cancel,
            reader,
            stderr,
        })
    }

    /// 回收失败时解码器留在槽位中，下一次 stop/restart 会再次尝试
    async fn teardown(&self, slot: &mut Option<RunningDecoder>) -> Result<()> {
        let Some(running) = slot.as_mut() else {
            return Ok(());
        };
        running.cancel.cancel();
        reap(&mut running.child).await?;
        let Some(mut decoder) = slot.take() else {
            return Ok(());
        };

        if let Err(e) = decoder.reader.await {
            warn!(target: "frame_source", error = %e, "Read loop task failed");
        }
        // 孙进程可能仍持有 stderr，超时后放弃
        if let Some(mut stderr) = decoder.stderr.take() {
            if tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut stderr).await.is_err() {
                stderr.abort();
            }
        }

        self.open.store(false, Ordering::Release);
        info!(
            target: "frame_source",
            source_type = %decoder.spec.source_type,
            total_read = self.counters.frames_read(),
            errors = self.counters.read_errors(),
            "Decoder stopped"
        );
        Ok(())
    }
}

/// kill 并等待子进程退出；等待超时后再 kill 一次
async fn reap(child: &mut Child) -> Result<()> {
    for attempt in 1..=REAP_ATTEMPTS {
        // 子进程可能已经自行退出，kill 失败不影响回收
        if let Err(e) = child.start_kill() {
            debug!(target: "frame_source", error = %e, "Decoder already exited");
        }
        match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(target: "frame_source", %status, "Decoder reaped");
                return Ok(());
            }
            Ok(Err(e)) => {
                warn!(target: "frame_source", error = %e, "Failed to wait for decoder");
                return Ok(());
            }
            Err(_) => warn!(
                target: "frame_source",
                attempt,
                pid = child.id(),
                "Timed out waiting for decoder to exit"
            ),
        }
    }
    Err(CaptureError::DecoderStuck { pid: child.id() })
}

async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if !line.trim().is_empty() => {
                warn!(target: "frame_source", decoder = %line.trim(), "Decoder stderr");
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => {
                debug!(target: "frame_source", error = %e, "Stderr read failed");
                break;
            }
        }
    }
}
