use flux_config::{DetectionPatch, InferenceConfig};
use flux_types::{DetectionResult, Frame, LogThrottle};
use metrics::counter;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{InferenceError, Result};
use crate::service::{AdminResponse, DetectRequest, DetectResponse, InferenceService};

/// 分发参数
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub workers: usize,
    pub detect_timeout: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub params_timeout: Duration,
    pub reload_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            detect_timeout: Duration::from_secs(5),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(100),
            params_timeout: Duration::from_secs(5),
            reload_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&InferenceConfig> for DispatchSettings {
    fn from(config: &InferenceConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            detect_timeout: config.detect_timeout(),
            max_attempts: config.max_attempts.max(1),
            retry_backoff: config.retry_backoff(),
            params_timeout: config.params_timeout(),
            reload_timeout: config.reload_timeout(),
        }
    }
}

#[derive(Debug, Default)]
struct DispatchCounters {
    frames_dispatched: AtomicU64,
    results_published: AtomicU64,
    results_dropped: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    frames_failed: AtomicU64,
}

/// 分发统计
#[derive(Debug, Clone, Serialize)]
pub struct DispatchStats {
    pub total_sent: u64,
    pub total_received: u64,
    pub results_dropped: u64,
    pub attempts: u64,
    pub retries: u64,
    pub errors: u64,
    pub connected: bool,
    pub workers: usize,
    pub running: bool,
}

struct WorkerSet {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// worker 之间共享的只读上下文
struct WorkerContext {
    service: Option<Arc<dyn InferenceService>>,
    settings: DispatchSettings,
    frames: Arc<Mutex<mpsc::Receiver<Frame>>>,
    results: mpsc::Sender<DetectionResult>,
    counters: Arc<DispatchCounters>,
    drop_log: LogThrottle,
}

/// 推理分发引擎
///
/// 不对结果做重排序：多个 worker 按完成顺序写入结果队列，下游需容忍乱序。
pub struct InferenceDispatcher {
    context: Arc<WorkerContext>,
    workers: Mutex<Option<WorkerSet>>,
    running: AtomicBool,
}

impl InferenceDispatcher {
    /// `service` 为 `None` 时进入直通模式：每帧以空检测结果转发
    pub fn new(
        service: Option<Arc<dyn InferenceService>>,
        settings: DispatchSettings,
        frames: mpsc::Receiver<Frame>,
        results: mpsc::Sender<DetectionResult>,
    ) -> Self {
        Self {
            context: Arc::new(WorkerContext {
                service,
                settings,
                frames: Arc::new(Mutex::new(frames)),
                results,
                counters: Arc::new(DispatchCounters::default()),
                drop_log: LogThrottle::new(Duration::from_secs(5)),
            }),
            workers: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.context.service.is_some()
    }

    /// 启动 worker 池；已启动时直接返回
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let count = self.context.settings.workers;
        let handles = (0..count)
            .map(|id| tokio::spawn(worker_loop(id, self.context.clone(), cancel.clone())))
            .collect();

        info!(
            target: "dispatch",
            workers = count,
            connected = self.is_connected(),
            "Inference dispatcher started"
        );
        *workers = Some(WorkerSet { cancel, handles });
        self.running.store(true, Ordering::Release);
    }

    /// 停止 worker 池并等待退出；可重复调用
    pub async fn stop(&self) {
        let mut workers = self.workers.lock().await;
        let Some(set) = workers.take() else {
            return;
        };

        set.cancel.cancel();
        self.running.store(false, Ordering::Release);
        for handle in set.handles {
            if let Err(e) = handle.await {
                warn!(target: "dispatch", error = %e, "Worker task failed");
            }
        }

        let stats = self.stats();
        info!(
            target: "dispatch",
            sent = stats.total_sent,
            received = stats.total_received,
            errors = stats.errors,
            "Inference dispatcher stopped"
        );
    }

    /// 转发检测参数到推理服务
    ///
    /// 调用运行在独立任务上，不受流水线停止影响。
    pub async fn update_remote_params(&self, params: DetectionPatch) -> Result<AdminResponse> {
        let Some(service) = self.context.service.clone() else {
            info!(target: "dispatch", "Inference service not connected, params applied locally only");
            return Ok(AdminResponse::local_only(
                true,
                "inference service not connected, local config updated only",
            ));
        };

        let timeout = self.context.settings.params_timeout;
        run_admin(timeout, async move { service.update_params(&params).await }).await
    }

    /// 通知推理服务重载模型，空路径表示服务端默认位置
    pub async fn reload_remote_model(&self, model_path: &str) -> Result<AdminResponse> {
        let Some(service) = self.context.service.clone() else {
            info!(target: "dispatch", "Inference service not connected, model reload skipped");
            return Ok(AdminResponse::local_only(false, "inference service not connected"));
        };

        let timeout = self.context.settings.reload_timeout;
        let path = model_path.to_string();
        info!(target: "dispatch", model_path = %path, "Requesting model reload");
        run_admin(timeout, async move { service.reload_model(&path).await }).await
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.context.counters;
        DispatchStats {
            total_sent: c.frames_dispatched.load(Ordering::Relaxed),
            total_received: c.results_published.load(Ordering::Relaxed),
            results_dropped: c.results_dropped.load(Ordering::Relaxed),
            attempts: c.attempts.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            errors: c.frames_failed.load(Ordering::Relaxed),
            connected: self.is_connected(),
            workers: self.context.settings.workers,
            running: self.running.load(Ordering::Acquire),
        }
    }
}

async fn run_admin<F>(timeout: Duration, call: F) -> Result<AdminResponse>
where
    F: std::future::Future<Output = Result<AdminResponse>> + Send + 'static,
{
    let handle = tokio::spawn(tokio::time::timeout(timeout, call));
    match handle.await {
        Ok(Ok(response)) => response,
        Ok(Err(_)) => Err(InferenceError::Timeout(timeout)),
        Err(e) => Err(InferenceError::Aborted(e.to_string())),
    }
}

async fn worker_loop(id: usize, ctx: Arc<WorkerContext>, cancel: CancellationToken) {
    debug!(target: "dispatch", worker = id, "Worker started");

    loop {
        let frame = {
            let mut frames = tokio::select! {
                _ = cancel.cancelled() => break,
                frames = ctx.frames.lock() => frames,
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = frames.recv() => frame,
            }
        };

        let Some(frame) = frame else {
            debug!(target: "dispatch", worker = id, "Frame queue closed");
            break;
        };
        ctx.counters.frames_dispatched.fetch_add(1, Ordering::Relaxed);

        let frame = Arc::new(frame);
        let result = match &ctx.service {
            None => DetectionResult::new(frame, Vec::new(), 0),
            Some(service) => match detect_with_retry(&ctx, service.as_ref(), &frame, &cancel).await {
                Some(response) => DetectionResult::new(frame, response.results, response.inference_time_ms),
                None => continue,
            },
        };

        publish(&ctx, result);
    }

    debug!(target: "dispatch", worker = id, "Worker stopped");
}

/// 返回 `None` 表示帧被放弃（重试耗尽或已取消）
async fn detect_with_retry(
    ctx: &WorkerContext,
    service: &dyn InferenceService,
    frame: &Frame,
    cancel: &CancellationToken,
) -> Option<DetectResponse> {
    let settings = &ctx.settings;
    let request = DetectRequest::from_frame(frame);

    for attempt in 1..=settings.max_attempts {
        ctx.counters.attempts.fetch_add(1, Ordering::Relaxed);
        counter!("flux_detect_attempts_total", 1);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            outcome = tokio::time::timeout(settings.detect_timeout, service.detect(&request)) => outcome,
        };

        let error = match outcome {
            Ok(Ok(response)) if response.error.is_empty() => return Some(response),
            Ok(Ok(response)) => InferenceError::Remote(response.error),
            Ok(Err(e)) => e,
            Err(_) => InferenceError::Timeout(settings.detect_timeout),
        };

        if attempt < settings.max_attempts {
            ctx.counters.retries.fetch_add(1, Ordering::Relaxed);
            debug!(
                target: "dispatch",
                frame_id = frame.id,
                attempt,
                max_attempts = settings.max_attempts,
                error = %error,
                "Detect failed, retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(settings.retry_backoff) => {}
            }
        } else {
            ctx.counters.frames_failed.fetch_add(1, Ordering::Relaxed);
            counter!("flux_detect_failures_total", 1);
            warn!(
                target: "dispatch",
                frame_id = frame.id,
                attempts = attempt,
                service = service.name(),
                error = %error,
                "Detect failed, dropping frame"
            );
        }
    }

    None
}

fn publish(ctx: &WorkerContext, result: DetectionResult) {
    let frame_id = result.frame_id;
    match ctx.results.try_send(result) {
        Ok(()) => {
            ctx.counters.results_published.fetch_add(1, Ordering::Relaxed);
        }
        Err(TrySendError::Full(_)) => {
            let dropped = ctx.counters.results_dropped.fetch_add(1, Ordering::Relaxed) + 1;
            counter!("flux_results_dropped_total", 1);
            if let Some(suppressed) = ctx.drop_log.hit() {
                warn!(target: "dispatch", frame_id, dropped, suppressed, "Result queue full, dropping result");
            }
        }
        Err(TrySendError::Closed(_)) => {
            debug!(target: "dispatch", frame_id, "Result queue closed, discarding result");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use flux_types::{BBox, Detection};
    use std::sync::atomic::AtomicU32;

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        /// 前 n 次返回传输错误
        FailTimes(u32),
        /// 响应中带 error 字段
        RemoteError,
        Hang,
    }

    struct MockService {
        behavior: Behavior,
        calls: AtomicU32,
        admin_delay: Duration,
    }

    impl MockService {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicU32::new(0),
                admin_delay: Duration::ZERO,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn detection() -> Detection {
        Detection {
            id: 1,
            bbox: BBox::new(0.0, 0.0, 10.0, 10.0),
            class_id: 0,
            class_name: "pig".to_string(),
            confidence: 0.4,
            entropy: 0.9,
            is_uncertain: true,
        }
    }

    #[async_trait]
    impl InferenceService for MockService {
        async fn detect(&self, request: &DetectRequest) -> Result<DetectResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.behavior {
                Behavior::FailTimes(n) if call <= n => Err(InferenceError::Remote("unavailable".to_string())),
                Behavior::RemoteError => Ok(DetectResponse {
                    frame_id: request.frame_id,
                    error: "model not loaded".to_string(),
                    ..Default::default()
                }),
                Behavior::Hang => std::future::pending().await,
                _ => Ok(DetectResponse {
                    frame_id: request.frame_id,
                    results: vec![detection()],
                    inference_time_ms: 8,
                    error: String::new(),
                }),
            }
        }

        async fn update_params(&self, _params: &DetectionPatch) -> Result<AdminResponse> {
            tokio::time::sleep(self.admin_delay).await;
            Ok(AdminResponse {
                success: true,
                message: "updated".to_string(),
                local_only: false,
            })
        }

        async fn reload_model(&self, model_path: &str) -> Result<AdminResponse> {
            tokio::time::sleep(self.admin_delay).await;
            Ok(AdminResponse {
                success: true,
                message: format!("loaded {}", model_path),
                local_only: false,
            })
        }
    }

    fn frame(id: i64) -> Frame {
        Frame::new(id, Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]), 1280, 720)
    }

    fn dispatcher(
        service: Option<Arc<dyn InferenceService>>,
        workers: usize,
        result_capacity: usize,
    ) -> (InferenceDispatcher, mpsc::Sender<Frame>, mpsc::Receiver<DetectionResult>) {
        let (frame_tx, frame_rx) = mpsc::channel(30);
        let (result_tx, result_rx) = mpsc::channel(result_capacity);
        let settings = DispatchSettings {
            workers,
            ..Default::default()
        };
        (InferenceDispatcher::new(service, settings, frame_rx, result_tx), frame_tx, result_rx)
    }

    #[tokio::test]
    async fn test_passthrough_without_service() {
        let (dispatcher, frames, mut results) = dispatcher(None, 2, 30);
        dispatcher.start().await;

        for id in 1..=5 {
            frames.send(frame(id)).await.unwrap();
        }
        let mut ids = Vec::new();
        for _ in 0..5 {
            let result = results.recv().await.unwrap();
            assert!(result.detections.is_empty());
            ids.push(result.frame_id);
        }
        // 多 worker 不保证顺序
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);

        dispatcher.stop().await;
        assert!(!dispatcher.stats().connected);
    }

    #[tokio::test]
    async fn test_successful_detect_publishes_result() {
        let service = MockService::new(Behavior::Succeed);
        let (dispatcher, frames, mut results) = dispatcher(Some(service.clone()), 4, 30);
        dispatcher.start().await;

        frames.send(frame(9)).await.unwrap();
        let result = results.recv().await.unwrap();
        assert_eq!(result.frame_id, 9);
        assert_eq!(result.inference_time_ms, 8);
        assert_eq!(result.detections, vec![detection()]);
        assert_eq!(result.frame.id, 9);

        dispatcher.stop().await;
        let stats = dispatcher.stats();
        assert_eq!(stats.total_sent, 1);
        assert_eq!(stats.total_received, 1);
        assert_eq!(stats.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let service = MockService::new(Behavior::FailTimes(2));
        let (dispatcher, frames, mut results) = dispatcher(Some(service.clone()), 1, 30);
        dispatcher.start().await;

        frames.send(frame(1)).await.unwrap();
        let result = results.recv().await.unwrap();
        assert_eq!(result.frame_id, 1);
        assert_eq!(service.calls(), 3);

        dispatcher.stop().await;
        let stats = dispatcher.stats();
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_three_attempts() {
        let service = MockService::new(Behavior::RemoteError);
        let (dispatcher, frames, mut results) = dispatcher(Some(service.clone()), 1, 30);
        dispatcher.start().await;

        frames.send(frame(1)).await.unwrap();
        frames.send(frame(2)).await.unwrap();

        // 两帧都被放弃
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(service.calls(), 6);
        assert!(results.try_recv().is_err());

        dispatcher.stop().await;
        assert_eq!(dispatcher.stats().errors, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_service_is_bounded_by_timeouts() {
        let service = MockService::new(Behavior::Hang);
        let (dispatcher, frames, mut results) = dispatcher(Some(service.clone()), 1, 30);
        dispatcher.start().await;

        let started = tokio::time::Instant::now();
        frames.send(frame(1)).await.unwrap();

        // timeout×3 + backoff×2 之后放弃
        while dispatcher.stats().errors == 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(15_200));
        assert!(elapsed <= Duration::from_millis(15_300));
        assert_eq!(service.calls(), 3);
        assert!(results.try_recv().is_err());

        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_full_result_queue_drops_newest() {
        let (dispatcher, frames, mut results) = dispatcher(None, 1, 2);
        dispatcher.start().await;

        for id in 1..=5 {
            frames.send(frame(id)).await.unwrap();
        }
        while dispatcher.stats().total_sent < 5 {
            tokio::task::yield_now().await;
        }
        dispatcher.stop().await;

        assert_eq!(results.recv().await.unwrap().frame_id, 1);
        assert_eq!(results.recv().await.unwrap().frame_id, 2);
        assert!(results.try_recv().is_err());
        assert_eq!(dispatcher.stats().results_dropped, 3);
    }

    #[tokio::test]
    async fn test_admin_calls_without_service_are_local_only() {
        let (dispatcher, _frames, _results) = dispatcher(None, 1, 1);

        let update = dispatcher
            .update_remote_params(DetectionPatch {
                confidence_threshold: Some(0.7),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(update.success);
        assert!(update.local_only);

        let reload = dispatcher.reload_remote_model("").await.unwrap();
        assert!(!reload.success);
        assert!(reload.local_only);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admin_call_survives_dispatcher_stop() {
        let service = Arc::new(MockService {
            behavior: Behavior::Succeed,
            calls: AtomicU32::new(0),
            admin_delay: Duration::from_secs(20),
        });
        let (dispatcher, _frames, _results) = dispatcher(Some(service), 1, 1);
        let dispatcher = Arc::new(dispatcher);
        dispatcher.start().await;

        let reload = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.reload_remote_model("/models/v2.pt").await })
        };
        tokio::task::yield_now().await;
        dispatcher.stop().await;

        // 20 秒的重载在 60 秒预算内完成
        let response = reload.await.unwrap().unwrap();
        assert!(response.success);
        assert_eq!(response.message, "loaded /models/v2.pt");
    }

    #[tokio::test(start_paused = true)]
    async fn test_params_update_times_out() {
        let service = Arc::new(MockService {
            behavior: Behavior::Succeed,
            calls: AtomicU32::new(0),
            admin_delay: Duration::from_secs(30),
        });
        let (dispatcher, _frames, _results) = dispatcher(Some(service), 1, 1);

        let err = dispatcher
            .update_remote_params(DetectionPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Timeout(d) if d == Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (dispatcher, _frames, _results) = dispatcher(None, 2, 1);
        dispatcher.stop().await;
        dispatcher.start().await;
        dispatcher.start().await;
        dispatcher.stop().await;
        dispatcher.stop().await;
        assert!(!dispatcher.stats().running);
    }
}
