use flux_alert::AlertFilter;
use flux_broadcast::{forward_alerts, forward_results, BroadcastHub, HubSettings};
use flux_capture::{CaptureError, DecoderLauncher, FrameSource};
use flux_config::{AppConfig, ConfigStore};
use flux_inference::{DispatchSettings, HttpInferenceClient, InferenceDispatcher, InferenceService};
use flux_types::{AlertMessage, DetectionResult, LogThrottle};
use metrics::counter;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::samples::{MemorySampleStore, NewSample, SampleStore};
use crate::training::{model_reload_loop, TrainingLauncher};

const TRAINING_EVENT_CAPACITY: usize = 8;

#[derive(Debug, Default)]
struct PipelineCounters {
    results_routed: AtomicU64,
    frame_events_dropped: AtomicU64,
    alert_inputs_dropped: AtomicU64,
    alerts_generated: AtomicU64,
    alerts_dropped: AtomicU64,
    samples_saved: AtomicU64,
}

/// 流水线胶水层统计
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub results_routed: u64,
    pub frame_events_dropped: u64,
    pub alert_inputs_dropped: u64,
    pub alerts_generated: u64,
    pub alerts_dropped: u64,
    pub samples_saved: u64,
}

/// 组装流水线
pub struct PipelineBuilder {
    app: AppConfig,
    service: Option<Arc<dyn InferenceService>>,
    launcher: Option<Arc<dyn DecoderLauncher>>,
    samples: Option<Arc<dyn SampleStore>>,
}

impl PipelineBuilder {
    pub fn new(app: AppConfig) -> Self {
        Self {
            app,
            service: None,
            launcher: None,
            samples: None,
        }
    }

    /// 指定推理服务；未指定时按 `inference.endpoint` 创建 HTTP 客户端
    pub fn with_service(mut self, service: Arc<dyn InferenceService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn DecoderLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn with_sample_store(mut self, samples: Arc<dyn SampleStore>) -> Self {
        self.samples = Some(samples);
        self
    }

    /// 创建所有队列与引擎并启动后台任务
    ///
    /// 视频源启动失败（未配置或解码器无法启动）只记日志，可稍后通过配置更新重新启动。
    pub async fn start(self) -> anyhow::Result<Pipeline> {
        let app = self.app;
        let pipeline_cfg = &app.pipeline;
        let config = Arc::new(ConfigStore::new(app.runtime()));

        let service = match (self.service, app.inference.endpoint.as_deref()) {
            (Some(service), _) => Some(service),
            (None, Some(endpoint)) if !endpoint.trim().is_empty() => {
                let client: Arc<dyn InferenceService> = Arc::new(HttpInferenceClient::new(endpoint.trim())?);
                Some(client)
            }
            (None, _) => None,
        };

        let (frame_tx, frame_rx) = mpsc::channel(pipeline_cfg.frame_queue_capacity);
        let (result_tx, result_rx) = mpsc::channel(pipeline_cfg.result_queue_capacity);
        let (hub_frame_tx, hub_frame_rx) = mpsc::channel(pipeline_cfg.result_queue_capacity);
        let (alert_input_tx, alert_input_rx) = mpsc::channel(pipeline_cfg.result_queue_capacity);
        let (alert_tx, alert_rx) = mpsc::channel(pipeline_cfg.alert_queue_capacity);
        let (training_tx, training_rx) = mpsc::channel(TRAINING_EVENT_CAPACITY);

        let mut source = FrameSource::new(config.clone(), app.decoder.clone(), frame_tx);
        if let Some(launcher) = self.launcher {
            source = source.with_launcher(launcher);
        }
        let source = Arc::new(source);

        let dispatcher = Arc::new(InferenceDispatcher::new(
            service,
            DispatchSettings::from(&app.inference),
            frame_rx,
            result_tx,
        ));

        let filter = Arc::new(AlertFilter::new(config.clone()));
        let (hub, hub_dispatcher) = BroadcastHub::new(HubSettings {
            event_capacity: pipeline_cfg.hub_event_capacity,
            consumer_capacity: pipeline_cfg.consumer_queue_capacity,
            send_timeout: Duration::from_millis(pipeline_cfg.send_timeout_ms),
        });

        let samples: Arc<dyn SampleStore> = match self.samples {
            Some(samples) => samples,
            None => Arc::new(MemorySampleStore::new()),
        };
        let cancel = CancellationToken::new();
        let training = Arc::new(TrainingLauncher::new(
            config.clone(),
            samples.clone(),
            training_tx,
            cancel.child_token(),
        ));
        let counters = Arc::new(PipelineCounters::default());

        let tasks = vec![
            tokio::spawn(hub_dispatcher.run()),
            tokio::spawn(route_results(
                result_rx,
                hub_frame_tx,
                alert_input_tx,
                counters.clone(),
                cancel.clone(),
            )),
            tokio::spawn(alert_stage(
                alert_input_rx,
                alert_tx,
                AlertStage {
                    filter: filter.clone(),
                    config: config.clone(),
                    samples: samples.clone(),
                    counters: counters.clone(),
                },
                cancel.clone(),
            )),
            tokio::spawn(forward_results(hub_frame_rx, hub.clone(), cancel.clone())),
            tokio::spawn(forward_alerts(alert_rx, hub.clone(), cancel.clone())),
            filter.spawn_cleanup(cancel.clone()),
            tokio::spawn(model_reload_loop(training_rx, dispatcher.clone(), cancel.clone())),
        ];

        dispatcher.start().await;
        match source.start().await {
            Ok(()) => {}
            Err(CaptureError::NoSource(source_type)) => {
                info!(target: "pipeline", ?source_type, "No video source configured, waiting for config update");
            }
            Err(e) => warn!(target: "pipeline", error = %e, "Failed to start video source"),
        }

        info!(
            target: "pipeline",
            connected = dispatcher.is_connected(),
            frame_queue = pipeline_cfg.frame_queue_capacity,
            result_queue = pipeline_cfg.result_queue_capacity,
            alert_queue = pipeline_cfg.alert_queue_capacity,
            "Pipeline started"
        );

        Ok(Pipeline {
            config,
            source,
            dispatcher,
            filter,
            hub,
            samples,
            training,
            counters,
            cancel,
            tasks: Mutex::new(tasks),
        })
    }
}

/// 视频分析流水线：帧源 -> 推理分发 -> (广播 | 报警过滤 -> 广播)
pub struct Pipeline {
    config: Arc<ConfigStore>,
    source: Arc<FrameSource>,
    dispatcher: Arc<InferenceDispatcher>,
    filter: Arc<AlertFilter>,
    hub: BroadcastHub,
    samples: Arc<dyn SampleStore>,
    training: Arc<TrainingLauncher>,
    counters: Arc<PipelineCounters>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn source(&self) -> &Arc<FrameSource> {
        &self.source
    }

    pub fn dispatcher(&self) -> &Arc<InferenceDispatcher> {
        &self.dispatcher
    }

    pub fn filter(&self) -> &Arc<AlertFilter> {
        &self.filter
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn samples(&self) -> &Arc<dyn SampleStore> {
        &self.samples
    }

    pub fn training(&self) -> &Arc<TrainingLauncher> {
        &self.training
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            results_routed: c.results_routed.load(Ordering::Relaxed),
            frame_events_dropped: c.frame_events_dropped.load(Ordering::Relaxed),
            alert_inputs_dropped: c.alert_inputs_dropped.load(Ordering::Relaxed),
            alerts_generated: c.alerts_generated.load(Ordering::Relaxed),
            alerts_dropped: c.alerts_dropped.load(Ordering::Relaxed),
            samples_saved: c.samples_saved.load(Ordering::Relaxed),
        }
    }

    /// 停止帧源与推理 worker、取消后台任务并关闭广播中心；可重复调用
    pub async fn shutdown(&self) {
        info!(target: "pipeline", "Stopping pipeline");

        self.source.stop().await;
        self.dispatcher.stop().await;
        self.cancel.cancel();
        self.hub.shutdown();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                warn!(target: "pipeline", error = %e, "Pipeline task failed");
            }
        }
        info!(target: "pipeline", "Pipeline stopped");
    }
}

/// 结果扇出：每条结果分别非阻塞地投递给帧广播和报警过滤
async fn route_results(
    mut results: mpsc::Receiver<DetectionResult>,
    frames: mpsc::Sender<DetectionResult>,
    alerts: mpsc::Sender<DetectionResult>,
    counters: Arc<PipelineCounters>,
    cancel: CancellationToken,
) {
    let drop_log = LogThrottle::new(Duration::from_secs(5));

    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = results.recv() => match result {
                Some(result) => result,
                None => break,
            },
        };
        counters.results_routed.fetch_add(1, Ordering::Relaxed);
        let frame_id = result.frame_id;

        // 无检测的结果不需要经过报警过滤
        if !result.detections.is_empty() {
            if let Err(TrySendError::Full(_)) = alerts.try_send(result.clone()) {
                counters.alert_inputs_dropped.fetch_add(1, Ordering::Relaxed);
                counter!("flux_pipeline_dropped_total", 1, "stage" => "alert_input");
                if let Some(suppressed) = drop_log.hit() {
                    warn!(target: "pipeline", frame_id, suppressed, "Alert stage busy, dropping result");
                }
            }
        }

        if let Err(TrySendError::Full(_)) = frames.try_send(result) {
            counters.frame_events_dropped.fetch_add(1, Ordering::Relaxed);
            counter!("flux_pipeline_dropped_total", 1, "stage" => "frame_event");
            if let Some(suppressed) = drop_log.hit() {
                warn!(target: "pipeline", frame_id, suppressed, "Frame forwarder busy, dropping result");
            }
        }
    }
    debug!(target: "pipeline", "Result router stopped");
}

struct AlertStage {
    filter: Arc<AlertFilter>,
    config: Arc<ConfigStore>,
    samples: Arc<dyn SampleStore>,
    counters: Arc<PipelineCounters>,
}

/// 报警过滤；裁剪与编码放在阻塞线程池中
async fn alert_stage(
    mut results: mpsc::Receiver<DetectionResult>,
    alerts: mpsc::Sender<AlertMessage>,
    stage: AlertStage,
    cancel: CancellationToken,
) {
    let drop_log = LogThrottle::new(Duration::from_secs(5));

    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = results.recv() => match result {
                Some(result) => result,
                None => break,
            },
        };

        let filter = stage.filter.clone();
        let generated = match tokio::task::spawn_blocking(move || filter.process_results(&result)).await {
            Ok(generated) => generated,
            Err(e) => {
                warn!(target: "pipeline", error = %e, "Alert filter task failed");
                continue;
            }
        };
        if generated.is_empty() {
            continue;
        }
        stage
            .counters
            .alerts_generated
            .fetch_add(generated.len() as u64, Ordering::Relaxed);

        let auto_save = stage.config.filter().auto_save_sample;
        for alert in generated {
            if auto_save {
                match stage.samples.create_sample(NewSample::from(&alert)).await {
                    Ok(sample) => {
                        stage.counters.samples_saved.fetch_add(1, Ordering::Relaxed);
                        debug!(target: "pipeline", sample_id = sample.id, frame_id = alert.frame_id, "Alert sample saved");
                    }
                    Err(e) => warn!(target: "pipeline", frame_id = alert.frame_id, error = %e, "Failed to save alert sample"),
                }
            }

            match alerts.try_send(alert) {
                Ok(()) => {}
                Err(TrySendError::Full(alert)) => {
                    stage.counters.alerts_dropped.fetch_add(1, Ordering::Relaxed);
                    counter!("flux_pipeline_dropped_total", 1, "stage" => "alert");
                    if let Some(suppressed) = drop_log.hit() {
                        warn!(target: "pipeline", alert_id = alert.id, suppressed, "Alert queue full, dropping alert");
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(target: "pipeline", "Alert queue closed");
                    return;
                }
            }
        }
    }
    debug!(target: "pipeline", "Alert stage stopped");
}
