use flux_alert::AlertFilterStats;
use flux_broadcast::HubStats;
use flux_capture::CaptureStats;
use flux_config::{
    DetectionConfig, DetectionPatch, FilterConfig, FilterPatch, RuntimeSnapshot, TrainingConfig,
    TrainingPatch, VideoConfig,
};
use flux_inference::{AdminResponse, DispatchStats};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ControlError, Result};
use crate::pipeline::{Pipeline, PipelineStats};
use crate::samples::{LabelStatus, Sample, TrainingLog};
use crate::training::TrainingRun;

const DEFAULT_PENDING_LIMIT: usize = 50;
const MAX_PENDING_LIMIT: usize = 100;

/// 视频配置更新结果
#[derive(Debug, Clone, Serialize)]
pub struct VideoUpdateOutcome {
    pub config: VideoConfig,
    pub version: u64,
    pub restarted: bool,
}

/// 检测参数更新结果
#[derive(Debug, Clone, Serialize)]
pub struct DetectionUpdateOutcome {
    pub config: DetectionConfig,
    pub version: u64,
    pub remote: AdminResponse,
}

/// 人工标注
#[derive(Debug, Clone, Deserialize)]
pub struct Feedback {
    pub sample_id: u64,
    pub label_status: String,
    #[serde(default)]
    pub labeled_by: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackOutcome {
    pub labeled_samples_count: u64,
    /// 达到阈值时自动启动的训练
    pub training: Option<TrainingRun>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingStatus {
    pub labeled_samples_count: u64,
    pub trigger_threshold: u64,
    pub can_train: bool,
    pub running: Option<u64>,
    pub latest_training: Option<TrainingLog>,
}

/// 系统状态：配置快照加各引擎统计
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub config: RuntimeSnapshot,
    pub capture: CaptureStats,
    pub dispatch: DispatchStats,
    pub filter: AlertFilterStats,
    pub hub: HubStats,
    pub pipeline: PipelineStats,
    pub time: String,
}

/// 控制面入口，HTTP 层只做参数解析与响应编码
#[derive(Clone)]
pub struct ControlPlane {
    pipeline: Arc<Pipeline>,
}

impl ControlPlane {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn config(&self) -> RuntimeSnapshot {
        self.pipeline.config().snapshot()
    }

    pub fn video(&self) -> VideoConfig {
        self.pipeline.config().video()
    }

    /// 替换视频配置；源标识变化、帧源未运行或流已结束时重启，新配置没有源时停止采集
    pub async fn update_video(&self, next: VideoConfig) -> Result<VideoUpdateOutcome> {
        let update = self.pipeline.config().update_video(next)?;
        info!(
            target: "pipeline",
            source_type = ?update.config.source_type,
            fps = update.config.fps,
            restart_required = update.restart_required,
            "Video config updated"
        );

        let source = self.pipeline.source();
        let restarted = if !update.config.has_source() {
            source.stop().await;
            false
        } else if update.restart_required || !source.is_open() || source.stream_ended() {
            source.restart().await?;
            true
        } else {
            false
        };

        Ok(VideoUpdateOutcome {
            config: update.config,
            version: update.version,
            restarted,
        })
    }

    pub fn detection(&self) -> DetectionConfig {
        self.pipeline.config().detection()
    }

    /// 本地生效后转发给推理服务；服务缺失或调用失败时只报告本地生效
    pub async fn update_detection(&self, patch: DetectionPatch) -> Result<DetectionUpdateOutcome> {
        let store = self.pipeline.config();
        let config = store.update_detection(&patch)?;
        let version = store.version();

        let remote = match self.pipeline.dispatcher().update_remote_params(patch).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(target: "dispatch", error = %e, "Failed to forward detection params");
                AdminResponse::local_only(true, format!("local config updated, inference service update failed: {}", e))
            }
        };

        Ok(DetectionUpdateOutcome {
            config,
            version,
            remote,
        })
    }

    pub fn filter(&self) -> FilterConfig {
        self.pipeline.config().filter()
    }

    pub fn update_filter(&self, patch: FilterPatch) -> Result<FilterConfig> {
        let config = self.pipeline.config().update_filter(&patch)?;
        info!(
            target: "alert_filter",
            iou = config.spatial_iou_threshold,
            window_secs = config.time_window_seconds,
            push = config.enable_alert_push,
            "Filter config updated"
        );
        Ok(config)
    }

    pub fn training(&self) -> TrainingConfig {
        self.pipeline.config().training()
    }

    pub fn update_training(&self, patch: TrainingPatch) -> Result<TrainingConfig> {
        let config = self.pipeline.config().update_training(&patch)?;
        info!(target: "training", threshold = config.trigger_threshold, "Training config updated");
        Ok(config)
    }

    /// 提交标注；已标注数量达到阈值且没有训练在运行时自动启动训练
    pub async fn submit_feedback(&self, feedback: Feedback) -> Result<FeedbackOutcome> {
        let label: LabelStatus = feedback.label_status.parse().map_err(ControlError::InvalidLabel)?;
        let samples = self.pipeline.samples();
        if !samples
            .label_sample(feedback.sample_id, label, &feedback.labeled_by)
            .await?
        {
            return Err(ControlError::SampleNotFound(feedback.sample_id));
        }
        info!(target: "training", sample_id = feedback.sample_id, ?label, "Sample labeled");

        let labeled = samples.labeled_count().await?;
        let threshold = self.pipeline.config().training().trigger_threshold;
        let training = if labeled >= threshold {
            match self.pipeline.training().trigger().await {
                Ok(run) => Some(run),
                Err(ControlError::TrainingInProgress(_)) => None,
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        Ok(FeedbackOutcome {
            labeled_samples_count: labeled,
            training,
        })
    }

    /// 最新的待标注样本；`limit` 超出 1..=100 时取 50
    pub async fn pending_samples(&self, limit: Option<usize>) -> Result<Vec<Sample>> {
        let limit = match limit {
            Some(n) if (1..=MAX_PENDING_LIMIT).contains(&n) => n,
            _ => DEFAULT_PENDING_LIMIT,
        };
        Ok(self.pipeline.samples().pending_samples(limit).await?)
    }

    pub async fn training_status(&self) -> Result<TrainingStatus> {
        let samples = self.pipeline.samples();
        let labeled = samples.labeled_count().await?;
        let threshold = self.pipeline.config().training().trigger_threshold;

        Ok(TrainingStatus {
            labeled_samples_count: labeled,
            trigger_threshold: threshold,
            can_train: labeled >= threshold,
            running: self.pipeline.training().current_run().await,
            latest_training: samples.latest_training_log().await?,
        })
    }

    pub async fn trigger_training(&self) -> Result<TrainingRun> {
        self.pipeline.training().trigger().await
    }

    pub fn system_status(&self) -> SystemStatus {
        SystemStatus {
            config: self.pipeline.config().snapshot(),
            capture: self.pipeline.source().stats(),
            dispatch: self.pipeline.dispatcher().stats(),
            filter: self.pipeline.filter().stats(),
            hub: self.pipeline.hub().stats(),
            pipeline: self.pipeline.stats(),
            time: chrono::Utc::now().to_rfc3339(),
        }
    }
}
