use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flux_types::AlertMessage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use tokio::sync::RwLock;

/// 样本标注状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelStatus {
    Pending,
    Normal,
    Abnormal,
}

impl LabelStatus {
    pub fn is_labeled(&self) -> bool {
        !matches!(self, LabelStatus::Pending)
    }
}

/// 只接受人工标注结果 `normal` / `abnormal`
impl FromStr for LabelStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(LabelStatus::Normal),
            "abnormal" => Ok(LabelStatus::Abnormal),
            other => Err(format!("label_status must be 'normal' or 'abnormal', got '{}'", other)),
        }
    }
}

/// 报警截图样本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub frame_id: i64,
    /// Base64 JPEG
    pub image_data: String,
    pub bbox_x1: f32,
    pub bbox_y1: f32,
    pub bbox_x2: f32,
    pub bbox_y2: f32,
    pub class_name: String,
    pub confidence: f32,
    pub entropy: f32,
    pub is_uncertain: bool,
    pub label_status: LabelStatus,
    pub labeled_by: String,
    pub labeled_at: Option<DateTime<Utc>>,
    pub used_for_training: bool,
}

/// 新样本（由报警生成）
#[derive(Debug, Clone)]
pub struct NewSample {
    pub frame_id: i64,
    pub image_data: String,
    pub bbox_x1: f32,
    pub bbox_y1: f32,
    pub bbox_x2: f32,
    pub bbox_y2: f32,
    pub class_name: String,
    pub confidence: f32,
    pub entropy: f32,
}

impl From<&AlertMessage> for NewSample {
    fn from(alert: &AlertMessage) -> Self {
        Self {
            frame_id: alert.frame_id,
            image_data: alert.image_data.clone(),
            bbox_x1: alert.x1,
            bbox_y1: alert.y1,
            bbox_x2: alert.x2,
            bbox_y2: alert.y2,
            class_name: alert.class_name.clone(),
            confidence: alert.confidence,
            entropy: alert.entropy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingState {
    Running,
    Completed,
    Failed,
}

/// 训练记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingLog {
    pub id: u64,
    pub sample_count: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: TrainingState,
    pub old_model_path: String,
    pub new_model_path: String,
    pub error_message: String,
}

/// 样本与训练记录存储
#[async_trait]
pub trait SampleStore: Send + Sync {
    async fn create_sample(&self, sample: NewSample) -> anyhow::Result<Sample>;

    /// 待标注样本，最新的在前
    async fn pending_samples(&self, limit: usize) -> anyhow::Result<Vec<Sample>>;

    /// 样本不存在时返回 `false`
    async fn label_sample(&self, id: u64, label: LabelStatus, labeled_by: &str) -> anyhow::Result<bool>;

    /// 已标注且尚未用于训练的样本 ID
    async fn untrained_labeled(&self) -> anyhow::Result<Vec<u64>>;

    async fn labeled_count(&self) -> anyhow::Result<u64> {
        Ok(self.untrained_labeled().await?.len() as u64)
    }

    async fn mark_trained(&self, ids: &[u64]) -> anyhow::Result<()>;

    async fn create_training_log(&self, sample_count: u64, old_model_path: &str) -> anyhow::Result<TrainingLog>;

    async fn finish_training_log(
        &self,
        id: u64,
        status: TrainingState,
        new_model_path: &str,
        error_message: &str,
    ) -> anyhow::Result<()>;

    async fn latest_training_log(&self) -> anyhow::Result<Option<TrainingLog>>;
}

const DEFAULT_MAX_SAMPLES: usize = 10_000;

#[derive(Default)]
struct MemoryState {
    samples: BTreeMap<u64, Sample>,
    logs: Vec<TrainingLog>,
    next_sample_id: u64,
    next_log_id: u64,
}

/// 内存实现；超出容量时淘汰最旧的样本
pub struct MemorySampleStore {
    state: RwLock<MemoryState>,
    max_samples: usize,
}

impl MemorySampleStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_SAMPLES)
    }

    pub fn with_capacity(max_samples: usize) -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            max_samples: max_samples.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.samples.len()
    }

    pub async fn get(&self, id: u64) -> Option<Sample> {
        self.state.read().await.samples.get(&id).cloned()
    }
}

impl Default for MemorySampleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SampleStore for MemorySampleStore {
    async fn create_sample(&self, new: NewSample) -> anyhow::Result<Sample> {
        let mut state = self.state.write().await;
        state.next_sample_id += 1;
        let sample = Sample {
            id: state.next_sample_id,
            created_at: Utc::now(),
            frame_id: new.frame_id,
            image_data: new.image_data,
            bbox_x1: new.bbox_x1,
            bbox_y1: new.bbox_y1,
            bbox_x2: new.bbox_x2,
            bbox_y2: new.bbox_y2,
            class_name: new.class_name,
            confidence: new.confidence,
            entropy: new.entropy,
            is_uncertain: true,
            label_status: LabelStatus::Pending,
            labeled_by: String::new(),
            labeled_at: None,
            used_for_training: false,
        };
        state.samples.insert(sample.id, sample.clone());

        while state.samples.len() > self.max_samples {
            state.samples.pop_first();
        }
        Ok(sample)
    }

    async fn pending_samples(&self, limit: usize) -> anyhow::Result<Vec<Sample>> {
        let state = self.state.read().await;
        Ok(state
            .samples
            .values()
            .rev()
            .filter(|s| s.label_status == LabelStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn label_sample(&self, id: u64, label: LabelStatus, labeled_by: &str) -> anyhow::Result<bool> {
        let mut state = self.state.write().await;
        let Some(sample) = state.samples.get_mut(&id) else {
            return Ok(false);
        };
        sample.label_status = label;
        sample.labeled_by = labeled_by.to_string();
        sample.labeled_at = Some(Utc::now());
        Ok(true)
    }

    async fn untrained_labeled(&self) -> anyhow::Result<Vec<u64>> {
        let state = self.state.read().await;
        Ok(state
            .samples
            .values()
            .filter(|s| s.label_status.is_labeled() && !s.used_for_training)
            .map(|s| s.id)
            .collect())
    }

    async fn mark_trained(&self, ids: &[u64]) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        for id in ids {
            if let Some(sample) = state.samples.get_mut(id) {
                sample.used_for_training = true;
            }
        }
        Ok(())
    }

    async fn create_training_log(&self, sample_count: u64, old_model_path: &str) -> anyhow::Result<TrainingLog> {
        let mut state = self.state.write().await;
        state.next_log_id += 1;
        let log = TrainingLog {
            id: state.next_log_id,
            sample_count,
            start_time: Utc::now(),
            end_time: None,
            status: TrainingState::Running,
            old_model_path: old_model_path.to_string(),
            new_model_path: String::new(),
            error_message: String::new(),
        };
        state.logs.push(log.clone());
        Ok(log)
    }

    async fn finish_training_log(
        &self,
        id: u64,
        status: TrainingState,
        new_model_path: &str,
        error_message: &str,
    ) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        let log = state
            .logs
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| anyhow::anyhow!("training log {} not found", id))?;
        log.status = status;
        log.end_time = Some(Utc::now());
        log.new_model_path = new_model_path.to_string();
        log.error_message = error_message.to_string();
        Ok(())
    }

    async fn latest_training_log(&self) -> anyhow::Result<Option<TrainingLog>> {
        Ok(self.state.read().await.logs.last().cloned())
    }
}
