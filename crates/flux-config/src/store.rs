use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::info;

use crate::error::Result;
use crate::runtime::{
    DetectionConfig, DetectionPatch, FilterConfig, FilterPatch, RuntimeConfig, TrainingConfig,
    TrainingPatch, VideoConfig,
};

/// 进程级运行时配置
///
/// 每个分区一把读写锁；读取一律返回副本，调用方不会在 I/O 或 RPC 期间持有锁。
/// 任何一次成功写入都会递增全局版本号。
pub struct ConfigStore {
    video: RwLock<VideoConfig>,
    detection: RwLock<DetectionConfig>,
    filter: RwLock<FilterConfig>,
    training: RwLock<TrainingConfig>,
    version: AtomicU64,
}

/// 某一时刻的配置快照
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeSnapshot {
    pub version: u64,
    #[serde(flatten)]
    pub config: RuntimeConfig,
}

/// 视频配置更新结果
#[derive(Debug, Clone)]
pub struct VideoUpdate {
    pub config: VideoConfig,
    pub version: u64,
    /// 解码器参数发生变化，帧源需要重启
    pub restart_required: bool,
}

fn read<T: Clone>(lock: &RwLock<T>) -> T {
    lock.read().unwrap_or_else(PoisonError::into_inner).clone()
}

impl ConfigStore {
    pub fn new(initial: RuntimeConfig) -> Self {
        Self {
            video: RwLock::new(initial.video),
            detection: RwLock::new(initial.detection),
            filter: RwLock::new(initial.filter),
            training: RwLock::new(initial.training),
            version: AtomicU64::new(1),
        }
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn video(&self) -> VideoConfig {
        read(&self.video)
    }

    pub fn detection(&self) -> DetectionConfig {
        read(&self.detection)
    }

    pub fn filter(&self) -> FilterConfig {
        read(&self.filter)
    }

    pub fn training(&self) -> TrainingConfig {
        read(&self.training)
    }

    /// 逐分区读取；不同分区之间可能观察到不同版本，这是允许的
    pub fn snapshot(&self) -> RuntimeSnapshot {
        RuntimeSnapshot {
            version: self.version(),
            config: RuntimeConfig {
                video: self.video(),
                detection: self.detection(),
                filter: self.filter(),
                training: self.training(),
            },
        }
    }

    fn bump(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn update_video(&self, next: VideoConfig) -> Result<VideoUpdate> {
        next.validate()?;

        let restart_required = {
            let mut guard = self.video.write().unwrap_or_else(PoisonError::into_inner);
            let changed = !guard.same_source(&next);
            *guard = next.clone();
            changed
        };
        let version = self.bump();

        info!(
            target: "config",
            version,
            source_type = %next.source_type,
            fps = next.fps,
            restart_required,
            "Video config updated"
        );

        Ok(VideoUpdate {
            config: next,
            version,
            restart_required,
        })
    }

    pub fn update_detection(&self, patch: &DetectionPatch) -> Result<DetectionConfig> {
        let next = {
            let mut guard = self.detection.write().unwrap_or_else(PoisonError::into_inner);
            let next = patch.apply(&guard)?;
            *guard = next.clone();
            next
        };
        let version = self.bump();
        info!(target: "config", version, ?next, "Detection config updated");
        Ok(next)
    }

    pub fn update_filter(&self, patch: &FilterPatch) -> Result<FilterConfig> {
        let next = {
            let mut guard = self.filter.write().unwrap_or_else(PoisonError::into_inner);
            let next = patch.apply(&guard)?;
            *guard = next.clone();
            next
        };
        let version = self.bump();
        info!(target: "config", version, ?next, "Filter config updated");
        Ok(next)
    }

    pub fn update_training(&self, patch: &TrainingPatch) -> Result<TrainingConfig> {
        let next = {
            let mut guard = self.training.write().unwrap_or_else(PoisonError::into_inner);
            let next = patch.apply(&guard)?;
            *guard = next.clone();
            next
        };
        let version = self.bump();
        info!(
            target: "config",
            version,
            trigger_threshold = next.trigger_threshold,
            "Training config updated"
        );
        Ok(next)
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}
