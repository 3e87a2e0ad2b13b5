use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{check_range_f32, check_range_u64, ConfigError, Result};

/// 视频源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// 网络流（RTSP）
    Rtsp,
    /// 本地文件，循环播放
    Local,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::Rtsp => write!(f, "rtsp"),
            SourceType::Local => write!(f, "local"),
        }
    }
}

/// 视频源配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub source_type: SourceType,
    pub rtsp_url: String,
    pub local_path: String,
    /// 采集帧率
    pub fps: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            source_type: SourceType::Rtsp,
            rtsp_url: String::new(),
            local_path: String::new(),
            fps: 30,
        }
    }
}

impl VideoConfig {
    /// 当前类型对应的源地址
    pub fn locator(&self) -> &str {
        match self.source_type {
            SourceType::Rtsp => &self.rtsp_url,
            SourceType::Local => &self.local_path,
        }
    }

    pub fn has_source(&self) -> bool {
        !self.locator().trim().is_empty()
    }

    /// 解码器参数是否一致（类型、地址、帧率）
    pub fn same_source(&self, other: &VideoConfig) -> bool {
        self.source_type == other.source_type
            && self.locator() == other.locator()
            && self.fps == other.fps
    }

    pub fn validate(&self) -> Result<()> {
        check_range_u64("video.fps", self.fps as u64, 1, 120, "1..=120")
    }
}

/// 推理服务参数（转发到外部检测服务）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub confidence_threshold: f32,
    pub entropy_threshold: f32,
    pub nms_iou_threshold: f32,
    pub input_size: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            entropy_threshold: 0.5,
            nms_iou_threshold: 0.8,
            input_size: 640,
        }
    }
}

const INPUT_SIZES: [u32; 3] = [320, 640, 1280];

impl DetectionConfig {
    pub fn validate(&self) -> Result<()> {
        check_range_f32("detection.confidence_threshold", self.confidence_threshold, 0.0, 1.0, "0.0..=1.0")?;
        check_range_f32("detection.entropy_threshold", self.entropy_threshold, 0.0, 1.0, "0.0..=1.0")?;
        check_range_f32("detection.nms_iou_threshold", self.nms_iou_threshold, 0.5, 1.0, "0.5..=1.0")?;
        if !INPUT_SIZES.contains(&self.input_size) {
            return Err(ConfigError::OutOfRange {
                field: "detection.input_size",
                value: self.input_size.to_string(),
                expected: "one of 320, 640, 1280",
            });
        }
        Ok(())
    }
}

/// 检测参数的部分更新
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entropy_threshold: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nms_iou_threshold: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_size: Option<u32>,
}

impl DetectionPatch {
    pub fn is_empty(&self) -> bool {
        self.confidence_threshold.is_none()
            && self.entropy_threshold.is_none()
            && self.nms_iou_threshold.is_none()
            && self.input_size.is_none()
    }

    pub fn apply(&self, base: &DetectionConfig) -> Result<DetectionConfig> {
        let mut next = base.clone();
        if let Some(v) = self.confidence_threshold {
            next.confidence_threshold = v;
        }
        if let Some(v) = self.entropy_threshold {
            next.entropy_threshold = v;
        }
        if let Some(v) = self.nms_iou_threshold {
            next.nms_iou_threshold = v;
        }
        if let Some(v) = self.input_size {
            next.input_size = v;
        }
        next.validate()?;
        Ok(next)
    }
}

/// 报警过滤器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// 空间抑制 IoU 阈值
    pub spatial_iou_threshold: f32,
    /// 时间窗口（秒）
    pub time_window_seconds: u64,
    pub enable_alert_push: bool,
    /// 报警截图是否自动入库为待标注样本
    pub auto_save_sample: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            spatial_iou_threshold: 0.5,
            time_window_seconds: 60,
            enable_alert_push: true,
            auto_save_sample: true,
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Result<()> {
        check_range_f32("filter.spatial_iou_threshold", self.spatial_iou_threshold, 0.0, 1.0, "0.0..=1.0")?;
        check_range_u64("filter.time_window_seconds", self.time_window_seconds, 1, 120, "1..=120")
    }

    pub fn time_window(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.time_window_seconds)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spatial_iou_threshold: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_alert_push: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_save_sample: Option<bool>,
}

impl FilterPatch {
    pub fn apply(&self, base: &FilterConfig) -> Result<FilterConfig> {
        let mut next = base.clone();
        if let Some(v) = self.spatial_iou_threshold {
            next.spatial_iou_threshold = v;
        }
        if let Some(v) = self.time_window_seconds {
            next.time_window_seconds = v;
        }
        if let Some(v) = self.enable_alert_push {
            next.enable_alert_push = v;
        }
        if let Some(v) = self.auto_save_sample {
            next.auto_save_sample = v;
        }
        next.validate()?;
        Ok(next)
    }
}

/// 训练配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// 已标注样本数达到该值时触发训练
    pub trigger_threshold: u64,
    pub training_script_path: String,
    pub model_output_path: String,
    /// 执行训练脚本的解释器
    pub interpreter: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            trigger_threshold: 100,
            training_script_path: "../ai_service/train.py".to_string(),
            model_output_path: "../data/models/".to_string(),
            interpreter: "python".to_string(),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        check_range_u64("training.trigger_threshold", self.trigger_threshold, 50, 500, "50..=500")?;
        if self.interpreter.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "training.interpreter",
                value: self.interpreter.clone(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_threshold: Option<u64>,
}

impl TrainingPatch {
    pub fn apply(&self, base: &TrainingConfig) -> Result<TrainingConfig> {
        let mut next = base.clone();
        if let Some(v) = self.trigger_threshold {
            next.trigger_threshold = v;
        }
        next.validate()?;
        Ok(next)
    }
}

/// 运行时可热更新的参数集合
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub video: VideoConfig,
    pub detection: DetectionConfig,
    pub filter: FilterConfig,
    pub training: TrainingConfig,
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        self.video.validate()?;
        self.detection.validate()?;
        self.filter.validate()?;
        self.training.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_locator_follows_source_type() {
        let mut video = VideoConfig {
            rtsp_url: "rtsp://cam/1".to_string(),
            local_path: "/data/farm.mp4".to_string(),
            ..Default::default()
        };
        assert_eq!(video.locator(), "rtsp://cam/1");
        video.source_type = SourceType::Local;
        assert_eq!(video.locator(), "/data/farm.mp4");
    }

    #[test]
    fn test_same_source_ignores_unused_locator() {
        let a = VideoConfig {
            rtsp_url: "rtsp://cam/1".to_string(),
            ..Default::default()
        };
        let mut b = a.clone();
        b.local_path = "/tmp/other.mp4".to_string();
        assert!(a.same_source(&b));

        b.fps = 60;
        assert!(!a.same_source(&b));
    }

    #[test]
    fn test_detection_patch_rejects_out_of_range() {
        let base = DetectionConfig::default();

        let patch = DetectionPatch {
            nms_iou_threshold: Some(0.3),
            ..Default::default()
        };
        assert!(matches!(
            patch.apply(&base),
            Err(ConfigError::OutOfRange { field: "detection.nms_iou_threshold", .. })
        ));

        let patch = DetectionPatch {
            input_size: Some(512),
            ..Default::default()
        };
        assert!(patch.apply(&base).is_err());

        let patch = DetectionPatch {
            confidence_threshold: Some(f32::NAN),
            ..Default::default()
        };
        assert!(patch.apply(&base).is_err());
    }

    #[test]
    fn test_filter_patch_applies_partial_fields() {
        let base = FilterConfig::default();
        let patch = FilterPatch {
            time_window_seconds: Some(30),
            ..Default::default()
        };
        let next = patch.apply(&base).unwrap();
        assert_eq!(next.time_window_seconds, 30);
        assert_eq!(next.spatial_iou_threshold, base.spatial_iou_threshold);

        let patch = FilterPatch {
            time_window_seconds: Some(0),
            ..Default::default()
        };
        assert!(patch.apply(&base).is_err());
    }

    #[test]
    fn test_training_threshold_bounds() {
        let base = TrainingConfig::default();
        for bad in [0, 49, 501] {
            let patch = TrainingPatch {
                trigger_threshold: Some(bad),
            };
            assert!(patch.apply(&base).is_err(), "{} should be rejected", bad);
        }
        let patch = TrainingPatch {
            trigger_threshold: Some(50),
        };
        assert_eq!(patch.apply(&base).unwrap().trigger_threshold, 50);
    }

    #[test]
    fn test_source_type_serde() {
        let video: VideoConfig = serde_json::from_str(r#"{"source_type":"local","local_path":"a.mp4"}"#).unwrap();
        assert_eq!(video.source_type, SourceType::Local);
        assert_eq!(video.fps, 30);
    }
}
