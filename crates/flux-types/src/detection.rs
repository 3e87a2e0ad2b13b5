use crate::{BBox, Frame};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 单个检测目标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: i32,
    pub bbox: BBox,
    pub class_id: i32,
    pub class_name: String,
    /// 置信度 [0,1]
    pub confidence: f32,
    /// 不确定度（类别概率分布的熵）
    pub entropy: f32,
    pub is_uncertain: bool,
}

/// 一帧的推理结果，由分发 worker 在 RPC 完成时创建
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub frame_id: i64,
    pub frame: Arc<Frame>,
    pub detections: Vec<Detection>,
    pub inference_time_ms: i64,
    pub timestamp: DateTime<Utc>,
}

impl DetectionResult {
    pub fn new(frame: Arc<Frame>, detections: Vec<Detection>, inference_time_ms: i64) -> Self {
        Self {
            frame_id: frame.id,
            frame,
            detections,
            inference_time_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn uncertain(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter().filter(|d| d.is_uncertain)
    }
}
