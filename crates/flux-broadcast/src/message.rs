use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use flux_types::{AlertMessage, Detection, DetectionResult};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Frame,
    Alert,
}

/// 推送给消费者的外层信封
#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: EventKind,
    timestamp: i64,
    data: &'a T,
}

/// 帧消息中的检测框（平铺坐标）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionData {
    pub id: i32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub class_name: String,
    pub class_id: i32,
    pub confidence: f32,
    pub entropy: f32,
    pub is_uncertain: bool,
}

impl From<&Detection> for DetectionData {
    fn from(d: &Detection) -> Self {
        Self {
            id: d.id,
            x1: d.bbox.x1,
            y1: d.bbox.y1,
            x2: d.bbox.x2,
            y2: d.bbox.y2,
            class_name: d.class_name.clone(),
            class_id: d.class_id,
            confidence: d.confidence,
            entropy: d.entropy,
            is_uncertain: d.is_uncertain,
        }
    }
}

/// 帧消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMessage {
    pub frame_id: i64,
    /// Base64 JPEG
    pub image_data: String,
    pub width: u32,
    pub height: u32,
    pub inference_time: i64,
    pub detections: Vec<DetectionData>,
}

impl From<&DetectionResult> for FrameMessage {
    fn from(result: &DetectionResult) -> Self {
        Self {
            frame_id: result.frame_id,
            image_data: STANDARD.encode(&result.frame.data),
            width: result.frame.width,
            height: result.frame.height,
            inference_time: result.inference_time_ms,
            detections: result.detections.iter().map(DetectionData::from).collect(),
        }
    }
}

/// 已序列化的广播事件，扇出时只克隆引用计数
#[derive(Debug, Clone)]
pub struct HubEvent {
    pub kind: EventKind,
    pub payload: Bytes,
}

impl HubEvent {
    pub fn encode<T: Serialize>(kind: EventKind, data: &T) -> Result<Self> {
        let envelope = Envelope {
            kind,
            timestamp: chrono::Utc::now().timestamp_millis(),
            data,
        };
        Ok(Self {
            kind,
            payload: Bytes::from(serde_json::to_vec(&envelope)?),
        })
    }

    pub fn frame(result: &DetectionResult) -> Result<Self> {
        Self::encode(EventKind::Frame, &FrameMessage::from(result))
    }

    pub fn alert(alert: &AlertMessage) -> Result<Self> {
        Self::encode(EventKind::Alert, alert)
    }
}
