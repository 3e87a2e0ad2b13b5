use crate::BBox;
use serde::{Deserialize, Serialize};

/// 报警消息（只针对通过时空抑制的不确定目标）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub id: i32,
    pub frame_id: i64,
    /// Unix 毫秒
    pub timestamp: i64,
    /// 裁剪截图（Base64 JPEG），解码失败时为空
    pub image_data: String,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub class_name: String,
    pub confidence: f32,
    pub entropy: f32,
    /// 截图区域（检测框外扩 50% 后裁剪到画面内）
    #[serde(skip)]
    pub crop: BBox,
}

impl AlertMessage {
    pub fn bbox(&self) -> BBox {
        BBox::new(self.x1, self.y1, self.x2, self.y2)
    }
}
