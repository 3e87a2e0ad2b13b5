use bytes::Bytes;
use chrono::{DateTime, Utc};

/// 视频帧：一段完整的 JPEG 字节，由帧源创建后不可变
#[derive(Debug, Clone)]
pub struct Frame {
    /// 帧序号（单个源生命周期内严格递增）
    pub id: i64,
    /// JPEG 编码数据
    pub data: Bytes,
    /// 采集时间
    pub timestamp: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(id: i64, data: Bytes, width: u32, height: u32) -> Self {
        Self {
            id,
            data,
            timestamp: Utc::now(),
            width,
            height,
        }
    }
}
