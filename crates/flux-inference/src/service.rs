use async_trait::async_trait;
use bytes::Bytes;
use flux_config::DetectionPatch;
use flux_types::{Detection, Frame};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 单帧检测请求
#[derive(Debug, Clone)]
pub struct DetectRequest {
    pub frame_id: i64,
    /// JPEG 编码数据
    pub image_data: Bytes,
    pub image_format: &'static str,
}

impl DetectRequest {
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            frame_id: frame.id,
            image_data: frame.data.clone(),
            image_format: "jpeg",
        }
    }
}

/// 检测响应；`error` 非空表示服务端显式失败
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectResponse {
    pub frame_id: i64,
    #[serde(default)]
    pub results: Vec<Detection>,
    #[serde(default)]
    pub inference_time_ms: i64,
    #[serde(default)]
    pub error: String,
}

/// 管理类调用的响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminResponse {
    pub success: bool,
    pub message: String,
    /// 推理服务未连接，仅本地生效
    #[serde(default)]
    pub local_only: bool,
}

impl AdminResponse {
    pub fn local_only(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: message.into(),
            local_only: true,
        }
    }
}

/// 外部推理服务
#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn detect(&self, request: &DetectRequest) -> Result<DetectResponse>;

    async fn update_params(&self, params: &DetectionPatch) -> Result<AdminResponse>;

    async fn reload_model(&self, model_path: &str) -> Result<AdminResponse>;

    /// 服务标识，用于日志
    fn name(&self) -> &str {
        "inference"
    }
}
