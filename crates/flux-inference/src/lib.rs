// flux-inference: 推理分发引擎
//
// 固定数量的 worker 从帧队列取帧，调用外部检测服务（超时 + 重试），
// 结果以非阻塞方式写入结果队列。管理类调用（参数更新、模型重载）走独立的超时预算。

pub mod dispatcher;
pub mod error;
pub mod http;
pub mod service;

pub use dispatcher::{DispatchSettings, DispatchStats, InferenceDispatcher};
pub use error::{InferenceError, Result};
pub use http::HttpInferenceClient;
pub use service::{AdminResponse, DetectRequest, DetectResponse, InferenceService};
