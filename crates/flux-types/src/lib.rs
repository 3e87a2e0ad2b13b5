// flux-types: 视频分析闭环的共享数据模型
//
// 帧 -> 检测结果 -> 报警，三类记录在各引擎之间单向流动，创建后只读。

pub mod alert;
pub mod bbox;
pub mod detection;
pub mod frame;
pub mod throttle;

pub use alert::AlertMessage;
pub use bbox::BBox;
pub use detection::{Detection, DetectionResult};
pub use frame::Frame;
pub use throttle::LogThrottle;
