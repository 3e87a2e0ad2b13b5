// flux-alert: 报警时空抑制
//
// 只处理不确定目标；与时间窗口内已有报警的 IoU 超过阈值即抑制。

pub mod crop;
pub mod filter;

pub use crop::{crop_jpeg, crop_region, CropError};
pub use filter::{ActiveAlert, AlertFilter, AlertFilterStats};
