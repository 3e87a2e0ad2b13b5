pub mod app;
pub mod error;
pub mod loader;
pub mod runtime;
pub mod store;

pub use app::{
    AppConfig, DecoderConfig, InferenceConfig, LoggingConfig, MetricsConfig, PipelineConfig,
    ServerConfig,
};
pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;
pub use runtime::{
    DetectionConfig, DetectionPatch, FilterConfig, FilterPatch, RuntimeConfig, SourceType,
    TrainingConfig, TrainingPatch, VideoConfig,
};
pub use store::{ConfigStore, RuntimeSnapshot, VideoUpdate};
