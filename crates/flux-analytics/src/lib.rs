pub mod api;
pub mod control;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod samples;
pub mod shutdown;
pub mod training;

pub use api::{create_router, ApiError};
pub use control::{ControlPlane, Feedback, FeedbackOutcome, SystemStatus, TrainingStatus};
pub use error::{ControlError, Result};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineStats};
pub use samples::{LabelStatus, MemorySampleStore, NewSample, Sample, SampleStore, TrainingLog, TrainingState};
pub use shutdown::{ShutdownSignal, SignalHandler};
pub use training::{TrainingEvent, TrainingLauncher, TrainingRun};
