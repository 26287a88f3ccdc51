//! Staged rigid registration of one volume onto another.
//!
//! [`RegistrationPipeline`] drives an external [`PoseEstimator`] and
//! [`Resampler`] (by default the ANTs tools through [`AntsToolkit`]) and does
//! the transform bookkeeping between their calls with `regkit-core`.

pub mod ants;
pub mod config;
pub mod error;
pub mod estimator;
pub mod pipeline;
pub mod progress;
pub mod request;

pub use ants::AntsToolkit;
pub use config::{ExecutionConfig, InitializerConfig, MetricConfig, PipelineConfig, StageSchedule};
pub use error::{RegistrationError, Result, ToolStatus};
pub use estimator::{
    ApplyTransformsRequest, InitialPoseRequest, Interpolation, PoseEstimator, RefinementRequest, RefinementStage,
    Resampler, SpacingResampleRequest, TransformModel,
};
pub use pipeline::{InitStrategy, Initialization, RegistrationOutput, RegistrationPipeline};
pub use progress::{ConsoleProgressCallback, HistoryCallback, PipelineStage, ProgressCallback, ProgressInfo, ProgressTracker};
pub use request::{PriorTransform, RegistrationRequest};
