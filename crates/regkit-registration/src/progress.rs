//! Progress tracking and callbacks for registration runs.
//!
//! The pipeline reports every stage it enters and leaves to a
//! [`ProgressTracker`], which fans the events out to its callbacks.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Named stages of a registration run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    ResampleForInit,
    InitialPoseSimilarity,
    Decompose,
    ApplyInverseScale,
    InitialPoseRigid,
    StagedRefinement,
    FlattenComposite,
    Compose,
    ResampleMovingImage,
    ClipToInputRange,
    Publish,
}

impl PipelineStage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ResampleForInit => "resample for init",
            Self::InitialPoseSimilarity => "initial pose (similarity)",
            Self::Decompose => "decompose",
            Self::ApplyInverseScale => "apply inverse scale",
            Self::InitialPoseRigid => "initial pose (rigid)",
            Self::StagedRefinement => "staged refinement",
            Self::FlattenComposite => "flatten composite",
            Self::Compose => "compose with prior",
            Self::ResampleMovingImage => "resample moving image",
            Self::ClipToInputRange => "clip to input range",
            Self::Publish => "publish",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Progress information for one stage event.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub stage: PipelineStage,
    /// 1-based position of the stage within this run.
    pub step: usize,
    /// Time since the run started.
    pub elapsed: Duration,
    /// Time spent in this stage; zero when the stage starts.
    pub stage_elapsed: Duration,
}

/// Progress callback trait for monitoring registration runs.
pub trait ProgressCallback: Send + Sync {
    /// Called when a stage is entered.
    fn on_stage_start(&self, info: &ProgressInfo);

    /// Called when a stage finishes successfully.
    fn on_stage_complete(&self, _info: &ProgressInfo) {}

    /// Called when the run starts.
    fn on_start(&self) {}

    /// Called when the run completes successfully.
    fn on_complete(&self, _elapsed: Duration) {}

    /// Called when the run fails.
    fn on_error(&self, _error: &str) {}
}

/// Console progress callback that logs to tracing.
#[derive(Debug, Clone, Default)]
pub struct ConsoleProgressCallback;

impl ProgressCallback for ConsoleProgressCallback {
    fn on_stage_start(&self, info: &ProgressInfo) {
        tracing::info!("[{}] {} | Elapsed: {:.2}s", info.step, info.stage, info.elapsed.as_secs_f64());
    }

    fn on_stage_complete(&self, info: &ProgressInfo) {
        tracing::debug!("[{}] {} done in {:.2}s", info.step, info.stage, info.stage_elapsed.as_secs_f64());
    }

    fn on_start(&self) {
        tracing::info!("Registration started");
    }

    fn on_complete(&self, elapsed: Duration) {
        tracing::info!("Registration completed in {:.2}s", elapsed.as_secs_f64());
    }

    fn on_error(&self, error: &str) {
        tracing::error!("Registration failed: {}", error);
    }
}

/// History callback that records every completed stage.
#[derive(Debug, Clone, Default)]
pub struct HistoryCallback {
    history: Arc<Mutex<Vec<ProgressInfo>>>,
    errors: Arc<Mutex<Vec<String>>>,
}

impl HistoryCallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed stages, in order.
    pub fn get_history(&self) -> Vec<ProgressInfo> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn stages(&self) -> Vec<PipelineStage> {
        self.get_history().iter().map(|info| info.stage).collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear(&self) {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl ProgressCallback for HistoryCallback {
    fn on_stage_start(&self, _info: &ProgressInfo) {}

    fn on_stage_complete(&self, info: &ProgressInfo) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(info.clone());
    }

    fn on_error(&self, error: &str) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error.to_string());
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    start_time: Option<Instant>,
    step: usize,
    stage_start: Option<Instant>,
}

/// Progress tracker that manages multiple callbacks.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    callbacks: Vec<Arc<dyn ProgressCallback>>,
    state: Arc<Mutex<TrackerState>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_callback(&mut self, callback: Arc<dyn ProgressCallback>) {
        self.callbacks.push(callback);
    }

    pub fn start(&self) {
        {
            let mut state = self.lock();
            *state = TrackerState {
                start_time: Some(Instant::now()),
                ..TrackerState::default()
            };
        }
        for callback in &self.callbacks {
            callback.on_start();
        }
    }

    pub fn enter(&self, stage: PipelineStage) {
        let info = {
            let mut state = self.lock();
            state.step += 1;
            let now = Instant::now();
            state.stage_start = Some(now);
            ProgressInfo {
                stage,
                step: state.step,
                elapsed: state.start_time.map_or(Duration::ZERO, |t| now - t),
                stage_elapsed: Duration::ZERO,
            }
        };
        for callback in &self.callbacks {
            callback.on_stage_start(&info);
        }
    }

    pub fn leave(&self, stage: PipelineStage) {
        let info = {
            let state = self.lock();
            ProgressInfo {
                stage,
                step: state.step,
                elapsed: state.start_time.map_or(Duration::ZERO, |t| t.elapsed()),
                stage_elapsed: state.stage_start.map_or(Duration::ZERO, |t| t.elapsed()),
            }
        };
        for callback in &self.callbacks {
            callback.on_stage_complete(&info);
        }
    }

    pub fn complete(&self) {
        let elapsed = self.lock().start_time.map_or(Duration::ZERO, |t| t.elapsed());
        for callback in &self.callbacks {
            callback.on_complete(elapsed);
        }
    }

    pub fn error(&self, error: &str) {
        for callback in &self.callbacks {
            callback.on_error(error);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
