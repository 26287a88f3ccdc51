//! Run configuration.
//!
//! `ExecutionConfig` carries the per-invocation resources (threads, seeds)
//! handed to every external tool. `PipelineConfig` holds the registration
//! protocol: initializer search settings and the two refinement stages.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RegistrationError, Result};

/// Resources passed explicitly to every external invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Worker threads per external tool.
    pub threads: usize,
    /// Seed for the initial pose search.
    pub initializer_seed: u64,
    /// Seed for staged refinement.
    pub refinement_seed: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            initializer_seed: 1,
            refinement_seed: 0,
        }
    }
}

impl ExecutionConfig {
    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(RegistrationError::configuration("thread count must be at least 1"));
        }
        Ok(())
    }
}

/// Mattes mutual information settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    pub bins: u32,
    /// Sampling strategy name, e.g. `Regular`.
    pub sampling: String,
    /// Fraction of voxels sampled, in (0, 1].
    pub sampling_fraction: f64,
}

impl MetricConfig {
    fn with_fraction(sampling_fraction: f64) -> Self {
        Self {
            bins: 32,
            sampling: "Regular".to_string(),
            sampling_fraction,
        }
    }

    fn validate(&self, context: &str) -> Result<()> {
        if self.bins == 0 {
            return Err(RegistrationError::configuration(format!("{}: metric bins must be positive", context)));
        }
        if !(self.sampling_fraction > 0.0 && self.sampling_fraction <= 1.0) {
            return Err(RegistrationError::configuration(format!(
                "{}: sampling fraction {} is outside (0, 1]",
                context, self.sampling_fraction
            )));
        }
        Ok(())
    }
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self::with_fraction(0.25)
    }
}

/// Initial pose search on the coarse grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitializerConfig {
    pub metric: MetricConfig,
    /// Gradient step of the initial transform.
    pub step: f64,
    /// Rotation search step in degrees.
    pub search_angle_step: f64,
    /// Fraction of the full rotation arc searched.
    pub search_arc_fraction: f64,
    /// Translation grid step in mm.
    pub translation_step: f64,
    /// Translation grid extent per axis, in steps.
    pub translation_extent: [u32; 3],
    pub convergence: u32,
    pub align_principal_axes: bool,
}

impl Default for InitializerConfig {
    fn default() -> Self {
        Self {
            metric: MetricConfig::with_fraction(0.20),
            step: 0.1,
            search_angle_step: 20.0,
            search_arc_fraction: 0.12,
            translation_step: 40.0,
            translation_extent: [0, 0, 0],
            convergence: 10,
            align_principal_axes: false,
        }
    }
}

/// One multi-resolution rigid refinement stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSchedule {
    pub metric: MetricConfig,
    pub metric_weight: f64,
    /// Gradient step of the rigid transform.
    pub step: f64,
    /// Iterations per level, coarsest first.
    pub convergence: Vec<u32>,
    pub threshold: f64,
    pub window: u32,
    pub smoothing_sigmas: Vec<f64>,
    pub shrink_factors: Vec<u32>,
}

impl Default for StageSchedule {
    fn default() -> Self {
        Self::coarse()
    }
}

impl StageSchedule {
    /// First stage, restricted by the registration mask.
    pub fn coarse() -> Self {
        Self {
            metric: MetricConfig::default(),
            metric_weight: 1.0,
            step: 0.1,
            convergence: vec![2000, 1000, 500, 250],
            threshold: 1e-6,
            window: 10,
            smoothing_sigmas: vec![4.0, 3.0, 2.0, 1.0],
            shrink_factors: vec![16, 8, 4, 2],
        }
    }

    /// Second stage, restricted by the brain mask.
    pub fn fine() -> Self {
        Self {
            convergence: vec![500, 250, 100],
            smoothing_sigmas: vec![2.0, 1.0, 0.0],
            shrink_factors: vec![4, 2, 1],
            ..Self::coarse()
        }
    }

    pub fn levels(&self) -> usize {
        self.convergence.len()
    }

    /// Check that every per-level list has the same, non-zero length.
    pub fn validate(&self) -> Result<()> {
        let levels = self.levels();
        if levels == 0 {
            return Err(RegistrationError::configuration("stage has no resolution levels"));
        }
        if self.smoothing_sigmas.len() != levels || self.shrink_factors.len() != levels {
            return Err(RegistrationError::configuration(format!(
                "stage level counts differ: {} convergence, {} smoothing sigmas, {} shrink factors",
                levels,
                self.smoothing_sigmas.len(),
                self.shrink_factors.len()
            )));
        }
        if self.shrink_factors.contains(&0) {
            return Err(RegistrationError::configuration("shrink factors must be positive"));
        }
        if self.smoothing_sigmas.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(RegistrationError::configuration("smoothing sigmas must be finite and non-negative"));
        }
        self.metric.validate("stage")
    }
}

/// Registration protocol settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Isotropic spacing of the coarse grid used for the initial pose.
    pub init_spacing_mm: f64,
    pub initializer: InitializerConfig,
    pub stages: [StageSchedule; 2],
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            init_spacing_mm: 4.0,
            initializer: InitializerConfig::default(),
            stages: [StageSchedule::coarse(), StageSchedule::fine()],
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| RegistrationError::file_io(path, e))?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            RegistrationError::configuration(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| RegistrationError::configuration(format!("failed to serialize config: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.init_spacing_mm.is_finite() && self.init_spacing_mm > 0.0) {
            return Err(RegistrationError::configuration(format!(
                "init spacing must be positive, got {}",
                self.init_spacing_mm
            )));
        }
        self.initializer.metric.validate("initializer")?;
        for stage in &self.stages {
            stage.validate()?;
        }
        Ok(())
    }
}
