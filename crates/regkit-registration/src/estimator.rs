//! Capabilities the pipeline delegates to external tools.
//!
//! Pose estimation and intensity resampling are not done in-process. The
//! pipeline talks to them through [`PoseEstimator`] and [`Resampler`], which
//! take file paths in and write file paths out. [`crate::ants::AntsToolkit`]
//! implements both on top of the ANTs command line tools.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{ExecutionConfig, InitializerConfig, StageSchedule};
use crate::error::Result;

/// Transform class searched by the initial pose estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformModel {
    /// 6 degrees of freedom.
    Rigid,
    /// 7 degrees of freedom.
    Similarity,
}

impl TransformModel {
    pub fn degrees_of_freedom(&self) -> usize {
        match self {
            Self::Rigid => 6,
            Self::Similarity => 7,
        }
    }
}

impl fmt::Display for TransformModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rigid => write!(f, "Rigid"),
            Self::Similarity => write!(f, "Similarity"),
        }
    }
}

/// Interpolation used when resampling intensities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Linear,
    NearestNeighbor,
    /// B-spline of the given order.
    BSpline(u8),
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear => write!(f, "Linear"),
            Self::NearestNeighbor => write!(f, "NearestNeighbor"),
            Self::BSpline(order) => write!(f, "BSpline[{}]", order),
        }
    }
}

/// Coarse initial alignment of `moving` onto `fixed`.
#[derive(Debug, Clone)]
pub struct InitialPoseRequest<'a> {
    pub fixed: &'a Path,
    pub moving: &'a Path,
    pub model: TransformModel,
    pub settings: &'a InitializerConfig,
    /// Transform file to write.
    pub output: &'a Path,
}

/// One refinement stage with the fixed-space mask restricting its metric.
#[derive(Debug, Clone)]
pub struct RefinementStage<'a> {
    pub schedule: &'a StageSchedule,
    pub fixed_mask: Option<&'a Path>,
}

/// Staged rigid refinement starting from `initial_transform`.
#[derive(Debug, Clone)]
pub struct RefinementRequest<'a> {
    pub fixed: &'a Path,
    pub moving: &'a Path,
    pub initial_transform: &'a Path,
    /// Run in order; each initializes from the previous result.
    pub stages: Vec<RefinementStage<'a>>,
    /// Output prefix inside the working directory.
    pub output_prefix: &'a Path,
}

/// Resample an image onto an isotropic grid.
#[derive(Debug, Clone)]
pub struct SpacingResampleRequest<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub spacing_mm: f64,
}

/// Resample `input` onto the grid of `reference` through `transforms`.
#[derive(Debug, Clone)]
pub struct ApplyTransformsRequest<'a> {
    pub input: &'a Path,
    pub reference: &'a Path,
    pub output: &'a Path,
    /// Transform files, the first one applied last.
    pub transforms: Vec<&'a Path>,
    pub interpolation: Interpolation,
}

/// Estimates transforms from image content.
pub trait PoseEstimator {
    /// Write a transform of class `request.model` to `request.output`.
    fn estimate_initial_pose(&self, request: &InitialPoseRequest<'_>, exec: &ExecutionConfig) -> Result<PathBuf>;

    /// Run every stage and return the path of a transform file holding a
    /// composite that wraps the refined rigid transform.
    fn refine(&self, request: &RefinementRequest<'_>, exec: &ExecutionConfig) -> Result<PathBuf>;
}

/// Resamples image intensities.
pub trait Resampler {
    fn resample_by_spacing(&self, request: &SpacingResampleRequest<'_>, exec: &ExecutionConfig) -> Result<PathBuf>;

    /// Output is written as float voxels.
    fn apply_transforms(&self, request: &ApplyTransformsRequest<'_>, exec: &ExecutionConfig) -> Result<PathBuf>;
}

impl<T: PoseEstimator + ?Sized> PoseEstimator for &T {
    fn estimate_initial_pose(&self, request: &InitialPoseRequest<'_>, exec: &ExecutionConfig) -> Result<PathBuf> {
        (**self).estimate_initial_pose(request, exec)
    }

    fn refine(&self, request: &RefinementRequest<'_>, exec: &ExecutionConfig) -> Result<PathBuf> {
        (**self).refine(request, exec)
    }
}

impl<T: Resampler + ?Sized> Resampler for &T {
    fn resample_by_spacing(&self, request: &SpacingResampleRequest<'_>, exec: &ExecutionConfig) -> Result<PathBuf> {
        (**self).resample_by_spacing(request, exec)
    }

    fn apply_transforms(&self, request: &ApplyTransformsRequest<'_>, exec: &ExecutionConfig) -> Result<PathBuf> {
        (**self).apply_transforms(request, exec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolation_names() {
        assert_eq!(Interpolation::Linear.to_string(), "Linear");
        assert_eq!(Interpolation::NearestNeighbor.to_string(), "NearestNeighbor");
        assert_eq!(Interpolation::BSpline(3).to_string(), "BSpline[3]");
    }

    #[test]
    fn test_transform_model() {
        assert_eq!(TransformModel::Rigid.degrees_of_freedom(), 6);
        assert_eq!(TransformModel::Similarity.degrees_of_freedom(), 7);
        assert_eq!(TransformModel::Similarity.to_string(), "Similarity");
    }
}
