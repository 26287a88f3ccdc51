//! Registration orchestrator.
//!
//! A run subsamples both images, finds an initial pose with one of two
//! strategies, refines it in two masked rigid stages, then runs a single
//! shared tail: flatten the refined composite, optionally compose it with a
//! prior transform, resample the moving image, clip it to its own intensity
//! range and publish image and transform to the output directory.
//!
//! All intermediate files live in a per-run working directory. It is removed
//! after a successful publish and left in place when any stage fails.
//! Publishing copies image and transform together, so a failed run never
//! leaves one of them in the output directory.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn_ndarray::NdArray;
use regkit_core::{compose, decompose, flatten, ClipToRangeFilter, RigidTransform, TransformKind};
use regkit_io::{
    read_composite_transform, read_nifti, read_nifti_geometry, read_nifti_header, read_rigid_transform,
    read_similarity_transform, write_nifti_like, write_transform,
};
use tracing::{debug, info, warn};

use crate::config::{ExecutionConfig, PipelineConfig};
use crate::error::{RegistrationError, Result};
use crate::estimator::{
    ApplyTransformsRequest, InitialPoseRequest, Interpolation, PoseEstimator, RefinementRequest, RefinementStage,
    Resampler, SpacingResampleRequest, TransformModel,
};
use crate::progress::{PipelineStage, ProgressCallback, ProgressTracker};
use crate::request::RegistrationRequest;

type CpuBackend = NdArray<f32>;

/// How the initial pose is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStrategy {
    /// Similarity estimate, then fixed image and masks are rescaled by the
    /// inverse of its scale and the rigid part seeds refinement.
    ScaleCorrecting,
    /// Rigid estimate against the original fixed image.
    Rigid,
}

impl InitStrategy {
    pub fn for_request(request: &RegistrationRequest) -> Self {
        if request.scale_fixed {
            Self::ScaleCorrecting
        } else {
            Self::Rigid
        }
    }
}

/// Fixed-space inputs of the staged refinement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Initialization {
    pub fixed: PathBuf,
    pub brainmask: PathBuf,
    pub regmask: Option<PathBuf>,
    pub transform: PathBuf,
}

/// Durable result of a successful run.
#[derive(Debug, Clone)]
pub struct RegistrationOutput {
    /// Published, clipped image.
    pub image: PathBuf,
    /// Published transform file.
    pub transform: PathBuf,
    /// The published transform.
    pub transform_value: RigidTransform,
    /// Set when the working directory was kept.
    pub working_dir: Option<PathBuf>,
}

/// Sequences the external estimator and resampler over one request.
pub struct RegistrationPipeline<E, R> {
    estimator: E,
    resampler: R,
    config: PipelineConfig,
    execution: ExecutionConfig,
    tracker: ProgressTracker,
}

impl<E: PoseEstimator, R: Resampler> RegistrationPipeline<E, R> {
    pub fn new(estimator: E, resampler: R) -> Self {
        Self {
            estimator,
            resampler,
            config: PipelineConfig::default(),
            execution: ExecutionConfig::default(),
            tracker: ProgressTracker::new(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionConfig) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.tracker.add_callback(callback);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the whole pipeline for `request`.
    ///
    /// Inputs and settings are validated before any external tool runs.
    pub fn run(&self, request: &RegistrationRequest) -> Result<RegistrationOutput> {
        let request = request.validate()?;
        self.config.validate()?;
        self.execution.validate()?;

        let workdir = request.working_dir();
        fs::create_dir_all(&workdir).map_err(|e| RegistrationError::file_io(&workdir, e))?;
        info!(
            "Registering {} onto {} (working directory {})",
            request.moving_image.display(),
            request.fixed_image.display(),
            workdir.display()
        );

        self.tracker.start();
        match self.run_stages(&request, &workdir) {
            Ok(output) => {
                self.tracker.complete();
                Ok(output)
            }
            Err(e) => {
                self.tracker.error(&e.to_string());
                warn!("Keeping working directory {} for inspection", workdir.display());
                Err(e)
            }
        }
    }

    fn run_stages(&self, request: &RegistrationRequest, workdir: &Path) -> Result<RegistrationOutput> {
        let (coarse_fixed, coarse_moving) = self.stage(PipelineStage::ResampleForInit, || {
            self.resample_for_init(request, workdir)
        })?;

        let init = match InitStrategy::for_request(request) {
            InitStrategy::ScaleCorrecting => self.init_scale_correcting(request, workdir, &coarse_fixed, &coarse_moving)?,
            InitStrategy::Rigid => self.init_rigid(request, workdir, &coarse_fixed, &coarse_moving)?,
        };

        let composite_path = self.stage(PipelineStage::StagedRefinement, || {
            self.refine(request, workdir, &init)
        })?;

        let (refined, refined_path) = self.stage(PipelineStage::FlattenComposite, || {
            let composite = read_composite_transform(&composite_path)?;
            let rigid = flatten(&composite)?;
            let path = workdir.join("outputRigid.mat");
            write_transform(&path, &TransformKind::Rigid(rigid))?;
            Ok((rigid, path))
        })?;

        let (final_transform, transform_path, target) = match &request.prior {
            Some(prior) => self.stage(PipelineStage::Compose, || {
                let prior_transform = read_rigid_transform(&prior.transform)?;
                let combined = compose(&[refined, prior_transform])?;
                let path = workdir.join("combined.mat");
                write_transform(&path, &TransformKind::Rigid(combined))?;
                Ok((combined, path, prior.target.clone()))
            })?,
            None => (refined, refined_path, request.fixed_image.clone()),
        };
        debug!(
            "Final transform: translation {:?}, center {:?}",
            final_transform.translation(),
            final_transform.center()
        );

        let resampled = self.stage(PipelineStage::ResampleMovingImage, || {
            let output = workdir.join("output.nii.gz");
            self.resampler.apply_transforms(
                &ApplyTransformsRequest {
                    input: &request.moving_image,
                    reference: &target,
                    output: &output,
                    transforms: vec![transform_path.as_path()],
                    interpolation: Interpolation::BSpline(3),
                },
                &self.execution,
            )
        })?;

        self.stage(PipelineStage::ClipToInputRange, || {
            clip_to_range(&resampled, &request.moving_image)
        })?;

        self.stage(PipelineStage::Publish, || {
            let image = request.output_image();
            let transform = request.output_transform(&transform_path);
            publish_all(&[
                (resampled.as_path(), image.as_path()),
                (transform_path.as_path(), transform.as_path()),
            ])?;

            let working_dir = if request.keep_workdir {
                Some(workdir.to_path_buf())
            } else {
                if let Err(e) = fs::remove_dir_all(workdir) {
                    warn!("Failed to remove working directory {}: {}", workdir.display(), e);
                }
                None
            };
            info!("Wrote {} and {}", image.display(), transform.display());
            Ok(RegistrationOutput {
                image,
                transform,
                transform_value: final_transform,
                working_dir,
            })
        })
    }

    fn stage<T>(&self, stage: PipelineStage, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.tracker.enter(stage);
        let value = f()?;
        self.tracker.leave(stage);
        Ok(value)
    }

    fn resample_for_init(&self, request: &RegistrationRequest, workdir: &Path) -> Result<(PathBuf, PathBuf)> {
        let spacing_mm = self.config.init_spacing_mm;
        let fixed = self.resampler.resample_by_spacing(
            &SpacingResampleRequest {
                input: &request.fixed_image,
                output: &workdir.join("fixed.nii.gz"),
                spacing_mm,
            },
            &self.execution,
        )?;
        let moving = self.resampler.resample_by_spacing(
            &SpacingResampleRequest {
                input: &request.moving_image,
                output: &workdir.join("moving.nii.gz"),
                spacing_mm,
            },
            &self.execution,
        )?;
        Ok((fixed, moving))
    }

    fn estimate(
        &self,
        model: TransformModel,
        fixed: &Path,
        moving: &Path,
        output: &Path,
    ) -> Result<PathBuf> {
        self.estimator.estimate_initial_pose(
            &InitialPoseRequest {
                fixed,
                moving,
                model,
                settings: &self.config.initializer,
                output,
            },
            &self.execution,
        )
    }

    fn init_rigid(
        &self,
        request: &RegistrationRequest,
        workdir: &Path,
        coarse_fixed: &Path,
        coarse_moving: &Path,
    ) -> Result<Initialization> {
        let transform = self.stage(PipelineStage::InitialPoseRigid, || {
            self.estimate(TransformModel::Rigid, coarse_fixed, coarse_moving, &workdir.join("ai_rigid.mat"))
        })?;
        Ok(Initialization {
            fixed: request.fixed_image.clone(),
            brainmask: request.fixed_brainmask.clone(),
            regmask: request.fixed_regmask.clone(),
            transform,
        })
    }

    fn init_scale_correcting(
        &self,
        request: &RegistrationRequest,
        workdir: &Path,
        coarse_fixed: &Path,
        coarse_moving: &Path,
    ) -> Result<Initialization> {
        let similarity_path = self.stage(PipelineStage::InitialPoseSimilarity, || {
            self.estimate(TransformModel::Similarity, coarse_fixed, coarse_moving, &workdir.join("ai.mat"))
        })?;

        let (inverse_scale_path, rigid_path) = self.stage(PipelineStage::Decompose, || {
            let similarity = read_similarity_transform(&similarity_path)?;
            let geometry = read_nifti_geometry(&request.fixed_image)
                .map_err(|e| RegistrationError::file_io(&request.fixed_image, e))?;
            let parts = decompose(&similarity, &geometry)?;

            let inverse_scale_path = workdir.join("ai_invscale.mat");
            let rigid_path = workdir.join("ai_rigid.mat");
            write_transform(&inverse_scale_path, &TransformKind::Similarity(parts.inverse_scale))?;
            write_transform(&rigid_path, &TransformKind::Rigid(parts.rigid))?;
            Ok((inverse_scale_path, rigid_path))
        })?;

        self.stage(PipelineStage::ApplyInverseScale, || {
            let scale = |input: &Path, name: &str, interpolation: Interpolation| {
                self.resampler.apply_transforms(
                    &ApplyTransformsRequest {
                        input,
                        reference: input,
                        output: &workdir.join(name),
                        transforms: vec![inverse_scale_path.as_path()],
                        interpolation,
                    },
                    &self.execution,
                )
            };

            let fixed = scale(&request.fixed_image, "scaled_fixed.nii.gz", Interpolation::Linear)?;
            let brainmask = scale(
                &request.fixed_brainmask,
                "scaled_fixed_brainmask.nii.gz",
                Interpolation::NearestNeighbor,
            )?;
            let regmask = request
                .fixed_regmask
                .as_deref()
                .map(|mask| scale(mask, "scaled_fixed_regmask.nii.gz", Interpolation::NearestNeighbor))
                .transpose()?;
            Ok(Initialization {
                fixed,
                brainmask,
                regmask,
                transform: rigid_path.clone(),
            })
        })
    }

    fn refine(&self, request: &RegistrationRequest, workdir: &Path, init: &Initialization) -> Result<PathBuf> {
        let [coarse, fine] = &self.config.stages;
        self.estimator.refine(
            &RefinementRequest {
                fixed: &init.fixed,
                moving: &request.moving_image,
                initial_transform: &init.transform,
                stages: vec![
                    RefinementStage {
                        schedule: coarse,
                        fixed_mask: init.regmask.as_deref(),
                    },
                    RefinementStage {
                        schedule: fine,
                        fixed_mask: Some(init.brainmask.as_path()),
                    },
                ],
                output_prefix: &workdir.join("output"),
            },
            &self.execution,
        )
    }
}

/// Clamp `image` in place to the intensity range of `reference`.
fn clip_to_range(image: &Path, reference: &Path) -> Result<()> {
    let device = Default::default();
    let reference_image = read_nifti::<CpuBackend, _>(reference, &device)
        .map_err(|e| RegistrationError::file_io(reference, e))?;
    let filter = ClipToRangeFilter::from_reference(&reference_image)?;
    debug!("Clipping {} to [{}, {}]", image.display(), filter.min(), filter.max());

    let header = read_nifti_header(image).map_err(|e| RegistrationError::file_io(image, e))?;
    let resampled = read_nifti::<CpuBackend, _>(image, &device).map_err(|e| RegistrationError::file_io(image, e))?;
    let clipped = filter.apply(&resampled);
    write_nifti_like(image, &clipped, &header).map_err(|e| RegistrationError::file_io(image, e))
}

/// Copy each `(from, to)` pair into place, all or nothing.
///
/// Files are first copied next to their destination under a hidden
/// `.partial` name, then renamed. On failure every staged or already
/// renamed file is removed again and the sources are left untouched.
fn publish_all(files: &[(&Path, &Path)]) -> Result<()> {
    let staged: Vec<PathBuf> = files.iter().map(|(_, to)| partial_path(to)).collect();
    let mut published = Vec::with_capacity(files.len());

    let result = commit(files, &staged, &mut published);
    if result.is_err() {
        for path in staged.iter().map(PathBuf::as_path).chain(published) {
            match fs::remove_file(path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
    result
}

fn commit<'a>(files: &[(&Path, &'a Path)], staged: &[PathBuf], published: &mut Vec<&'a Path>) -> Result<()> {
    for ((from, to), partial) in files.iter().zip(staged) {
        fs::copy(from, partial).map_err(|e| RegistrationError::file_io(to, e))?;
    }
    for ((_, to), partial) in files.iter().zip(staged) {
        fs::rename(partial, to).map_err(|e| RegistrationError::file_io(to, e))?;
        published.push(*to);
    }
    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".partial");
    path.with_file_name(name)
}
