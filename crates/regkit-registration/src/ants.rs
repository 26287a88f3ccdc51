//! ANTs command line adapter.
//!
//! Each capability call becomes one or two child processes. Threads and
//! seeds go into the child's environment, never into this process's.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, trace};

use crate::config::ExecutionConfig;
use crate::error::{RegistrationError, Result, ToolStatus};
use crate::estimator::{
    ApplyTransformsRequest, InitialPoseRequest, PoseEstimator, RefinementRequest, Resampler,
    SpacingResampleRequest,
};

/// Runs `ResampleImageBySpacing`, `antsAI`, `antsRegistration`,
/// `antsApplyTransforms` and `ConvertTransformFile`.
#[derive(Debug, Clone, Default)]
pub struct AntsToolkit {
    bin_dir: Option<PathBuf>,
}

impl AntsToolkit {
    /// Look tools up on `PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look tools up in `dir`.
    pub fn with_bin_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            bin_dir: Some(dir.into()),
        }
    }

    /// Use `$ANTSPATH` when set, `PATH` otherwise.
    pub fn from_env() -> Self {
        match std::env::var_os("ANTSPATH") {
            Some(dir) if !dir.is_empty() => Self::with_bin_dir(dir),
            _ => Self::new(),
        }
    }

    fn program(&self, tool: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(tool),
            None => PathBuf::from(tool),
        }
    }

    fn run(&self, tool: &str, args: &[OsString], exec: &ExecutionConfig) -> Result<()> {
        let program = self.program(tool);
        debug!(
            "Running {} {}",
            program.display(),
            args.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" ")
        );

        let threads = exec.threads.to_string();
        let out = Command::new(&program)
            .args(args)
            .env("ITK_GLOBAL_DEFAULT_NUMBER_OF_THREADS", &threads)
            .env("NSLOTS", &threads)
            .env("ANTS_RANDOM_SEED", exec.initializer_seed.to_string())
            .output()
            .map_err(|e| RegistrationError::external_tool(tool, ToolStatus::NotStarted, format!("failed to run {}: {}", program.display(), e)))?;

        trace!("{} stdout:\n{}", tool, String::from_utf8_lossy(&out.stdout));
        if !out.status.success() {
            return Err(RegistrationError::external_tool(
                tool,
                ToolStatus::from(out.status),
                String::from_utf8_lossy(&out.stderr).trim(),
            ));
        }
        Ok(())
    }
}

impl PoseEstimator for AntsToolkit {
    fn estimate_initial_pose(&self, request: &InitialPoseRequest<'_>, exec: &ExecutionConfig) -> Result<PathBuf> {
        self.run("antsAI", &initial_pose_args(request), exec)?;
        Ok(request.output.to_path_buf())
    }

    fn refine(&self, request: &RefinementRequest<'_>, exec: &ExecutionConfig) -> Result<PathBuf> {
        self.run("antsRegistration", &refinement_args(request, exec), exec)?;

        let composite = suffixed(request.output_prefix, "Composite.h5");
        let text = suffixed(request.output_prefix, "Composite.txt");
        let args = vec![
            OsString::from("3"),
            composite.into_os_string(),
            text.clone().into_os_string(),
        ];
        self.run("ConvertTransformFile", &args, exec)?;
        Ok(text)
    }
}

impl Resampler for AntsToolkit {
    fn resample_by_spacing(&self, request: &SpacingResampleRequest<'_>, exec: &ExecutionConfig) -> Result<PathBuf> {
        self.run("ResampleImageBySpacing", &spacing_args(request), exec)?;
        Ok(request.output.to_path_buf())
    }

    fn apply_transforms(&self, request: &ApplyTransformsRequest<'_>, exec: &ExecutionConfig) -> Result<PathBuf> {
        self.run("antsApplyTransforms", &apply_transforms_args(request), exec)?;
        Ok(request.output.to_path_buf())
    }
}

fn suffixed(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// `[a,b]` with each path rendered as-is.
fn bracket(parts: &[&OsStr]) -> OsString {
    let mut out = OsString::from("[");
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push(",");
        }
        out.push(part);
    }
    out.push("]");
    out
}

fn join_levels<T: ToString>(levels: &[T]) -> String {
    levels.iter().map(ToString::to_string).collect::<Vec<_>>().join("x")
}

fn spacing_args(request: &SpacingResampleRequest<'_>) -> Vec<OsString> {
    let spacing = request.spacing_mm.to_string();
    vec![
        "3".into(),
        request.input.into(),
        request.output.into(),
        spacing.clone().into(),
        spacing.clone().into(),
        spacing.into(),
        // smooth before subsampling
        "1".into(),
    ]
}

fn initial_pose_args(request: &InitialPoseRequest<'_>) -> Vec<OsString> {
    let settings = request.settings;
    let metric = &settings.metric;
    let mut mattes = OsString::from("Mattes");
    mattes.push(bracket(&[
        request.fixed.as_os_str(),
        request.moving.as_os_str(),
        OsStr::new(&metric.bins.to_string()),
        OsStr::new(&metric.sampling),
        OsStr::new(&metric.sampling_fraction.to_string()),
    ]));

    vec![
        "-d".into(),
        "3".into(),
        "-m".into(),
        mattes,
        "-t".into(),
        format!("{}[{}]", request.model, settings.step).into(),
        "-o".into(),
        request.output.into(),
        "-s".into(),
        format!("[{},{}]", settings.search_angle_step, settings.search_arc_fraction).into(),
        "-g".into(),
        format!("[{},{}]", settings.translation_step, join_levels(&settings.translation_extent)).into(),
        "-p".into(),
        (if settings.align_principal_axes { "1" } else { "0" }).into(),
        "-c".into(),
        settings.convergence.to_string().into(),
        "-v".into(),
    ]
}

fn refinement_args(request: &RefinementRequest<'_>, exec: &ExecutionConfig) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--dimensionality".into(),
        "3".into(),
        "--random-seed".into(),
        exec.refinement_seed.to_string().into(),
        "--verbose".into(),
        "1".into(),
        "--output".into(),
        request.output_prefix.into(),
        "--initialize-transforms-per-stage".into(),
        "1".into(),
        "--write-composite-transform".into(),
        "1".into(),
        "--collapse-output-transforms".into(),
        "0".into(),
        "--initial-moving-transform".into(),
        request.initial_transform.into(),
    ];

    for stage in &request.stages {
        let schedule = stage.schedule;
        let metric = &schedule.metric;
        let mut mattes = OsString::from("Mattes");
        mattes.push(bracket(&[
            request.fixed.as_os_str(),
            request.moving.as_os_str(),
            OsStr::new(&schedule.metric_weight.to_string()),
            OsStr::new(&metric.bins.to_string()),
            OsStr::new(&metric.sampling),
            OsStr::new(&metric.sampling_fraction.to_string()),
        ]));
        let mask = stage.fixed_mask.map_or(OsStr::new("None"), Path::as_os_str);

        args.extend([
            "--metric".into(),
            mattes,
            "--transform".into(),
            format!("Rigid[{}]", schedule.step).into(),
            "--convergence".into(),
            format!(
                "[{},{:e},{}]",
                join_levels(&schedule.convergence),
                schedule.threshold,
                schedule.window
            )
            .into(),
            "--smoothing-sigmas".into(),
            join_levels(&schedule.smoothing_sigmas).into(),
            "--shrink-factors".into(),
            join_levels(&schedule.shrink_factors).into(),
            "--masks".into(),
            bracket(&[mask, OsStr::new("None")]),
        ]);
    }
    args
}

fn apply_transforms_args(request: &ApplyTransformsRequest<'_>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--dimensionality".into(),
        "3".into(),
        "--input".into(),
        request.input.into(),
        "--reference-image".into(),
        request.reference.into(),
        "--output".into(),
        request.output.into(),
        "--interpolation".into(),
        request.interpolation.to_string().into(),
        "--output-data-type".into(),
        "float".into(),
    ];
    for transform in &request.transforms {
        args.push("--transform".into());
        args.push((*transform).into());
    }
    args.push("--verbose".into());
    args
}
