//! The input bundle of a registration run.

use std::path::{Path, PathBuf};

use crate::error::{RegistrationError, Result};

/// A previously computed fixed-to-target transform and the image it maps onto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorTransform {
    pub transform: PathBuf,
    pub target: PathBuf,
}

/// Inputs of one registration run.
///
/// Construct with [`RegistrationRequest::new`] and the `with_*` methods, then
/// call [`RegistrationRequest::validate`] before handing it to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub moving_image: PathBuf,
    pub fixed_image: PathBuf,
    pub fixed_brainmask: PathBuf,
    pub fixed_regmask: Option<PathBuf>,
    pub prior: Option<PriorTransform>,
    pub scale_fixed: bool,
    pub output_dir: PathBuf,
    pub keep_workdir: bool,
}

impl RegistrationRequest {
    pub fn new(
        moving_image: impl Into<PathBuf>,
        fixed_image: impl Into<PathBuf>,
        fixed_brainmask: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            moving_image: moving_image.into(),
            fixed_image: fixed_image.into(),
            fixed_brainmask: fixed_brainmask.into(),
            fixed_regmask: None,
            prior: None,
            scale_fixed: false,
            output_dir: output_dir.into(),
            keep_workdir: false,
        }
    }

    pub fn with_regmask(mut self, regmask: impl Into<PathBuf>) -> Self {
        self.fixed_regmask = Some(regmask.into());
        self
    }

    pub fn with_prior(mut self, transform: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        self.prior = Some(PriorTransform {
            transform: transform.into(),
            target: target.into(),
        });
        self
    }

    /// Set the prior from two independently optional parts.
    ///
    /// Both must be given or neither.
    pub fn with_prior_parts(self, transform: Option<PathBuf>, target: Option<PathBuf>) -> Result<Self> {
        match (transform, target) {
            (Some(transform), Some(target)) => Ok(self.with_prior(transform, target)),
            (None, None) => Ok(self),
            (Some(_), None) => Err(RegistrationError::configuration(
                "fixed-transform was given without fixed-target",
            )),
            (None, Some(_)) => Err(RegistrationError::configuration(
                "fixed-target was given without fixed-transform",
            )),
        }
    }

    pub fn with_scale_fixed(mut self, scale_fixed: bool) -> Self {
        self.scale_fixed = scale_fixed;
        self
    }

    pub fn with_keep_workdir(mut self, keep_workdir: bool) -> Self {
        self.keep_workdir = keep_workdir;
        self
    }

    /// Resolve every path to absolute form and check that all inputs exist.
    ///
    /// The output directory need not exist yet.
    pub fn validate(&self) -> Result<Self> {
        let mut resolved = self.clone();
        resolved.moving_image = existing(&self.moving_image)?;
        resolved.fixed_image = existing(&self.fixed_image)?;
        resolved.fixed_brainmask = existing(&self.fixed_brainmask)?;
        resolved.fixed_regmask = self.fixed_regmask.as_deref().map(existing).transpose()?;
        resolved.prior = match &self.prior {
            Some(prior) => Some(PriorTransform {
                transform: existing(&prior.transform)?,
                target: existing(&prior.target)?,
            }),
            None => None,
        };
        resolved.output_dir = absolute(&self.output_dir)?;
        Ok(resolved)
    }

    pub fn moving_stem(&self) -> String {
        split_name(&self.moving_image).0
    }

    pub fn fixed_stem(&self) -> String {
        split_name(&self.fixed_image).0
    }

    /// All extensions of the moving image, e.g. `.nii.gz`.
    pub fn moving_extension(&self) -> String {
        split_name(&self.moving_image).1
    }

    /// Per-run scratch directory under the output directory.
    pub fn working_dir(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}__{}", self.moving_stem(), self.fixed_stem()))
    }

    /// Published image path.
    pub fn output_image(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}_reg{}", self.moving_stem(), self.moving_extension()))
    }

    /// Published transform path, keeping the extension of `transform`.
    pub fn output_transform(&self, transform: &Path) -> PathBuf {
        let extension = transform
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        self.output_dir
            .join(format!("{}_reg{}", self.moving_stem(), extension))
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| RegistrationError::file_io(path, e))?;
    Ok(cwd.join(path))
}

fn existing(path: &Path) -> Result<PathBuf> {
    let path = absolute(path)?;
    if !path.exists() {
        return Err(RegistrationError::configuration(format!("{} does not exist.", path.display())));
    }
    Ok(path)
}

/// Split a file name at its first `.` into stem and extensions.
fn split_name(path: &Path) -> (String, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.find('.') {
        Some(idx) => (name[..idx].to_string(), name[idx..].to_string()),
        None => (name, String::new()),
    }
}
