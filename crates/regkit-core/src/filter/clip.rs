//! Intensity clipping filter.

use burn::tensor::backend::Backend;
use crate::error::ImageError;
use crate::image::Image;

/// Clamp voxel intensities to a closed range.
///
/// Used after resampling to remove interpolation overshoot: the range is
/// taken from the image that was resampled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipToRangeFilter {
    min: f64,
    max: f64,
}

impl ClipToRangeFilter {
    /// Create a filter clamping to `[min, max]`.
    pub fn new(min: f64, max: f64) -> Result<Self, ImageError> {
        if min.is_nan() || max.is_nan() || min > max {
            return Err(ImageError::InvalidRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// Create a filter clamping to the intensity range of `reference`.
    pub fn from_reference<B: Backend, const D: usize>(reference: &Image<B, D>) -> Result<Self, ImageError> {
        let (min, max) = reference.intensity_range()?;
        Self::new(min, max)
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Apply the filter to an image.
    pub fn apply<B: Backend, const D: usize>(&self, image: &Image<B, D>) -> Image<B, D> {
        image.with_data(image.data().clone().clamp(self.min, self.max))
    }
}
