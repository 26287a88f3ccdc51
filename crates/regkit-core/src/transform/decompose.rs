//! Split a similarity transform into an inverse scaling and a rigid transform.
//!
//! The inverse scaling is applied to the fixed image so that a subsequent
//! rigid-only registration sees images of matching size. Its center is not
//! the similarity's center: it is placed at
//! `(0, (dim1 - dim2) * spacing0, (dim1 - dim2) * spacing0)` of the fixed
//! image, which keeps the scaled fixed image in place when it is resampled
//! onto its own grid.

use crate::error::{Result, TransformError};
use crate::image::ImageGeometry;
use crate::spatial::Point3;
use super::rigid::RigidTransform;
use super::similarity::SimilarityTransform;

/// Result of [`decompose`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decomposition {
    /// Scaling by the reciprocal of the similarity's scale, about the corrected center.
    pub inverse_scale: SimilarityTransform,
    /// Rotation, translation and center of the similarity with its scale reset to one.
    pub rigid: RigidTransform,
}

/// Decompose `similarity` into an inverse scale transform and a rigid transform.
///
/// # Arguments
/// * `similarity` - Transform estimated against the fixed image
/// * `fixed` - Header geometry of the fixed image; only its dims and spacing are used
///
/// # Errors
/// [`TransformError::Decomposition`] if any scale component has no reciprocal.
pub fn decompose(
    similarity: &SimilarityTransform,
    fixed: &ImageGeometry<3>,
) -> Result<Decomposition> {
    similarity
        .check_invertible()
        .map_err(|e| TransformError::decomposition(e.to_string()))?;

    let inverse = similarity.scale().map(|s| 1.0 / s);
    let dims = fixed.dims();
    let offset = (dims[1] as f64 - dims[2] as f64) * fixed.spacing()[0];
    let inverse_scale = SimilarityTransform::scaling(inverse, Point3::new(0.0, offset, offset));

    let rigid = similarity.with_unit_scale().to_rigid();

    tracing::debug!(
        scale = ?similarity.scale().as_slice(),
        inverse_center = ?inverse_scale.center().coords.as_slice(),
        "decomposed similarity transform"
    );

    Ok(Decomposition { inverse_scale, rigid })
}
