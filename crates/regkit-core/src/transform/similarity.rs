//! Similarity transform implementation.
//!
//! A rigid transform with an additional per-axis scale applied before the
//! rotation: T(x) = R * S * (x - c) + c + t, with S = diag(scale).

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};
use crate::error::{Result, TransformError};
use crate::spatial::{is_proper_rotation, Matrix3, Point3, Vector3, ROTATION_TOLERANCE};
use super::rigid::RigidTransform;
use super::trait_::{apply_matrix_offset, SpatialTransform, Transform};

/// Similarity Transform (Rotation + Scale + Translation).
///
/// 7 degrees of freedom for an isotropic scale, 9 for an anisotropic one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityTransform {
    rotation: Matrix3,
    translation: Vector3,
    center: Point3,
    scale: Vector3,
}

impl SimilarityTransform {
    /// Create a new similarity transform.
    ///
    /// # Errors
    /// [`TransformError::InvalidRotation`] if `rotation` is not a proper rotation.
    pub fn new(rotation: Matrix3, translation: Vector3, center: Point3, scale: Vector3) -> Result<Self> {
        if !is_proper_rotation(&rotation, ROTATION_TOLERANCE) {
            return Err(TransformError::invalid_rotation(format!(
                "matrix is not orthonormal with determinant +1 (det = {:.9})",
                rotation.determinant()
            )));
        }
        Ok(Self {
            rotation,
            translation,
            center,
            scale,
        })
    }

    /// Attach a scale to a rigid transform, keeping its rotation, translation and center.
    pub fn from_rigid(rigid: &RigidTransform, scale: Vector3) -> Self {
        Self {
            rotation: *rigid.rotation(),
            translation: *rigid.translation(),
            center: *rigid.center(),
            scale,
        }
    }

    /// Create a pure scaling about `center` (no rotation, no translation).
    pub fn scaling(scale: Vector3, center: Point3) -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
            center,
            scale,
        }
    }

    /// Create a uniform scaling about `center`.
    pub fn uniform_scaling(scale: f64, center: Point3) -> Self {
        Self::scaling(Vector3::repeat(scale), center)
    }

    /// Get the rotation matrix (without scale).
    pub fn rotation(&self) -> &Matrix3 {
        &self.rotation
    }

    /// Get the translation vector.
    pub fn translation(&self) -> &Vector3 {
        &self.translation
    }

    /// Get the center of rotation and scaling.
    pub fn center(&self) -> &Point3 {
        &self.center
    }

    /// Get the per-axis scale factors.
    pub fn scale(&self) -> &Vector3 {
        &self.scale
    }

    /// Linear part `R * diag(scale)`.
    pub fn matrix(&self) -> Matrix3 {
        self.rotation * Matrix3::from_diagonal(&self.scale)
    }

    /// Effective offset `o` such that T(x) = M x + o.
    pub fn offset(&self) -> Vector3 {
        self.translation + self.center.coords - self.matrix() * self.center.coords
    }

    /// Whether all scale components are equal.
    pub fn is_isotropic(&self) -> bool {
        let s = self.scale;
        (s[0] - s[1]).abs() <= f64::EPSILON * s[0].abs().max(1.0)
            && (s[0] - s[2]).abs() <= f64::EPSILON * s[0].abs().max(1.0)
    }

    /// Same transform with the scale reset to unity.
    pub fn with_unit_scale(&self) -> Self {
        Self {
            scale: Vector3::repeat(1.0),
            ..*self
        }
    }

    /// Rigid part of this transform: rotation, translation and center, scale dropped.
    pub fn to_rigid(&self) -> RigidTransform {
        RigidTransform::new_unchecked(self.rotation, self.translation, self.center)
    }

    /// Check that every scale component can be inverted.
    pub fn check_invertible(&self) -> Result<()> {
        for (axis, s) in self.scale.iter().enumerate() {
            if *s == 0.0 || !s.is_finite() || !(1.0 / s).is_finite() {
                return Err(TransformError::non_invertible_scale(format!(
                    "scale[{}] = {} has no reciprocal",
                    axis, s
                )));
            }
        }
        Ok(())
    }

    /// Inverse transform, expressed about the same center.
    ///
    /// # Errors
    /// * [`TransformError::NonInvertibleScale`] for a zero or non-finite scale.
    /// * [`TransformError::Unrepresentable`] when an anisotropic scale is
    ///   combined with a rotation: the inverse `S^-1 R^T` is then not of the
    ///   form `R' S'`.
    pub fn inverse(&self) -> Result<Self> {
        self.check_invertible()?;
        let inv_scale = self.scale.map(|s| 1.0 / s);
        let rotation_is_identity = (self.rotation - Matrix3::identity()).amax() < ROTATION_TOLERANCE;
        if !self.is_isotropic() && !rotation_is_identity {
            return Err(TransformError::unrepresentable(
                "inverse of a rotated anisotropic scaling is not a similarity transform",
            ));
        }
        let rotation = self.rotation.transpose();
        let inv_matrix = Matrix3::from_diagonal(&inv_scale) * rotation;
        let translation = -(inv_matrix * self.translation);
        Ok(Self {
            rotation,
            translation,
            center: self.center,
            scale: inv_scale,
        })
    }
}

impl From<RigidTransform> for SimilarityTransform {
    fn from(rigid: RigidTransform) -> Self {
        Self::from_rigid(&rigid, Vector3::repeat(1.0))
    }
}

impl SpatialTransform for SimilarityTransform {
    fn transform_point(&self, point: &Point3) -> Point3 {
        // T(x) = R * S * (x - c) + c + t
        let centered = (point - self.center).component_mul(&self.scale);
        self.center + self.rotation * centered + self.translation
    }
}

impl<B: Backend> Transform<B, 3> for SimilarityTransform {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        apply_matrix_offset(points, &self.matrix(), &self.offset())
    }
}
