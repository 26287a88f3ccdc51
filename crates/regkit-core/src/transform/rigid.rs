//! Rigid transform implementation.
//!
//! This module provides a rigid transform (rotation + translation) about an
//! explicit center of rotation.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use nalgebra::{Quaternion, Rotation3, UnitQuaternion};
use serde::{Deserialize, Serialize};
use crate::error::{Result, TransformError};
use crate::spatial::{
    is_proper_rotation, rotation_x, rotation_y, rotation_z, Matrix3, Point3, Vector3,
    ROTATION_TOLERANCE,
};
use super::trait_::{apply_matrix_offset, SpatialTransform, Transform};

/// Rigid Transform (Rotation + Translation), 6 degrees of freedom.
///
/// Includes a fixed center of rotation: T(x) = R(x - c) + c + t
///
/// The rotation is always a proper rotation matrix; constructors that accept
/// an arbitrary matrix validate it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    rotation: Matrix3,
    translation: Vector3,
    center: Point3,
}

impl RigidTransform {
    /// Create a new rigid transform.
    ///
    /// # Arguments
    /// * `rotation` - 3x3 rotation matrix (orthonormal, det = +1)
    /// * `translation` - Translation vector
    /// * `center` - Fixed center of rotation
    ///
    /// # Errors
    /// [`TransformError::InvalidRotation`] if `rotation` is not a proper rotation.
    pub fn new(rotation: Matrix3, translation: Vector3, center: Point3) -> Result<Self> {
        if !is_proper_rotation(&rotation, ROTATION_TOLERANCE) {
            return Err(TransformError::invalid_rotation(format!(
                "matrix is not orthonormal with determinant +1 (det = {:.9})",
                rotation.determinant()
            )));
        }
        Ok(Self::new_unchecked(rotation, translation, center))
    }

    /// Build from parts already known to form a proper rotation.
    pub(crate) fn new_unchecked(rotation: Matrix3, translation: Vector3, center: Point3) -> Self {
        Self {
            rotation,
            translation,
            center,
        }
    }

    /// Create an identity rigid transform about the origin.
    pub fn identity() -> Self {
        Self::new_unchecked(Matrix3::identity(), Vector3::zeros(), Point3::origin())
    }

    /// Create a pure translation.
    pub fn from_translation(translation: Vector3) -> Self {
        Self::new_unchecked(Matrix3::identity(), translation, Point3::origin())
    }

    /// Create from Euler angles composed as `R = Rz * Ry * Rx`.
    ///
    /// # Arguments
    /// * `angles` - `[x, y, z]` rotation angles in radians
    pub fn from_euler_zyx(angles: [f64; 3], translation: Vector3, center: Point3) -> Self {
        let rotation = rotation_z(angles[2]) * rotation_y(angles[1]) * rotation_x(angles[0]);
        Self::new_unchecked(rotation, translation, center)
    }

    /// Create from Euler angles composed as `R = Rz * Rx * Ry`.
    ///
    /// This is the default ordering of ITK's `Euler3DTransform`.
    pub fn from_euler_zxy(angles: [f64; 3], translation: Vector3, center: Point3) -> Self {
        let rotation = rotation_z(angles[2]) * rotation_x(angles[0]) * rotation_y(angles[1]);
        Self::new_unchecked(rotation, translation, center)
    }

    /// Create from a versor (quaternion `[x, y, z, w]`).
    ///
    /// The quaternion is normalized; a zero quaternion is rejected.
    pub fn from_versor(versor: [f64; 4], translation: Vector3, center: Point3) -> Result<Self> {
        let q = Quaternion::new(versor[3], versor[0], versor[1], versor[2]);
        if !(q.norm() > f64::EPSILON) || !q.norm().is_finite() {
            return Err(TransformError::invalid_rotation(format!(
                "versor {:?} cannot be normalized",
                versor
            )));
        }
        let rotation = UnitQuaternion::from_quaternion(q).to_rotation_matrix().into_inner();
        Ok(Self::new_unchecked(rotation, translation, center))
    }

    /// Get the rotation matrix.
    pub fn rotation(&self) -> &Matrix3 {
        &self.rotation
    }

    /// Get the translation vector.
    pub fn translation(&self) -> &Vector3 {
        &self.translation
    }

    /// Get the center of rotation.
    pub fn center(&self) -> &Point3 {
        &self.center
    }

    /// Get the rotation as a versor `[x, y, z, w]` with `w >= 0`.
    pub fn versor(&self) -> [f64; 4] {
        let rotation = Rotation3::from_matrix_unchecked(self.rotation);
        let q = UnitQuaternion::from_rotation_matrix(&rotation);
        let sign = if q.w < 0.0 { -1.0 } else { 1.0 };
        [sign * q.i, sign * q.j, sign * q.k, sign * q.w]
    }

    /// Effective offset `o` such that T(x) = R x + o.
    pub fn offset(&self) -> Vector3 {
        self.translation + self.center.coords - self.rotation * self.center.coords
    }

    /// Inverse transform, expressed about the same center.
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.transpose();
        let translation = -(rotation * self.translation);
        Self::new_unchecked(rotation, translation, self.center)
    }

    /// Re-express the same mapping about a different center.
    pub fn with_center(&self, center: Point3) -> Self {
        let shift = self.center.coords - center.coords;
        let translation = self.translation + shift - self.rotation * shift;
        Self::new_unchecked(self.rotation, translation, center)
    }

    /// Check whether two transforms describe the same mapping within `tol`,
    /// regardless of the center each is expressed about.
    pub fn approx_eq(&self, other: &Self, tol: f64) -> bool {
        (self.rotation - other.rotation).amax() < tol && (self.offset() - other.offset()).amax() < tol
    }
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl SpatialTransform for RigidTransform {
    fn transform_point(&self, point: &Point3) -> Point3 {
        // T(x) = R(x - c) + c + t
        let centered = point - self.center;
        self.center + self.rotation * centered + self.translation
    }
}

impl<B: Backend> Transform<B, 3> for RigidTransform {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        apply_matrix_offset(points, &self.rotation, &self.offset())
    }
}
