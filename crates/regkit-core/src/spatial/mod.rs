//! Spatial types for points, vectors, spacing and orientation.
//!
//! All geometry is `f64` nalgebra. The aliases below keep the transform and
//! image signatures readable without wrapping nalgebra types.

use nalgebra::{Point as NaPoint, SMatrix, SVector};

pub type Point<const D: usize> = NaPoint<f64, D>;
pub type Vector<const D: usize> = SVector<f64, D>;
pub type Spacing<const D: usize> = SVector<f64, D>;
pub type Direction<const D: usize> = SMatrix<f64, D, D>;

// Common aliases
pub type Point3 = Point<3>;
pub type Vector3 = Vector<3>;
pub type Spacing3 = Spacing<3>;
pub type Direction3 = Direction<3>;
pub type Matrix3 = SMatrix<f64, 3, 3>;

/// Tolerance used when validating rotation matrices.
pub const ROTATION_TOLERANCE: f64 = 1e-6;

/// Check if a matrix is orthogonal (`M * M^T == I` within `tol`).
pub fn is_orthogonal<const D: usize>(m: &SMatrix<f64, D, D>, tol: f64) -> bool {
    let product = m * m.transpose();
    (product - SMatrix::<f64, D, D>::identity()).amax() < tol
}

/// Check if a matrix is a proper rotation (orthogonal, det = +1).
pub fn is_proper_rotation(m: &Matrix3, tol: f64) -> bool {
    is_orthogonal(m, tol) && (m.determinant() - 1.0).abs() < tol
}

/// Rotation about the x axis by `angle` radians.
pub fn rotation_x(angle: f64) -> Matrix3 {
    let (s, c) = angle.sin_cos();
    Matrix3::new(
        1.0, 0.0, 0.0,
        0.0, c, -s,
        0.0, s, c,
    )
}

/// Rotation about the y axis by `angle` radians.
pub fn rotation_y(angle: f64) -> Matrix3 {
    let (s, c) = angle.sin_cos();
    Matrix3::new(
        c, 0.0, s,
        0.0, 1.0, 0.0,
        -s, 0.0, c,
    )
}

/// Rotation about the z axis by `angle` radians.
pub fn rotation_z(angle: f64) -> Matrix3 {
    let (s, c) = angle.sin_cos();
    Matrix3::new(
        c, -s, 0.0,
        s, c, 0.0,
        0.0, 0.0, 1.0,
    )
}
