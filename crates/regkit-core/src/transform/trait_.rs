//! Transform traits for spatial coordinate transformations.
//!
//! [`SpatialTransform`] maps single `f64` points and is what the transform
//! algebra is tested against. [`Transform`] maps batches of points held in a
//! burn tensor and is what grid-wide operations such as resampling use.

use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor, TensorData};
use crate::spatial::{Matrix3, Point3, Vector3};

/// A transform of 3D physical points.
pub trait SpatialTransform {
    /// Map a single point.
    fn transform_point(&self, point: &Point3) -> Point3;
}

/// Transform trait for batched spatial coordinate transformations.
///
/// # Type Parameters
/// * `B` - The Burn backend
/// * `D` - The spatial dimensionality
pub trait Transform<B: Backend, const D: usize> {
    /// Apply transform to a batch of points.
    ///
    /// # Arguments
    /// * `points` - Tensor of shape `[Batch, D]` containing the input points
    ///
    /// # Returns
    /// Tensor of shape `[Batch, D]` containing the transformed points
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2>;
}

/// Apply `y = M x + o` to every row of a `[Batch, 3]` tensor.
///
/// In row vector notation this is `y = x @ M^T + o`.
pub(crate) fn apply_matrix_offset<B: Backend>(
    points: Tensor<B, 2>,
    matrix: &Matrix3,
    offset: &Vector3,
) -> Tensor<B, 2> {
    let device = points.device();

    let mut m_t = Vec::with_capacity(9);
    for r in 0..3 {
        for c in 0..3 {
            m_t.push(matrix[(c, r)] as f32);
        }
    }
    let m_t = Tensor::<B, 2>::from_data(TensorData::new(m_t, Shape::new([3, 3])), &device);

    let o: Vec<f32> = offset.iter().map(|v| *v as f32).collect();
    let o = Tensor::<B, 1>::from_data(TensorData::new(o, Shape::new([3])), &device).reshape([1, 3]);

    points.matmul(m_t) + o
}
