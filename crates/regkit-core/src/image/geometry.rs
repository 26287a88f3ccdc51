//! Voxel grid geometry.
//!
//! [`ImageGeometry`] is the header-level description of an image: the grid
//! shape plus the origin, spacing and direction that place the grid in
//! physical space. All per-axis quantities use file axis order (i, j, k),
//! which is also the component order of continuous indices.

use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor, TensorData};
use crate::error::ImageError;
use crate::spatial::{Direction, Point, Spacing, Vector};

/// Shape and physical placement of a voxel grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageGeometry<const D: usize> {
    dims: [usize; D],
    origin: Point<D>,
    spacing: Spacing<D>,
    direction: Direction<D>,
}

impl<const D: usize> ImageGeometry<D> {
    /// Create a geometry.
    ///
    /// # Arguments
    /// * `dims` - Number of voxels along each axis (i, j, k)
    /// * `origin` - Physical coordinate of voxel (0, 0, 0)
    /// * `spacing` - Physical distance between voxels along each axis
    /// * `direction` - Orientation of the image axes (columns are axis directions)
    pub fn new(dims: [usize; D], origin: Point<D>, spacing: Spacing<D>, direction: Direction<D>) -> Self {
        Self {
            dims,
            origin,
            spacing,
            direction,
        }
    }

    /// Grid with unit spacing, zero origin and identity direction.
    pub fn with_dims(dims: [usize; D]) -> Self {
        Self::new(dims, Point::origin(), Spacing::repeat(1.0), Direction::identity())
    }

    pub fn dims(&self) -> [usize; D] {
        self.dims
    }

    pub fn origin(&self) -> &Point<D> {
        &self.origin
    }

    pub fn spacing(&self) -> &Spacing<D> {
        &self.spacing
    }

    pub fn direction(&self) -> &Direction<D> {
        &self.direction
    }

    /// Total number of voxels.
    pub fn num_voxels(&self) -> usize {
        self.dims.iter().product()
    }

    /// Tensor shape holding this grid's voxels.
    ///
    /// Tensors store the last file axis first, so this is `dims` reversed.
    pub fn tensor_shape(&self) -> [usize; D] {
        let mut shape = self.dims;
        shape.reverse();
        shape
    }

    /// Map a continuous index to a physical point.
    ///
    /// `point = origin + Direction * (index * spacing)`
    pub fn index_to_world(&self, index: &Point<D>) -> Point<D> {
        let scaled = Vector::<D>::from_fn(|i, _| index[i] * self.spacing[i]);
        self.origin + self.direction * scaled
    }

    /// Map a physical point to a continuous index.
    ///
    /// `index = (Direction^-1 * (point - origin)) / spacing`
    pub fn world_to_index(&self, point: &Point<D>) -> Result<Point<D>, ImageError> {
        let inv_dir = self.direction.try_inverse().ok_or(ImageError::SingularDirection)?;
        let rotated = inv_dir * (point - self.origin);
        Ok(Point::from(Vector::<D>::from_fn(|i, _| rotated[i] / self.spacing[i])))
    }

    /// Batch version of [`index_to_world`](Self::index_to_world) over `[Batch, D]` rows.
    pub fn index_to_world_tensor<B: Backend>(&self, indices: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = indices.device();

        // P = O + I @ M with M_rc = S_r * D_cr
        let mut m_data = Vec::with_capacity(D * D);
        for r in 0..D {
            for c in 0..D {
                m_data.push((self.spacing[r] * self.direction[(c, r)]) as f32);
            }
        }
        let m_tensor = Tensor::<B, 2>::from_data(TensorData::new(m_data, Shape::new([D, D])), &device);

        indices.matmul(m_tensor) + self.origin_row::<B>(&device)
    }

    /// Batch version of [`world_to_index`](Self::world_to_index) over `[Batch, D]` rows.
    pub fn world_to_index_tensor<B: Backend>(&self, points: Tensor<B, 2>) -> Result<Tensor<B, 2>, ImageError> {
        let device = points.device();
        let inv_dir = self.direction.try_inverse().ok_or(ImageError::SingularDirection)?;

        // I = (P - O) @ T with T_rc = (D^-1)_cr / S_c
        let mut t_data = Vec::with_capacity(D * D);
        for r in 0..D {
            for c in 0..D {
                t_data.push((inv_dir[(c, r)] / self.spacing[c]) as f32);
            }
        }
        let t_tensor = Tensor::<B, 2>::from_data(TensorData::new(t_data, Shape::new([D, D])), &device);

        Ok((points - self.origin_row::<B>(&device)).matmul(t_tensor))
    }

    fn origin_row<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        let origin: Vec<f32> = self.origin.iter().map(|v| *v as f32).collect();
        Tensor::<B, 1>::from_data(TensorData::new(origin, Shape::new([D])), device).reshape([1, D])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::{rotation_z, Point3, Spacing3};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn oblique() -> ImageGeometry<3> {
        ImageGeometry::new(
            [10, 12, 14],
            Point3::new(-90.0, 126.0, -72.0),
            Spacing3::new(1.0, 2.0, 3.0),
            rotation_z(std::f64::consts::FRAC_PI_2),
        )
    }

    #[test]
    fn test_tensor_shape_is_reversed() {
        let geometry = ImageGeometry::<3>::with_dims([4, 5, 6]);
        assert_eq!(geometry.tensor_shape(), [6, 5, 4]);
        assert_eq!(geometry.num_voxels(), 120);
    }

    #[test]
    fn test_point_roundtrip() {
        let geometry = oblique();
        let index = Point3::new(1.5, 2.0, 7.25);
        let world = geometry.index_to_world(&index);
        let back = geometry.world_to_index(&world).unwrap();
        assert!((back - index).norm() < 1e-9);
    }

    #[test]
    fn test_index_to_world_applies_direction_after_spacing() {
        let geometry = oblique();
        // Axis i points along +y, axis j along -x.
        let world = geometry.index_to_world(&Point3::new(1.0, 1.0, 0.0));
        assert!((world - Point3::new(-92.0, 127.0, -72.0)).norm() < 1e-9);
    }

    #[test]
    fn test_tensor_matches_point_mapping() {
        let device = Default::default();
        let geometry = oblique();
        let indices = Tensor::<TestBackend, 2>::from_floats([[1.0, 1.0, 0.0], [3.0, 0.0, 2.0]], &device);

        let world = geometry.index_to_world_tensor(indices.clone());
        let values = world.clone().into_data().to_vec::<f32>().unwrap();
        let expected = geometry.index_to_world(&Point3::new(3.0, 0.0, 2.0));
        for c in 0..3 {
            assert!((values[3 + c] as f64 - expected[c]).abs() < 1e-4);
        }

        let back = geometry.world_to_index_tensor(world).unwrap();
        let back = back.into_data().to_vec::<f32>().unwrap();
        let original = indices.into_data().to_vec::<f32>().unwrap();
        for (a, b) in back.iter().zip(original.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_singular_direction() {
        let geometry = ImageGeometry::new([2, 2, 2], Point3::origin(), Spacing3::repeat(1.0), Direction::zeros());
        assert_eq!(geometry.world_to_index(&Point3::origin()), Err(ImageError::SingularDirection));
    }
}
