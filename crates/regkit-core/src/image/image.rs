//! Image type with physical metadata and coordinate transformations.
//!
//! An [`Image`] pairs a burn tensor with the origin, spacing and direction
//! that place its voxels in physical space. Tensor axes are stored in
//! reverse file order (`[k, j, i]` for a 3D volume) while every per-axis
//! geometric quantity, and every continuous index, is in file order.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use crate::error::ImageError;
use crate::spatial::{Direction, Point, Spacing};
use super::geometry::ImageGeometry;

/// Medical image with physical metadata.
///
/// # Type Parameters
/// * `B` - The backend for tensor operations
/// * `D` - The dimensionality of the image
///
/// # Examples
/// ```rust
/// use regkit_core::Image;
/// use regkit_core::spatial::{Point3, Spacing3, Direction3};
/// use burn::tensor::Tensor;
/// use burn_ndarray::NdArray;
///
/// type Backend = NdArray<f32>;
///
/// let device = Default::default();
/// let data = Tensor::<Backend, 3>::zeros([10, 10, 10], &device);
/// let image = Image::new(data, Point3::origin(), Spacing3::repeat(1.0), Direction3::identity());
/// assert_eq!(image.geometry().dims(), [10, 10, 10]);
/// ```
#[derive(Debug, Clone)]
pub struct Image<B: Backend, const D: usize> {
    /// The voxel data.
    data: Tensor<B, D>,
    /// Physical coordinate of the first voxel (index 0,0,0).
    origin: Point<D>,
    /// Physical distance between voxels along each axis.
    spacing: Spacing<D>,
    /// Orientation of the image axes.
    direction: Direction<D>,
}

impl<B: Backend, const D: usize> Image<B, D> {
    /// Create a new image with the given data and metadata.
    pub fn new(data: Tensor<B, D>, origin: Point<D>, spacing: Spacing<D>, direction: Direction<D>) -> Self {
        Self {
            data,
            origin,
            spacing,
            direction,
        }
    }

    /// Create an image whose placement is taken from `geometry`.
    ///
    /// The tensor shape is expected to be `geometry.tensor_shape()`.
    pub fn from_geometry(data: Tensor<B, D>, geometry: &ImageGeometry<D>) -> Self {
        Self::new(data, *geometry.origin(), *geometry.spacing(), *geometry.direction())
    }

    pub fn data(&self) -> &Tensor<B, D> {
        &self.data
    }

    pub fn into_data(self) -> Tensor<B, D> {
        self.data
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

    /// Tensor shape (`[k, j, i]` for a volume).
    pub fn shape(&self) -> [usize; D] {
        self.data.dims()
    }

    /// Header geometry, with dims in file axis order.
    pub fn geometry(&self) -> ImageGeometry<D> {
        let mut dims = self.shape();
        dims.reverse();
        ImageGeometry::new(dims, self.origin, self.spacing, self.direction)
    }

    /// Replace the voxel data, keeping the physical placement.
    pub fn with_data(&self, data: Tensor<B, D>) -> Self {
        Self::new(data, self.origin, self.spacing, self.direction)
    }

    /// Smallest and largest voxel value.
    ///
    /// # Errors
    /// [`ImageError::Empty`] for an image without voxels.
    pub fn intensity_range(&self) -> Result<(f64, f64), ImageError> {
        let values = self
            .data
            .to_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| ImageError::TensorData(format!("{e:?}")))?;

        values
            .iter()
            .fold(None, |range: Option<(f32, f32)>, &v| match range {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
            .map(|(lo, hi)| (lo as f64, hi as f64))
            .ok_or(ImageError::Empty)
    }

    /// Convert a continuous physical point to a continuous index.
    pub fn transform_physical_point_to_continuous_index(&self, point: &Point<D>) -> Result<Point<D>, ImageError> {
        self.geometry().world_to_index(point)
    }

    /// Convert a continuous index to a physical point.
    pub fn transform_continuous_index_to_physical_point(&self, index: &Point<D>) -> Point<D> {
        self.geometry().index_to_world(index)
    }

    /// Batch transform physical points (`[Batch, D]`) to continuous indices.
    pub fn world_to_index_tensor(&self, points: Tensor<B, 2>) -> Result<Tensor<B, 2>, ImageError> {
        self.geometry().world_to_index_tensor(points)
    }

    /// Batch transform continuous indices (`[Batch, D]`) to physical points.
    pub fn index_to_world_tensor(&self, indices: Tensor<B, 2>) -> Tensor<B, 2> {
        self.geometry().index_to_world_tensor(indices)
    }
}
