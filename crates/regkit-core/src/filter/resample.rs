//! Resample image filter.
//!
//! Resamples an image onto a reference grid through a transform, with
//! nearest-neighbour sampling. The transform maps output physical points to
//! input physical points, so `output(p) = input(T(p))`.
//!
//! This is the in-process reference resampler. Registration runs resample
//! through an external tool; this filter reproduces the same mapping without
//! one, so transform files written by the pipeline can be checked against
//! real voxel data (the registration crate's pipeline tests resample with it).

use std::marker::PhantomData;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use crate::error::ImageError;
use crate::image::{generate_grid_3d, Image, ImageGeometry};
use crate::transform::Transform;

/// Nearest-neighbour resample filter.
///
/// # Type Parameters
/// * `B` - The Burn backend
/// * `T` - Transform from output space to input space
pub struct ResampleImageFilter<B, T>
where
    B: Backend,
    T: Transform<B, 3>,
{
    reference: ImageGeometry<3>,
    transform: T,
    default_pixel_value: f64,
    _phantom: PhantomData<B>,
}

impl<B, T> ResampleImageFilter<B, T>
where
    B: Backend,
    T: Transform<B, 3>,
{
    /// Create a new resample filter.
    ///
    /// # Arguments
    /// * `reference` - Output grid
    /// * `transform` - Transform from output space to input space
    pub fn new(reference: ImageGeometry<3>, transform: T) -> Self {
        Self {
            reference,
            transform,
            default_pixel_value: 0.0,
            _phantom: PhantomData,
        }
    }

    /// Set the value written where the transformed point falls outside the input.
    pub fn with_default_pixel_value(mut self, value: f64) -> Self {
        self.default_pixel_value = value;
        self
    }

    /// Apply the filter to an input image.
    pub fn apply(&self, input: &Image<B, 3>) -> Result<Image<B, 3>, ImageError> {
        let device = input.data().device();
        let [ni, nj, nk] = input.geometry().dims();
        if ni * nj * nk == 0 {
            return Err(ImageError::Empty);
        }

        // 1. Output voxel indices -> output physical points -> input physical points
        let output_indices = generate_grid_3d::<B>(self.reference.dims(), &device);
        let output_points = self.reference.index_to_world_tensor(output_indices);
        let input_points = self.transform.transform_points(output_points);

        // 2. Input physical points -> rounded input indices
        let input_indices = input.world_to_index_tensor(input_points)?.round();
        let n = input_indices.dims()[0];
        let i = input_indices.clone().slice([0..n, 0..1]).squeeze::<1>(1);
        let j = input_indices.clone().slice([0..n, 1..2]).squeeze::<1>(1);
        let k = input_indices.slice([0..n, 2..3]).squeeze::<1>(1);

        // 3. Inside-field mask, 1.0 where every rounded index is on the grid
        let inside = axis_mask(i.clone(), ni) * axis_mask(j.clone(), nj) * axis_mask(k.clone(), nk);

        // 4. Gather from the flattened [k, j, i] tensor
        let flat_index: Tensor<B, 1, Int> = clamp_axis(k, nk) * (ni * nj) as i32
            + clamp_axis(j, nj) * ni as i32
            + clamp_axis(i, ni);
        let flat_data = input.data().clone().reshape([ni * nj * nk]);
        let gathered = flat_data.gather(0, flat_index);

        let outside = inside.clone().neg().add_scalar(1.0);
        let values = gathered * inside + outside.mul_scalar(self.default_pixel_value);

        let data = values.reshape(self.reference.tensor_shape());
        Ok(Image::from_geometry(data, &self.reference))
    }
}

fn axis_mask<B: Backend>(index: Tensor<B, 1>, size: usize) -> Tensor<B, 1> {
    let low = index.clone().greater_equal_elem(0.0).float();
    let high = index.lower_equal_elem((size - 1) as f64).float();
    low * high
}

fn clamp_axis<B: Backend>(index: Tensor<B, 1>, size: usize) -> Tensor<B, 1, Int> {
    index.clamp(0.0, (size - 1) as f64).int()
}
