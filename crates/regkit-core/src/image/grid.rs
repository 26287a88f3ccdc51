use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor, TensorData};

/// Generate the continuous indices of every voxel of a 3D grid.
///
/// Returns a `[N, 3]` tensor of `(i, j, k)` rows in tensor storage order,
/// so that row `n` addresses element `n` of a `[k, j, i]` tensor reshaped
/// to one dimension.
///
/// # Arguments
/// * `dims` - Grid size in file axis order `(i, j, k)`
/// * `device` - The device to create the tensor on
pub fn generate_grid_3d<B: Backend>(dims: [usize; 3], device: &B::Device) -> Tensor<B, 2> {
    let [ni, nj, nk] = dims;
    let total = ni * nj * nk;

    let mut grid = Vec::with_capacity(total * 3);
    for k in 0..nk {
        for j in 0..nj {
            for i in 0..ni {
                grid.push(i as f32);
                grid.push(j as f32);
                grid.push(k as f32);
            }
        }
    }

    Tensor::<B, 1>::from_data(TensorData::new(grid, Shape::new([total * 3])), device).reshape([total, 3])
}
