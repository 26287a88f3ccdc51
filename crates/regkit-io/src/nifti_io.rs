//! NIfTI-1 volume I/O.
//!
//! Physical coordinates follow the ITK convention (LPS): the NIfTI affine is
//! RAS, so the first two rows are negated on read and again on write. This
//! keeps image geometry consistent with ITK transform files.

use anyhow::{bail, Context, Result};
use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor, TensorData};
use nalgebra::Matrix3;
use ndarray::{Array3, ArrayD, Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use regkit_core::image::{Image, ImageGeometry};
use regkit_core::spatial::{Direction3, Point3, Spacing3, Vector3};
use std::path::Path;

const RAS_TO_LPS: [f64; 3] = [-1.0, -1.0, 1.0];

/// Read a 3D NIfTI volume as an `f32` image.
///
/// Trailing singleton dimensions are dropped; a 4D series keeps its first volume.
pub fn read_nifti<B: Backend, P: AsRef<Path>>(path: P, device: &B::Device) -> Result<Image<B, 3>> {
    let path = path.as_ref();
    let obj = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("Failed to read NIfTI file {}", path.display()))?;
    let geometry = header_geometry(obj.header())?;

    let volume: ArrayD<f32> = obj
        .into_volume()
        .into_ndarray::<f32>()
        .context("Failed to convert volume to ndarray")?;
    let volume = squeeze_to_3d(volume)?;
    let (nx, ny, nz) = volume.dim();

    // Tensor layout is [k, j, i]: i varies fastest.
    let mut values = Vec::with_capacity(nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                values.push(volume[[i, j, k]]);
            }
        }
    }

    let data = Tensor::<B, 3>::from_data(TensorData::new(values, Shape::new([nz, ny, nx])), device);
    tracing::debug!(path = %path.display(), dims = ?geometry.dims(), "read NIfTI volume");
    Ok(Image::from_geometry(data, &geometry))
}

/// Read the header of a NIfTI file.
pub fn read_nifti_header<P: AsRef<Path>>(path: P) -> Result<NiftiHeader> {
    let path = path.as_ref();
    NiftiHeader::from_file(path).with_context(|| format!("Failed to read NIfTI header {}", path.display()))
}

/// Read only the grid geometry of a NIfTI file.
pub fn read_nifti_geometry<P: AsRef<Path>>(path: P) -> Result<ImageGeometry<3>> {
    header_geometry(&read_nifti_header(path)?)
}

/// Write an image as a `float32` NIfTI volume.
///
/// The header is built from the image geometry (sform, scanner anatomical).
/// A `.gz` suffix selects gzip compression.
pub fn write_nifti<B: Backend, P: AsRef<Path>>(path: P, image: &Image<B, 3>) -> Result<()> {
    write_nifti_like(path, image, &geometry_header(&image.geometry()))
}

/// Write an image reusing every header field of `reference` except the
/// dimensions and the data type.
pub fn write_nifti_like<B: Backend, P: AsRef<Path>>(path: P, image: &Image<B, 3>, reference: &NiftiHeader) -> Result<()> {
    let path = path.as_ref();
    let [nx, ny, nz] = image.geometry().dims();
    let values = image
        .data()
        .to_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("Failed to get tensor data: {:?}", e))?;

    let array = Array3::from_shape_fn((nx, ny, nz), |(i, j, k)| values[(k * ny + j) * nx + i]);

    WriterOptions::new(path)
        .reference_header(reference)
        .write_nifti(&array)
        .with_context(|| format!("Failed to write NIfTI file {}", path.display()))?;

    tracing::debug!(path = %path.display(), dims = ?[nx, ny, nz], "wrote NIfTI volume");
    Ok(())
}

/// Grid geometry described by a NIfTI header, in LPS physical space.
pub fn header_geometry(header: &NiftiHeader) -> Result<ImageGeometry<3>> {
    let ndim = header.dim[0] as usize;
    if !(3..=7).contains(&ndim) {
        bail!("Expected a 3D NIfTI volume, found {} dimensions", ndim);
    }
    if header.dim[4..=ndim.max(3)].iter().any(|&d| d > 1) {
        tracing::warn!(dim = ?header.dim, "NIfTI file has more than three dimensions; using the first volume");
    }
    let dims = [header.dim[1] as usize, header.dim[2] as usize, header.dim[3] as usize];

    let affine = header_affine(header);

    // Columns of the affine are the axis directions scaled by spacing.
    // Spacing itself comes from pixdim when set.
    let linear = Matrix3::from_fn(|r, c| affine[r][c] * RAS_TO_LPS[r]);
    let origin = Point3::new(
        affine[0][3] * RAS_TO_LPS[0],
        affine[1][3] * RAS_TO_LPS[1],
        affine[2][3] * RAS_TO_LPS[2],
    );

    let unit_axes = [Vector3::x(), Vector3::y(), Vector3::z()];
    let mut spacing = Spacing3::zeros();
    let mut columns = unit_axes;
    for c in 0..3 {
        let column = linear.column(c).into_owned();
        let norm = column.norm();
        if norm > 1e-9 {
            columns[c] = column / norm;
        }
        let pixdim = header.pixdim[c + 1] as f64;
        spacing[c] = if pixdim > 0.0 {
            pixdim
        } else if norm > 1e-9 {
            norm
        } else {
            1.0
        };
    }
    let direction = Direction3::from_columns(&columns);

    Ok(ImageGeometry::new(dims, origin, spacing, direction))
}

/// Header describing `geometry` with an sform.
pub fn geometry_header(geometry: &ImageGeometry<3>) -> NiftiHeader {
    let linear = geometry.direction() * Matrix3::from_diagonal(geometry.spacing());
    let origin = geometry.origin();
    let row = |r: usize| -> [f32; 4] {
        let sign = RAS_TO_LPS[r];
        [
            (linear[(r, 0)] * sign) as f32,
            (linear[(r, 1)] * sign) as f32,
            (linear[(r, 2)] * sign) as f32,
            (origin[r] * sign) as f32,
        ]
    };
    let spacing = geometry.spacing();

    NiftiHeader {
        pixdim: [
            1.0,
            spacing[0] as f32,
            spacing[1] as f32,
            spacing[2] as f32,
            1.0,
            1.0,
            1.0,
            1.0,
        ],
        sform_code: 1,
        qform_code: 0,
        srow_x: row(0),
        srow_y: row(1),
        srow_z: row(2),
        ..NiftiHeader::default()
    }
}

/// 3x4 voxel-to-RAS affine: sform if set, else qform, else pixdim scaling.
fn header_affine(header: &NiftiHeader) -> [[f64; 4]; 3] {
    let widen = |row: [f32; 4]| row.map(f64::from);
    if header.sform_code > 0 {
        return [widen(header.srow_x), widen(header.srow_y), widen(header.srow_z)];
    }

    let dx = header.pixdim[1] as f64;
    let dy = header.pixdim[2] as f64;
    let dz = header.pixdim[3] as f64;

    if header.qform_code > 0 {
        // Quaternion form, see the NIfTI-1 standard.
        let b = header.quatern_b as f64;
        let c = header.quatern_c as f64;
        let d = header.quatern_d as f64;
        let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();
        let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let dz = dz * qfac;

        return [
            [
                (a * a + b * b - c * c - d * d) * dx,
                (2.0 * b * c - 2.0 * a * d) * dy,
                (2.0 * b * d + 2.0 * a * c) * dz,
                header.quatern_x as f64,
            ],
            [
                (2.0 * b * c + 2.0 * a * d) * dx,
                (a * a + c * c - b * b - d * d) * dy,
                (2.0 * c * d - 2.0 * a * b) * dz,
                header.quatern_y as f64,
            ],
            [
                (2.0 * b * d - 2.0 * a * c) * dx,
                (2.0 * c * d + 2.0 * a * b) * dy,
                (a * a + d * d - c * c - b * b) * dz,
                header.quatern_z as f64,
            ],
        ];
    }

    [[dx, 0.0, 0.0, 0.0], [0.0, dy, 0.0, 0.0], [0.0, 0.0, dz, 0.0]]
}

fn squeeze_to_3d(mut volume: ArrayD<f32>) -> Result<Array3<f32>> {
    if volume.ndim() < 3 {
        bail!("Expected a 3D volume, found {} dimensions", volume.ndim());
    }
    while volume.ndim() > 3 {
        let last = volume.ndim() - 1;
        volume = volume.index_axis_move(Axis(last), 0);
    }
    volume
        .into_dimensionality::<Ix3>()
        .context("Failed to view volume as 3D")
}
