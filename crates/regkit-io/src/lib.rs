pub mod nifti_io;
pub mod transform_file;

pub use nifti_io::{
    geometry_header, header_geometry, read_nifti, read_nifti_geometry, read_nifti_header, write_nifti,
    write_nifti_like,
};
pub use transform_file::{
    read_composite_transform, read_rigid_transform, read_similarity_transform, read_transform, write_transform,
    TransformFileError, TransformFileFormat,
};
