pub mod error;
pub mod spatial;
pub mod image;
pub mod transform;
pub mod filter;

pub use error::{ImageError, TransformError, Result};
pub use filter::{ClipToRangeFilter, ResampleImageFilter};
pub use image::{Image, ImageGeometry};
pub use spatial::{Point3, Vector3, Matrix3, Spacing3, Direction3};
pub use transform::{
    compose, decompose, flatten, CompositeTransform, Decomposition, RigidTransform,
    SimilarityTransform, SpatialTransform, Transform, TransformKind,
};
