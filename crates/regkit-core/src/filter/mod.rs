pub mod clip;
pub mod resample;

pub use clip::ClipToRangeFilter;
pub use resample::ResampleImageFilter;
