//! Image types and operations.
//!
//! This module provides the Image type and the header-level
//! [`ImageGeometry`] that places a voxel grid in physical space.

pub mod geometry;
pub mod grid;
pub mod image;

pub use geometry::ImageGeometry;
pub use grid::generate_grid_3d;
pub use image::Image;
