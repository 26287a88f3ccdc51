//! Transform types and operations.
//!
//! This module provides the rigid, similarity and composite transforms that
//! flow between registration stages, plus the algebra that splits, folds and
//! unwraps them.

pub mod trait_;
pub mod rigid;
pub mod similarity;
pub mod composite;
pub mod decompose;
pub mod compose;
pub mod flatten;

pub use trait_::{SpatialTransform, Transform};
pub use rigid::RigidTransform;
pub use similarity::SimilarityTransform;
pub use composite::{CompositeTransform, TransformKind};
pub use decompose::{decompose, Decomposition};
pub use compose::compose;
pub use flatten::flatten;
