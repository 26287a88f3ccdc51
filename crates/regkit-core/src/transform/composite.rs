//! Composite transform implementation.
//!
//! A composite holds an ordered list of transforms. Following the ITK
//! convention the list is a queue read back to front: for `[T0, T1, T2]`
//! a point is mapped as `T0(T1(T2(x)))`.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};
use crate::spatial::Point3;
use super::rigid::RigidTransform;
use super::similarity::SimilarityTransform;
use super::trait_::{SpatialTransform, Transform};

/// Any transform this crate can represent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransformKind {
    Rigid(RigidTransform),
    Similarity(SimilarityTransform),
    Composite(CompositeTransform),
}

impl TransformKind {
    /// Short name of the variant, for messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Rigid(_) => "rigid",
            Self::Similarity(_) => "similarity",
            Self::Composite(_) => "composite",
        }
    }

    pub fn as_rigid(&self) -> Option<&RigidTransform> {
        match self {
            Self::Rigid(rigid) => Some(rigid),
            _ => None,
        }
    }

    pub fn as_similarity(&self) -> Option<&SimilarityTransform> {
        match self {
            Self::Similarity(similarity) => Some(similarity),
            _ => None,
        }
    }

    pub fn as_composite(&self) -> Option<&CompositeTransform> {
        match self {
            Self::Composite(composite) => Some(composite),
            _ => None,
        }
    }
}

impl From<RigidTransform> for TransformKind {
    fn from(rigid: RigidTransform) -> Self {
        Self::Rigid(rigid)
    }
}

impl From<SimilarityTransform> for TransformKind {
    fn from(similarity: SimilarityTransform) -> Self {
        Self::Similarity(similarity)
    }
}

impl From<CompositeTransform> for TransformKind {
    fn from(composite: CompositeTransform) -> Self {
        Self::Composite(composite)
    }
}

impl SpatialTransform for TransformKind {
    fn transform_point(&self, point: &Point3) -> Point3 {
        match self {
            Self::Rigid(t) => t.transform_point(point),
            Self::Similarity(t) => t.transform_point(point),
            Self::Composite(t) => t.transform_point(point),
        }
    }
}

impl<B: Backend> Transform<B, 3> for TransformKind {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        match self {
            Self::Rigid(t) => Transform::<B, 3>::transform_points(t, points),
            Self::Similarity(t) => Transform::<B, 3>::transform_points(t, points),
            Self::Composite(t) => Transform::<B, 3>::transform_points(t, points),
        }
    }
}

/// Ordered wrapper around one or more transforms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositeTransform {
    transforms: Vec<TransformKind>,
}

impl CompositeTransform {
    /// Create an empty composite.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a composite from transforms listed last-applied first.
    pub fn from_transforms(transforms: Vec<TransformKind>) -> Self {
        Self { transforms }
    }

    /// Append a transform. It becomes the first one applied to a point.
    pub fn push(&mut self, transform: impl Into<TransformKind>) {
        self.transforms.push(transform.into());
    }

    /// Number of direct members (nested composites count once).
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// The n-th member, counting from the last-applied transform.
    pub fn nth(&self, n: usize) -> Option<&TransformKind> {
        self.transforms.get(n)
    }

    pub fn transforms(&self) -> &[TransformKind] {
        &self.transforms
    }

    /// Copy of this composite with nested composites spliced in place, so
    /// that no member is itself a composite. The mapping is unchanged.
    pub fn flattened(&self) -> Self {
        let mut transforms = Vec::with_capacity(self.transforms.len());
        splice_into(&self.transforms, &mut transforms);
        Self { transforms }
    }
}

fn splice_into(members: &[TransformKind], out: &mut Vec<TransformKind>) {
    for member in members {
        match member {
            TransformKind::Composite(inner) => splice_into(&inner.transforms, out),
            other => out.push(other.clone()),
        }
    }
}

impl SpatialTransform for CompositeTransform {
    fn transform_point(&self, point: &Point3) -> Point3 {
        self.transforms
            .iter()
            .rev()
            .fold(*point, |p, t| t.transform_point(&p))
    }
}

impl<B: Backend> Transform<B, 3> for CompositeTransform {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        self.transforms
            .iter()
            .rev()
            .fold(points, |p, t| Transform::<B, 3>::transform_points(t, p))
    }
}
