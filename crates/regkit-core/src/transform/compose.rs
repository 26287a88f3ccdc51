//! Fold a chain of rigid transforms into one rigid transform.

use crate::error::{Result, TransformError};
use crate::spatial::{Matrix3, Point3, Vector3};
use super::rigid::RigidTransform;

/// Compose rigid transforms listed in reverse application order.
///
/// For `[T0, T1, ..., Tn-1]` the result maps `x` to `T0(T1(...Tn-1(x)))`:
/// the last element is applied first. Each member may carry its own center
/// of rotation; the result is expressed about the origin.
///
/// # Errors
/// [`TransformError::Composition`] if `transforms` is empty.
pub fn compose(transforms: &[RigidTransform]) -> Result<RigidTransform> {
    if transforms.is_empty() {
        return Err(TransformError::composition(
            "cannot compose an empty sequence of transforms",
        ));
    }

    // The accumulator is held about the origin; only R and t accumulate.
    let center = Point3::origin();
    let mut rotation = Matrix3::identity();
    let mut translation = Vector3::zeros();

    for current in transforms.iter().rev() {
        let r = current.rotation();
        let c = current.center().coords;
        translation = r * (translation + center.coords - c) + current.translation() + c - center.coords;
        rotation = r * rotation;
    }

    Ok(RigidTransform::new_unchecked(rotation, translation, center))
}
