//! Unwrap the single rigid transform held by a composite.

use crate::error::{Result, TransformError};
use super::composite::{CompositeTransform, TransformKind};
use super::rigid::RigidTransform;

/// Extract the only transform of `composite`, which must be rigid.
///
/// Nested composites are flattened first.
///
/// # Errors
/// [`TransformError::MalformedComposite`] if the flattened composite does not
/// hold exactly one member or if that member is not a rigid transform.
pub fn flatten(composite: &CompositeTransform) -> Result<RigidTransform> {
    let flat = composite.flattened();
    match flat.transforms() {
        [TransformKind::Rigid(rigid)] => Ok(*rigid),
        [other] => Err(TransformError::malformed_composite(format!(
            "expected a rigid transform, found a {} transform",
            other.kind_name()
        ))),
        members => Err(TransformError::malformed_composite(format!(
            "expected exactly one transform after flattening, found {}",
            members.len()
        ))),
    }
}
