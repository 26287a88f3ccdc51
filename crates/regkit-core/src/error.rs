//! Error types for transform algebra and image operations.

use thiserror::Error;

/// Errors raised while building, decomposing, composing or flattening transforms.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    /// A similarity transform could not be split into scale and rigid parts.
    #[error("Decomposition error: {0}")]
    Decomposition(String),

    /// A sequence of rigid transforms could not be composed.
    #[error("Composition error: {0}")]
    Composition(String),

    /// A composite transform does not reduce to exactly one rigid transform.
    #[error("Malformed composite transform: {0}")]
    MalformedComposite(String),

    /// A matrix offered as a rotation is not a proper rotation.
    #[error("Invalid rotation: {0}")]
    InvalidRotation(String),

    /// A scale component is zero or not finite.
    #[error("Non-invertible scale: {0}")]
    NonInvertibleScale(String),

    /// The requested result exists but has no representation in this model.
    #[error("Unrepresentable transform: {0}")]
    Unrepresentable(String),
}

/// Result type for transform operations.
pub type Result<T> = std::result::Result<T, TransformError>;

impl TransformError {
    /// Create a decomposition error.
    pub fn decomposition(msg: impl Into<String>) -> Self {
        Self::Decomposition(msg.into())
    }

    /// Create a composition error.
    pub fn composition(msg: impl Into<String>) -> Self {
        Self::Composition(msg.into())
    }

    /// Create a malformed composite error.
    pub fn malformed_composite(msg: impl Into<String>) -> Self {
        Self::MalformedComposite(msg.into())
    }

    /// Create an invalid rotation error.
    pub fn invalid_rotation(msg: impl Into<String>) -> Self {
        Self::InvalidRotation(msg.into())
    }

    /// Create a non-invertible scale error.
    pub fn non_invertible_scale(msg: impl Into<String>) -> Self {
        Self::NonInvertibleScale(msg.into())
    }

    /// Create an unrepresentable transform error.
    pub fn unrepresentable(msg: impl Into<String>) -> Self {
        Self::Unrepresentable(msg.into())
    }
}

/// Errors raised by image filters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImageError {
    /// Tensor data could not be read back as `f32`.
    #[error("Tensor data error: {0}")]
    TensorData(String),

    /// The image holds no voxels.
    #[error("Image is empty")]
    Empty,

    /// The direction matrix has no inverse.
    #[error("Direction matrix is singular")]
    SingularDirection,

    /// A clip range whose lower bound exceeds its upper bound.
    #[error("Invalid intensity range [{min}, {max}]")]
    InvalidRange { min: f64, max: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = TransformError::composition("empty");
        assert!(matches!(err, TransformError::Composition(_)));
    }

    #[test]
    fn test_error_display() {
        let err = TransformError::malformed_composite("found 2 transforms");
        assert_eq!(err.to_string(), "Malformed composite transform: found 2 transforms");

        let err = TransformError::decomposition("scale[1] is zero");
        assert_eq!(err.to_string(), "Decomposition error: scale[1] is zero");
    }
}
