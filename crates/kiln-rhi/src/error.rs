use crate::resource::TextureDimension;

/// Errors reported by the resource, copy, compute and presentation layers.
///
/// Construction failures are keyed by the kind of object being built so callers can tell a
/// rejected buffer from a rejected heap; bounds and argument problems share [`RhiError::Value`].
#[derive(Debug, thiserror::Error)]
pub enum RhiError {
    #[error("buffer error: {0}")]
    Buffer(String),

    #[error("{dimension} error: {reason}")]
    Texture {
        dimension: TextureDimension,
        reason: String,
    },

    #[error("heap error: {0}")]
    Heap(String),

    #[error("sampler error: {0}")]
    Sampler(String),

    #[error("{0}")]
    Value(String),

    #[error("{what} belongs to device {found} but the operation targets device {expected}")]
    DeviceMismatch {
        what: &'static str,
        expected: String,
        found: String,
    },

    #[error("device index {index} out of range ({count} devices discovered)")]
    DeviceIndex { index: usize, count: usize },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("shader error: {0}")]
    Shader(String),

    #[error("swapchain error: {0}")]
    Swapchain(String),

    #[error("device lost")]
    DeviceLost,

    #[error("backend error: {0}")]
    Backend(String),
}

impl RhiError {
    pub(crate) fn texture(dimension: TextureDimension, reason: impl Into<String>) -> Self {
        Self::Texture {
            dimension,
            reason: reason.into(),
        }
    }

    /// Whether the error reports a missing backend capability rather than a caller mistake.
    ///
    /// Capability-gated code paths (sparse residency, bindless tables, push constants) use this
    /// to fall back or skip.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }

    pub fn is_device_mismatch(&self) -> bool {
        matches!(self, Self::DeviceMismatch { .. })
    }
}

pub type Result<T, E = RhiError> = std::result::Result<T, E>;
