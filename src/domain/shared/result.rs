//! Signaling result type

use super::error::SignalingError;

/// Standard result type for signaling operations
pub type Result<T> = std::result::Result<T, SignalingError>;
