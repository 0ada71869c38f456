//! Signaling errors

use thiserror::Error;

/// Signaling result type
pub type Result<T> = std::result::Result<T, SignalingError>;

#[derive(Error, Debug, Clone)]
pub enum SignalingError {
    /// A create/patch/remove against the store failed. The code is the
    /// provider's opaque error code; the core never retries.
    #[error("store write failed ({code}): {reason}")]
    StoreWrite { code: i64, reason: String },

    /// A delivered document did not parse into a CallRecord. The delivery
    /// is dropped and the call stays in its prior known state.
    #[error("malformed call record: {0}")]
    MalformedRecord(String),

    /// A local action was invoked while not idle, or while not a valid
    /// role for that action. Rejected before any write is attempted.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// A local action was invoked with no signed-in identity.
    #[error("not signed in")]
    NotSignedIn,
}

impl SignalingError {
    pub fn store_write(reason: impl Into<String>) -> Self {
        SignalingError::StoreWrite {
            code: -1000,
            reason: reason.into(),
        }
    }

    pub fn precondition(reason: impl Into<String>) -> Self {
        SignalingError::Precondition(reason.into())
    }
}
