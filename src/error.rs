use thiserror::Error;

use crate::encoding::DecodeError;
use crate::registry::ConnectionId;

/// Failure while handling traffic for a single connection. Any of these
/// closes the offending connection and nothing else.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Malformed(#[from] DecodeError),
    #[error("invalid document update: {0}")]
    InvalidUpdate(String),
    #[error("invalid state vector: {0}")]
    InvalidStateVector(String),
    #[error("failed to merge update: {0}")]
    Merge(String),
    #[error("connection {0} is not attached")]
    NotAttached(ConnectionId),
}

impl SyncError {
    /// Whether the peer sent bytes we could not parse, as opposed to bytes
    /// the CRDT refused.
    pub fn is_malformed(&self) -> bool {
        matches!(self, SyncError::Malformed(_) | SyncError::InvalidUpdate(_) | SyncError::InvalidStateVector(_))
    }
}
