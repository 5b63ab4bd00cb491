use thiserror::Error;

use crate::entity::{EntityId, EntityKind};

#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed request; the session is never opened.
    #[error("invalid sync request: {0}")]
    InvalidInput(String),

    #[error("unknown entity kind: {0}")]
    UnknownKind(String),

    #[error("no mutation emitter registered for {0}")]
    MutationsDisabled(EntityKind),

    /// Transient record store failure. No partial batch is ever emitted.
    #[error("record store unavailable: {0:#}")]
    StoreUnavailable(anyhow::Error),

    #[error("entity {0} not found")]
    NotFound(EntityId),

    #[error("failed to encode entity: {0}")]
    Encode(String),

    #[error("session closed")]
    Closed,
}

impl SyncError {
    pub fn store(err: anyhow::Error) -> Self {
        SyncError::StoreUnavailable(err)
    }
}
