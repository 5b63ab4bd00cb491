use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SyncError;

pub type EntityId = Uuid;

/// Trusted identity of the user that owns a record. Resolved upstream of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for OwnerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A stored record as seen by the sync engine. Kind-specific fields live in `payload`
/// and are flattened into the wire representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity<P> {
    pub id: EntityId,
    pub owner_id: OwnerId,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: P,
}

impl<P> Entity<P> {
    pub fn new(id: EntityId, owner_id: OwnerId, updated_at: DateTime<Utc>, payload: P) -> Self {
        Self {
            id,
            owner_id,
            updated_at,
            payload,
        }
    }

    pub fn is_owned_by(&self, owner: &OwnerId) -> bool {
        &self.owner_id == owner
    }
}

/// What a client believes about one entity it has cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientKnownItem {
    pub id: EntityId,
    pub updated_at: DateTime<Utc>,
}

impl ClientKnownItem {
    pub fn new(id: EntityId, updated_at: DateTime<Utc>) -> Self {
        Self { id, updated_at }
    }
}

/// Reject known-item lists that repeat an id. The engine treats that as a client bug
/// and refuses to open the session.
pub fn validate_known(known: &[ClientKnownItem]) -> Result<(), SyncError> {
    let mut seen = HashSet::with_capacity(known.len());
    for item in known {
        if !seen.insert(item.id) {
            return Err(SyncError::InvalidInput(format!(
                "known items list contains id {} more than once",
                item.id
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Connection,
    ChatThread,
    ChatMessage,
    SavedQuery,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Connection,
        EntityKind::ChatThread,
        EntityKind::ChatMessage,
        EntityKind::SavedQuery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Connection => "connection",
            EntityKind::ChatThread => "chat_thread",
            EntityKind::ChatMessage => "chat_message",
            EntityKind::SavedQuery => "saved_query",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "connection" => Ok(EntityKind::Connection),
            "chat_thread" => Ok(EntityKind::ChatThread),
            "chat_message" => Ok(EntityKind::ChatMessage),
            "saved_query" => Ok(EntityKind::SavedQuery),
            other => Err(SyncError::UnknownKind(other.to_string())),
        }
    }
}
