use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::EntityId;

/// A record on the session stream.
///
/// Exactly one `Sync` frame opens every session; it carries the reconciliation
/// batch as nested insert/update/delete records. Live frames follow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Frame {
    Sync(Vec<Frame>),
    Insert(Value),
    Update(Value),
    Delete(EntityId),
}

impl Frame {
    pub fn frame_type(&self) -> &'static str {
        match self {
            Frame::Sync(_) => "sync",
            Frame::Insert(_) => "insert",
            Frame::Update(_) => "update",
            Frame::Delete(_) => "delete",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
