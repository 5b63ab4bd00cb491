use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::entity::{Entity, EntityId, EntityKind, OwnerId};

/// Per-kind access to the record store. Every read is scoped to one owner.
///
/// The engine never assumes an adapter filtered correctly: ownership and the
/// update threshold are re-checked on whatever comes back.
#[async_trait]
pub trait EntityAdapter: Send + Sync + 'static {
    type Payload: Clone + Send + Sync + Serialize + 'static;

    fn kind(&self) -> EntityKind;

    /// Every entity owned by `owner`.
    async fn fetch_by_owner(&self, owner: &OwnerId) -> Result<Vec<Entity<Self::Payload>>>;

    /// The subset of `ids` that still exist for `owner`.
    async fn fetch_existing_ids(&self, owner: &OwnerId, ids: &[EntityId]) -> Result<Vec<EntityId>>;

    /// Entities among `thresholds` whose `updated_at` is strictly past the paired threshold.
    async fn fetch_updated_since(
        &self,
        owner: &OwnerId,
        thresholds: &[(EntityId, DateTime<Utc>)],
    ) -> Result<Vec<Entity<Self::Payload>>>;

    /// Wire form of one entity. Kinds that redact or decrypt fields override this.
    fn serialize(&self, entity: &Entity<Self::Payload>) -> Result<Value> {
        Ok(serde_json::to_value(entity)?)
    }
}

/// Create/update/delete paths for a kind. Implementations publish a change event
/// as part of the write: no other mutation of the kind may commit between a write
/// and its publish, and events are never buffered or delayed.
#[async_trait]
pub trait MutationEmitter: EntityAdapter {
    /// Returns `None` when `id` is already taken.
    async fn insert(
        &self,
        owner: &OwnerId,
        id: EntityId,
        payload: Self::Payload,
    ) -> Result<Option<Entity<Self::Payload>>>;

    /// Returns `None` when `owner` has no entity with `id`.
    async fn update(
        &self,
        owner: &OwnerId,
        id: EntityId,
        payload: Self::Payload,
    ) -> Result<Option<Entity<Self::Payload>>>;

    async fn delete(&self, owner: &OwnerId, id: EntityId) -> Result<bool>;
}
