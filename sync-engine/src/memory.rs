use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::adapter::{EntityAdapter, MutationEmitter};
use crate::entity::{Entity, EntityId, EntityKind, OwnerId};
use crate::publisher::{ChangeEvent, ChangePublisher};

/// Record store held in process memory. Mutations publish to the injected
/// publisher before the write lock is released, so events leave in commit order.
pub struct MemoryStore<P> {
    kind: EntityKind,
    records: RwLock<HashMap<EntityId, Entity<P>>>,
    publisher: ChangePublisher<P>,
}

impl<P> MemoryStore<P>
where
    P: Clone + Send + Sync + Serialize + 'static,
{
    pub fn new(kind: EntityKind, publisher: ChangePublisher<P>) -> Self {
        Self {
            kind,
            records: RwLock::new(HashMap::new()),
            publisher,
        }
    }

    /// Store an entity as-is without publishing. Useful to preload state.
    pub async fn seed(&self, entity: Entity<P>) {
        self.records.write().await.insert(entity.id, entity);
    }

    /// Remove an entity without publishing, as if deleted by another instance.
    pub async fn forget(&self, id: EntityId) -> Option<Entity<P>> {
        self.records.write().await.remove(&id)
    }

    pub async fn get(&self, id: EntityId) -> Option<Entity<P>> {
        self.records.read().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

/// Wall-clock time, nudged forward so a record's timestamp strictly increases.
pub fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(prev) if prev >= now => prev + Duration::milliseconds(1),
        _ => now,
    }
}

#[async_trait]
impl<P> EntityAdapter for MemoryStore<P>
where
    P: Clone + Send + Sync + Serialize + 'static,
{
    type Payload = P;

    fn kind(&self) -> EntityKind {
        self.kind
    }

    async fn fetch_by_owner(&self, owner: &OwnerId) -> Result<Vec<Entity<P>>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|entity| entity.is_owned_by(owner))
            .cloned()
            .collect())
    }

    async fn fetch_existing_ids(&self, owner: &OwnerId, ids: &[EntityId]) -> Result<Vec<EntityId>> {
        let records = self.records.read().await;
        Ok(ids
            .iter()
            .filter(|id| {
                records
                    .get(id)
                    .is_some_and(|entity| entity.is_owned_by(owner))
            })
            .copied()
            .collect())
    }

    async fn fetch_updated_since(
        &self,
        owner: &OwnerId,
        thresholds: &[(EntityId, DateTime<Utc>)],
    ) -> Result<Vec<Entity<P>>> {
        let records = self.records.read().await;
        Ok(thresholds
            .iter()
            .filter_map(|(id, threshold)| {
                records
                    .get(id)
                    .filter(|entity| entity.is_owned_by(owner) && entity.updated_at > *threshold)
                    .cloned()
            })
            .collect())
    }
}

#[async_trait]
impl<P> MutationEmitter for MemoryStore<P>
where
    P: Clone + Send + Sync + Serialize + 'static,
{
    async fn insert(&self, owner: &OwnerId, id: EntityId, payload: P) -> Result<Option<Entity<P>>> {
        let mut records = self.records.write().await;
        if records.contains_key(&id) {
            return Ok(None);
        }
        let entity = Entity::new(id, owner.clone(), next_timestamp(None), payload);
        records.insert(id, entity.clone());
        self.publisher.publish(ChangeEvent::Insert(entity.clone()));
        Ok(Some(entity))
    }

    async fn update(&self, owner: &OwnerId, id: EntityId, payload: P) -> Result<Option<Entity<P>>> {
        let mut records = self.records.write().await;
        let Some(existing) = records.get_mut(&id).filter(|e| e.is_owned_by(owner)) else {
            return Ok(None);
        };
        existing.updated_at = next_timestamp(Some(existing.updated_at));
        existing.payload = payload;
        let entity = existing.clone();
        self.publisher.publish(ChangeEvent::Update(entity.clone()));
        Ok(Some(entity))
    }

    async fn delete(&self, owner: &OwnerId, id: EntityId) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get(&id) {
            Some(entity) if entity.is_owned_by(owner) => {
                records.remove(&id);
            }
            _ => return Ok(false),
        }
        self.publisher.publish(ChangeEvent::Delete {
            owner_id: owner.clone(),
            id,
        });
        Ok(true)
    }
}
