use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use crate::adapter::EntityAdapter;
use crate::entity::{ClientKnownItem, Entity, EntityId, OwnerId};
use crate::error::SyncError;
use crate::frame::Frame;

/// Margin added to a client's `updated_at` before an entity counts as updated.
/// Absorbs timestamp precision loss and the client's own round trip.
pub const SKEW_TOLERANCE_MS: i64 = 1_000;

pub fn skew_tolerance() -> Duration {
    Duration::milliseconds(SKEW_TOLERANCE_MS)
}

/// One-shot diff between a client's cache and the store.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncBatch<P> {
    pub updated: Vec<Entity<P>>,
    pub inserted: Vec<Entity<P>>,
    pub deleted: Vec<EntityId>,
}

impl<P> Default for SyncBatch<P> {
    fn default() -> Self {
        Self {
            updated: Vec::new(),
            inserted: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

impl<P> SyncBatch<P> {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.inserted.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updated.len() + self.inserted.len() + self.deleted.len()
    }

    /// Encode the batch as the `sync` frame using the adapter's wire form.
    pub fn into_frame<A>(self, adapter: &A) -> Result<Frame, SyncError>
    where
        A: EntityAdapter<Payload = P>,
    {
        let mut changes = Vec::with_capacity(self.len());
        for entity in &self.updated {
            changes.push(Frame::Update(encode(adapter, entity)?));
        }
        for entity in &self.inserted {
            changes.push(Frame::Insert(encode(adapter, entity)?));
        }
        changes.extend(self.deleted.into_iter().map(Frame::Delete));
        Ok(Frame::Sync(changes))
    }
}

pub(crate) fn encode<A: EntityAdapter>(
    adapter: &A,
    entity: &Entity<A::Payload>,
) -> Result<serde_json::Value, SyncError> {
    adapter
        .serialize(entity)
        .map_err(|err| SyncError::Encode(format!("{} {}: {:#}", adapter.kind(), entity.id, err)))
}

/// Computes the three-way diff for one owner.
///
/// `updated` and `inserted` can never share an id: the first only looks at known
/// ids, the second only at unknown ones. `deleted` is `known - existing`.
pub struct Reconciler<'a, A> {
    adapter: &'a A,
}

impl<'a, A: EntityAdapter> Reconciler<'a, A> {
    pub fn new(adapter: &'a A) -> Self {
        Self { adapter }
    }

    pub async fn reconcile(
        &self,
        owner: &OwnerId,
        known: &[ClientKnownItem],
    ) -> Result<SyncBatch<A::Payload>, SyncError> {
        let known_ids: HashSet<EntityId> = known.iter().map(|item| item.id).collect();

        // Nothing known means nothing can be updated.
        let updated = if known.is_empty() {
            Vec::new()
        } else {
            self.find_updated(owner, known).await?
        };
        let inserted = self.find_inserted(owner, &known_ids).await?;
        let deleted = self.find_deleted(owner, known).await?;

        tracing::debug!(
            kind = %self.adapter.kind(),
            %owner,
            known = known.len(),
            updated = updated.len(),
            inserted = inserted.len(),
            deleted = deleted.len(),
            "reconciled client snapshot"
        );

        Ok(SyncBatch {
            updated,
            inserted,
            deleted,
        })
    }

    async fn find_updated(
        &self,
        owner: &OwnerId,
        known: &[ClientKnownItem],
    ) -> Result<Vec<Entity<A::Payload>>, SyncError> {
        let tolerance = skew_tolerance();
        let thresholds: Vec<(EntityId, DateTime<Utc>)> = known
            .iter()
            .map(|item| (item.id, item.updated_at + tolerance))
            .collect();
        let by_id: HashMap<EntityId, DateTime<Utc>> = thresholds.iter().copied().collect();

        let candidates = self
            .adapter
            .fetch_updated_since(owner, &thresholds)
            .await
            .map_err(SyncError::store)?;

        let mut seen = HashSet::new();
        Ok(candidates
            .into_iter()
            .filter(|entity| entity.is_owned_by(owner))
            .filter(|entity| {
                by_id
                    .get(&entity.id)
                    .is_some_and(|threshold| entity.updated_at > *threshold)
            })
            .filter(|entity| seen.insert(entity.id))
            .collect())
    }

    async fn find_inserted(
        &self,
        owner: &OwnerId,
        known_ids: &HashSet<EntityId>,
    ) -> Result<Vec<Entity<A::Payload>>, SyncError> {
        let owned = self
            .adapter
            .fetch_by_owner(owner)
            .await
            .map_err(SyncError::store)?;

        let mut seen = HashSet::new();
        Ok(owned
            .into_iter()
            .filter(|entity| entity.is_owned_by(owner))
            .filter(|entity| !known_ids.contains(&entity.id))
            .filter(|entity| seen.insert(entity.id))
            .collect())
    }

    async fn find_deleted(
        &self,
        owner: &OwnerId,
        known: &[ClientKnownItem],
    ) -> Result<Vec<EntityId>, SyncError> {
        if known.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<EntityId> = known.iter().map(|item| item.id).collect();
        let existing: HashSet<EntityId> = self
            .adapter
            .fetch_existing_ids(owner, &ids)
            .await
            .map_err(SyncError::store)?
            .into_iter()
            .collect();

        let mut seen = HashSet::new();
        Ok(ids
            .into_iter()
            .filter(|id| !existing.contains(id))
            .filter(|id| seen.insert(*id))
            .collect())
    }
}
