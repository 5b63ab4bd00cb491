use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::adapter::{EntityAdapter, MutationEmitter};
use crate::entity::{EntityId, EntityKind, OwnerId};
use crate::error::SyncError;
use crate::reconciler::encode;
use crate::session::{SessionOpener, SyncChannel};

/// Kind-erased mutation path. Accepts and returns the JSON wire form.
#[async_trait]
pub trait MutationSink: Send + Sync {
    fn kind(&self) -> EntityKind;

    /// Update `id` if the owner has it, otherwise create it. A missing `id` always
    /// creates with a fresh one. Returns the stored entity and whether it was created.
    async fn upsert(
        &self,
        owner: &OwnerId,
        id: Option<EntityId>,
        payload: Value,
    ) -> Result<(Value, bool), SyncError>;

    async fn delete(&self, owner: &OwnerId, id: EntityId) -> Result<bool, SyncError>;
}

#[async_trait]
impl<A> MutationSink for SyncChannel<A>
where
    A: MutationEmitter,
    A::Payload: DeserializeOwned,
{
    fn kind(&self) -> EntityKind {
        self.adapter().kind()
    }

    async fn upsert(
        &self,
        owner: &OwnerId,
        id: Option<EntityId>,
        payload: Value,
    ) -> Result<(Value, bool), SyncError> {
        let kind = self.adapter().kind();
        let payload: A::Payload = serde_json::from_value(payload)
            .map_err(|err| SyncError::InvalidInput(format!("{kind} payload: {err}")))?;
        let adapter = self.adapter().as_ref();

        if let Some(id) = id {
            if let Some(entity) = adapter
                .update(owner, id, payload.clone())
                .await
                .map_err(SyncError::store)?
            {
                return Ok((encode(adapter, &entity)?, false));
            }
        }

        let id = id.unwrap_or_else(Uuid::new_v4);
        if let Some(entity) = adapter
            .insert(owner, id, payload.clone())
            .await
            .map_err(SyncError::store)?
        {
            return Ok((encode(adapter, &entity)?, true));
        }

        // A concurrent create of the same id by this owner won the insert.
        match adapter
            .update(owner, id, payload)
            .await
            .map_err(SyncError::store)?
        {
            Some(entity) => Ok((encode(adapter, &entity)?, false)),
            None => Err(SyncError::InvalidInput(format!("{kind} id {id} is not available"))),
        }
    }

    async fn delete(&self, owner: &OwnerId, id: EntityId) -> Result<bool, SyncError> {
        self.adapter()
            .delete(owner, id)
            .await
            .map_err(SyncError::store)
    }
}

/// Every kind the process serves, looked up by the transport per request.
#[derive(Default)]
pub struct SyncRegistry {
    openers: BTreeMap<EntityKind, Arc<dyn SessionOpener>>,
    sinks: BTreeMap<EntityKind, Arc<dyn MutationSink>>,
}

impl SyncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve sessions for the channel's kind, read-only.
    pub fn register<A: EntityAdapter>(&mut self, channel: Arc<SyncChannel<A>>) -> &mut Self {
        let kind = channel.adapter().kind();
        if self.openers.insert(kind, channel).is_some() {
            tracing::warn!(%kind, "replacing previously registered sync channel");
        }
        self
    }

    /// Serve sessions and accept mutations for the channel's kind.
    pub fn register_emitter<A>(&mut self, channel: Arc<SyncChannel<A>>) -> &mut Self
    where
        A: MutationEmitter,
        A::Payload: DeserializeOwned,
    {
        let kind = channel.adapter().kind();
        self.sinks.insert(kind, channel.clone());
        self.register(channel)
    }

    pub fn opener(&self, kind: EntityKind) -> Result<Arc<dyn SessionOpener>, SyncError> {
        self.openers
            .get(&kind)
            .cloned()
            .ok_or_else(|| SyncError::UnknownKind(kind.to_string()))
    }

    pub fn sink(&self, kind: EntityKind) -> Result<Arc<dyn MutationSink>, SyncError> {
        if !self.openers.contains_key(&kind) {
            return Err(SyncError::UnknownKind(kind.to_string()));
        }
        self.sinks
            .get(&kind)
            .cloned()
            .ok_or(SyncError::MutationsDisabled(kind))
    }

    pub fn kinds(&self) -> impl Iterator<Item = EntityKind> + '_ {
        self.openers.keys().copied()
    }

    /// Live subscriber count per registered kind.
    pub fn subscriber_counts(&self) -> Vec<(EntityKind, usize)> {
        self.openers
            .iter()
            .map(|(kind, opener)| (*kind, opener.subscriber_count()))
            .collect()
    }
}
