use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::entity::{Entity, EntityId, EntityKind, OwnerId};

pub const DEFAULT_PUBLISHER_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Insert => "insert",
            ChangeOperation::Update => "update",
            ChangeOperation::Delete => "delete",
        }
    }
}

/// One committed mutation, created once by an emitter and consumed by whichever
/// sessions are subscribed at that moment.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<P> {
    Insert(Entity<P>),
    Update(Entity<P>),
    Delete { owner_id: OwnerId, id: EntityId },
}

impl<P> ChangeEvent<P> {
    pub fn owner_id(&self) -> &OwnerId {
        match self {
            ChangeEvent::Insert(entity) | ChangeEvent::Update(entity) => &entity.owner_id,
            ChangeEvent::Delete { owner_id, .. } => owner_id,
        }
    }

    pub fn entity_id(&self) -> EntityId {
        match self {
            ChangeEvent::Insert(entity) | ChangeEvent::Update(entity) => entity.id,
            ChangeEvent::Delete { id, .. } => *id,
        }
    }

    pub fn operation(&self) -> ChangeOperation {
        match self {
            ChangeEvent::Insert(_) => ChangeOperation::Insert,
            ChangeEvent::Update(_) => ChangeOperation::Update,
            ChangeEvent::Delete { .. } => ChangeOperation::Delete,
        }
    }
}

/// In-process fan-out of change events for a single entity kind.
///
/// Delivery is best effort and at most once per subscriber. Each subscriber sees
/// events in publish order; a subscriber that falls more than `capacity` events
/// behind skips the overflow instead of blocking the publisher. Nothing is replayed
/// for late subscribers. Events never cross process boundaries, so every session of
/// a user has to be served by the instance that commits that user's mutations.
pub struct ChangePublisher<P> {
    kind: EntityKind,
    tx: broadcast::Sender<ChangeEvent<P>>,
}

impl<P> Clone for ChangePublisher<P> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            tx: self.tx.clone(),
        }
    }
}

impl<P: Clone + Send + 'static> ChangePublisher<P> {
    pub fn new(kind: EntityKind, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { kind, tx }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Fan the event out to current subscribers. Returns how many received it.
    pub fn publish(&self, event: ChangeEvent<P>) -> usize {
        let op = event.operation();
        let id = event.entity_id();
        match self.tx.send(event) {
            Ok(receivers) => {
                tracing::trace!(kind = %self.kind, op = op.as_str(), %id, receivers, "published change");
                receivers
            }
            Err(_) => {
                tracing::trace!(kind = %self.kind, op = op.as_str(), %id, "no subscribers for change");
                0
            }
        }
    }

    pub fn subscribe(&self) -> Subscription<P> {
        Subscription {
            kind: self.kind,
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A live registration with a [`ChangePublisher`]. Dropping it unsubscribes.
pub struct Subscription<P> {
    kind: EntityKind,
    rx: broadcast::Receiver<ChangeEvent<P>>,
}

impl<P: Clone> Subscription<P> {
    /// Next event in publish order, or `None` once the publisher is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent<P>> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        kind = %self.kind,
                        skipped,
                        "subscriber fell behind, dropping missed change events"
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
