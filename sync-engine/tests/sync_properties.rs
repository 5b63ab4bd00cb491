//! Property-based tests for reconciliation and owner isolation.
//!
//! Reconciler laws, for any owner O, store S and client cache K:
//! - `deleted` is exactly the ids of K that O no longer owns in S
//! - `inserted` is exactly O's ids missing from K
//! - `updated` is exactly the ids of K whose stored `updated_at` is past the known one plus 1s
//! - the three lists are pairwise disjoint
//! - reconciling twice without writes gives the same batch
//! - a client that applies the batch is up to date
//!
//! Sessions for different owners, fed any interleaving of writes, only ever see their
//! own owner's changes, in commit order.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use proptest::prelude::*;
use proptest::sample::Index;
use serde::{Deserialize, Serialize};
use sync_engine::memory::MemoryStore;
use sync_engine::reconciler::{skew_tolerance, Reconciler, SyncBatch};
use sync_engine::{
    ChangePublisher, ClientKnownItem, Entity, EntityId, EntityKind, Frame, MutationEmitter,
    OwnerId, SessionConfig, SessionStream, SyncChannel,
};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const OWNERS: [&str; 3] = ["ann", "ben", "cat"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Note {
    body: String,
}

fn note(body: &str) -> Note {
    Note { body: body.into() }
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

// =============================================================================
// HELPER STRATEGIES
// =============================================================================

/// (id, owner index, milliseconds after the base time)
fn stored_strategy() -> impl Strategy<Value = Vec<(u128, usize, i64)>> {
    prop::collection::vec((any::<u128>(), 0..OWNERS.len(), 0i64..20_000), 0..24)
}

/// (pick a stored id?, which one, timestamp offset in ms, fresh id)
fn known_strategy() -> impl Strategy<Value = Vec<(bool, Index, i64, u128)>> {
    prop::collection::vec(
        (any::<bool>(), any::<Index>(), -3_000i64..3_000, any::<u128>()),
        0..24,
    )
}

/// (owner index, 0 = insert / 1 = update / 2 = delete, target among the owner's live ids)
fn ops_strategy() -> impl Strategy<Value = Vec<(usize, u8, Index)>> {
    prop::collection::vec((0..OWNERS.len(), 0u8..3, any::<Index>()), 1..40)
}

fn build_store(stored: &[(u128, usize, i64)]) -> (MemoryStore<Note>, Vec<Entity<Note>>) {
    let mut entities: HashMap<EntityId, Entity<Note>> = HashMap::new();
    for (id, owner, offset) in stored {
        let id = Uuid::from_u128(*id);
        entities.entry(id).or_insert_with(|| {
            Entity::new(
                id,
                OwnerId::from(OWNERS[*owner]),
                base_time() + chrono::Duration::milliseconds(*offset),
                note("stored"),
            )
        });
    }
    let store = MemoryStore::new(
        EntityKind::SavedQuery,
        ChangePublisher::new(EntityKind::SavedQuery, 16),
    );
    let entities: Vec<_> = entities.into_values().collect();
    block_on(async {
        for entity in &entities {
            store.seed(entity.clone()).await;
        }
    });
    (store, entities)
}

fn build_known(
    stored: &[Entity<Note>],
    picks: &[(bool, Index, i64, u128)],
) -> Vec<ClientKnownItem> {
    let mut seen = HashSet::new();
    let mut known = Vec::new();
    for (existing, index, offset, fresh) in picks {
        let offset = chrono::Duration::milliseconds(*offset);
        let item = if *existing && !stored.is_empty() {
            let entity = index.get(stored);
            ClientKnownItem::new(entity.id, entity.updated_at + offset)
        } else {
            ClientKnownItem::new(Uuid::from_u128(*fresh), base_time() + offset)
        };
        if seen.insert(item.id) {
            known.push(item);
        }
    }
    known
}

fn reconcile(
    store: &MemoryStore<Note>,
    owner: &OwnerId,
    known: &[ClientKnownItem],
) -> SyncBatch<Note> {
    block_on(Reconciler::new(store).reconcile(owner, known)).unwrap()
}

fn id_set(entities: &[Entity<Note>]) -> BTreeSet<EntityId> {
    entities.iter().map(|e| e.id).collect()
}

// =============================================================================
// RECONCILER PROPERTY TESTS
// =============================================================================

mod reconciler_properties {
    use super::*;

    proptest! {
        /// Each list matches its definition and no id lands in two lists.
        #[test]
        fn batch_matches_its_definition(
            stored in stored_strategy(),
            picks in known_strategy(),
            owner in 0..OWNERS.len(),
        ) {
            let (store, entities) = build_store(&stored);
            let known = build_known(&entities, &picks);
            let owner = OwnerId::from(OWNERS[owner]);
            let batch = reconcile(&store, &owner, &known);

            let owned: HashMap<EntityId, DateTime<Utc>> = entities
                .iter()
                .filter(|e| e.is_owned_by(&owner))
                .map(|e| (e.id, e.updated_at))
                .collect();
            let known_ids: BTreeSet<EntityId> = known.iter().map(|k| k.id).collect();

            let expected_deleted: BTreeSet<EntityId> = known_ids
                .iter()
                .filter(|id| !owned.contains_key(*id))
                .copied()
                .collect();
            let expected_inserted: BTreeSet<EntityId> = owned
                .keys()
                .filter(|id| !known_ids.contains(*id))
                .copied()
                .collect();
            let expected_updated: BTreeSet<EntityId> = known
                .iter()
                .filter(|k| owned.get(&k.id).is_some_and(|at| *at > k.updated_at + skew_tolerance()))
                .map(|k| k.id)
                .collect();

            let deleted: BTreeSet<EntityId> = batch.deleted.iter().copied().collect();
            let inserted = id_set(&batch.inserted);
            let updated = id_set(&batch.updated);

            prop_assert_eq!(batch.deleted.len(), deleted.len());
            prop_assert_eq!(batch.inserted.len(), inserted.len());
            prop_assert_eq!(batch.updated.len(), updated.len());
            prop_assert_eq!(&deleted, &expected_deleted);
            prop_assert_eq!(&inserted, &expected_inserted);
            prop_assert_eq!(&updated, &expected_updated);

            prop_assert!(deleted.is_disjoint(&inserted));
            prop_assert!(deleted.is_disjoint(&updated));
            prop_assert!(inserted.is_disjoint(&updated));
            prop_assert!(batch
                .updated
                .iter()
                .chain(batch.inserted.iter())
                .all(|e| e.is_owned_by(&owner)));
        }

        /// Reconciling twice against an unchanged store gives the same batch.
        #[test]
        fn reconcile_is_idempotent(
            stored in stored_strategy(),
            picks in known_strategy(),
            owner in 0..OWNERS.len(),
        ) {
            let (store, entities) = build_store(&stored);
            let known = build_known(&entities, &picks);
            let owner = OwnerId::from(OWNERS[owner]);

            let first = reconcile(&store, &owner, &known);
            let second = reconcile(&store, &owner, &known);

            prop_assert_eq!(id_set(&first.updated), id_set(&second.updated));
            prop_assert_eq!(id_set(&first.inserted), id_set(&second.inserted));
            let first_deleted: BTreeSet<_> = first.deleted.into_iter().collect();
            let second_deleted: BTreeSet<_> = second.deleted.into_iter().collect();
            prop_assert_eq!(first_deleted, second_deleted);
        }

        /// An empty cache receives everything the owner has and nothing else.
        #[test]
        fn empty_cache_receives_everything_owned(
            stored in stored_strategy(),
            owner in 0..OWNERS.len(),
        ) {
            let (store, entities) = build_store(&stored);
            let owner = OwnerId::from(OWNERS[owner]);
            let batch = reconcile(&store, &owner, &[]);

            let owned: BTreeSet<EntityId> = entities
                .iter()
                .filter(|e| e.is_owned_by(&owner))
                .map(|e| e.id)
                .collect();
            prop_assert!(batch.updated.is_empty());
            prop_assert!(batch.deleted.is_empty());
            prop_assert_eq!(id_set(&batch.inserted), owned);
        }

        /// A client that applies the batch has nothing left to learn.
        #[test]
        fn applying_the_batch_converges(
            stored in stored_strategy(),
            picks in known_strategy(),
            owner in 0..OWNERS.len(),
        ) {
            let (store, entities) = build_store(&stored);
            let known = build_known(&entities, &picks);
            let owner = OwnerId::from(OWNERS[owner]);
            let batch = reconcile(&store, &owner, &known);

            let mut cache: HashMap<EntityId, DateTime<Utc>> =
                known.iter().map(|k| (k.id, k.updated_at)).collect();
            for id in &batch.deleted {
                cache.remove(id);
            }
            for entity in batch.updated.iter().chain(batch.inserted.iter()) {
                cache.insert(entity.id, entity.updated_at);
            }
            let refreshed: Vec<ClientKnownItem> = cache
                .into_iter()
                .map(|(id, at)| ClientKnownItem::new(id, at))
                .collect();

            prop_assert!(reconcile(&store, &owner, &refreshed).is_empty());
        }
    }
}

// =============================================================================
// OWNER ISOLATION PROPERTY TESTS
// =============================================================================

mod isolation_properties {
    use super::*;

    fn frame_id(frame: &Frame) -> EntityId {
        match frame {
            Frame::Insert(value) | Frame::Update(value) => value["id"]
                .as_str()
                .and_then(|id| id.parse().ok())
                .expect("frame value carries an id"),
            Frame::Delete(id) => *id,
            Frame::Sync(_) => panic!("sync frame has no id"),
        }
    }

    async fn next_frame(stream: &mut SessionStream) -> Frame {
        timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("timed out waiting for frame")
            .expect("session stream ended")
    }

    type Trace = Vec<(&'static str, EntityId)>;

    /// Apply `ops` with one open session per owner. Returns, per owner, the frames
    /// the session delivered and the changes that owner actually made.
    async fn run_ops(ops: &[(usize, u8, Index)]) -> Vec<(Trace, Trace)> {
        let publisher = ChangePublisher::new(EntityKind::ChatMessage, 256);
        let store = Arc::new(MemoryStore::new(EntityKind::ChatMessage, publisher.clone()));
        let channel = SyncChannel::new(store.clone(), publisher, SessionConfig::default());
        let shutdown = CancellationToken::new();

        let mut streams = Vec::new();
        for owner in OWNERS {
            let mut stream = channel
                .open(OwnerId::from(owner), Vec::new(), shutdown.clone())
                .await
                .unwrap();
            assert_eq!(next_frame(&mut stream).await, Frame::Sync(Vec::new()));
            streams.push(stream);
        }

        let mut live: Vec<Vec<EntityId>> = vec![Vec::new(); OWNERS.len()];
        let mut expected: Vec<Trace> = vec![Vec::new(); OWNERS.len()];
        for (step, (owner_idx, op, target)) in ops.iter().enumerate() {
            let owner = OwnerId::from(OWNERS[*owner_idx]);
            let ids = &mut live[*owner_idx];
            if *op == 0 || ids.is_empty() {
                let id = Uuid::new_v4();
                store
                    .insert(&owner, id, note(&format!("step {step}")))
                    .await
                    .unwrap()
                    .unwrap();
                ids.push(id);
                expected[*owner_idx].push(("insert", id));
            } else if *op == 1 {
                let id = *target.get(ids.as_slice());
                store
                    .update(&owner, id, note(&format!("step {step}")))
                    .await
                    .unwrap()
                    .unwrap();
                expected[*owner_idx].push(("update", id));
            } else {
                let id = ids.remove(target.index(ids.len()));
                assert!(store.delete(&owner, id).await.unwrap());
                expected[*owner_idx].push(("delete", id));
            }
        }

        // A final insert per owner; anything leaked would shift it out of place.
        for (owner_idx, owner) in OWNERS.iter().enumerate() {
            let marker = Uuid::new_v4();
            store
                .insert(&OwnerId::from(*owner), marker, note("marker"))
                .await
                .unwrap()
                .unwrap();
            expected[owner_idx].push(("insert", marker));
        }

        let mut traces = Vec::new();
        for (stream, expected) in streams.iter_mut().zip(expected) {
            let mut received = Vec::new();
            for _ in 0..expected.len() {
                let frame = next_frame(stream).await;
                received.push((frame.frame_type(), frame_id(&frame)));
            }
            traces.push((received, expected));
        }
        shutdown.cancel();
        traces
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Every session sees exactly its owner's changes, in commit order.
        #[test]
        fn sessions_never_see_other_owners(ops in ops_strategy()) {
            let traces = block_on(run_ops(&ops));
            for (owner, (received, expected)) in OWNERS.iter().zip(traces) {
                prop_assert_eq!(received, expected, "frames for {}", owner);
            }
        }
    }
}
