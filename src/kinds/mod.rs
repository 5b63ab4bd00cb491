// ABOUTME: PostgreSQL-backed record stores for every synchronized entity kind
// ABOUTME: PgStore<R> reads owner-scoped rows and publishes each committed mutation

pub mod chat_message;
pub mod chat_thread;
pub mod connection;
pub mod saved_query;

use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sync_engine::{
    ChangeEvent, ChangePublisher, Entity, EntityAdapter, EntityId, EntityKind, MutationEmitter,
    OwnerId,
};
use tokio::sync::Mutex;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Row};

pub use chat_message::ChatMessage;
pub use chat_thread::ChatThread;
pub use connection::Connection;
pub use saved_query::SavedQuery;

pub type SqlParam = Box<dyn ToSql + Sync + Send>;

/// Table mapping for one entity kind. Every table shares `id`, `owner_id` and
/// `updated_at`; `COLUMNS` lists the kind's own columns in binding order.
pub trait PgRecord: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    const KIND: EntityKind;
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];
    /// Column definitions appended to the common ones when creating the table.
    const COLUMN_DDL: &'static str;

    /// Decode the kind's columns from a row selected with `COLUMNS`.
    fn from_row(row: &Row) -> Result<Self>;

    /// Values for `COLUMNS`, same order.
    fn params(&self) -> Vec<SqlParam>;

    /// Adjust the wire form before it leaves the process.
    fn redact(_value: &mut Value) -> Result<()> {
        Ok(())
    }
}

/// Record store and mutation emitter for one kind.
///
/// Mutations hold `writes` from statement to publish, so events for this kind
/// leave in the order their statements committed.
pub struct PgStore<R: PgRecord> {
    client: Arc<Client>,
    publisher: ChangePublisher<R>,
    writes: Mutex<()>,
    _record: PhantomData<fn() -> R>,
}

impl<R: PgRecord> PgStore<R> {
    pub fn new(client: Arc<Client>, publisher: ChangePublisher<R>) -> Self {
        Self {
            client,
            publisher,
            writes: Mutex::new(()),
            _record: PhantomData,
        }
    }

    fn select_list() -> String {
        let mut cols = vec!["id", "owner_id", "updated_at"];
        cols.extend_from_slice(R::COLUMNS);
        cols.join(", ")
    }

    fn entity(row: &Row) -> Result<Entity<R>> {
        let id: EntityId = row.try_get("id").context("id column")?;
        let owner: String = row.try_get("owner_id").context("owner_id column")?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at").context("updated_at column")?;
        let payload = R::from_row(row).with_context(|| format!("decoding {} {id}", R::KIND))?;
        Ok(Entity::new(id, OwnerId::from(owner), updated_at, payload))
    }

    fn entities(rows: &[Row]) -> Result<Vec<Entity<R>>> {
        rows.iter().map(Self::entity).collect()
    }
}

pub(crate) fn placeholders(first: usize, count: usize) -> Vec<String> {
    (first..first + count).map(|n| format!("${n}")).collect()
}

#[async_trait]
impl<R: PgRecord> EntityAdapter for PgStore<R> {
    type Payload = R;

    fn kind(&self) -> EntityKind {
        R::KIND
    }

    async fn fetch_by_owner(&self, owner: &OwnerId) -> Result<Vec<Entity<R>>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE owner_id = $1",
            Self::select_list(),
            R::TABLE
        );
        let rows = self
            .client
            .query(&sql, &[&owner.as_str()])
            .await
            .with_context(|| format!("failed to list {} for owner", R::TABLE))?;
        Self::entities(&rows)
    }

    async fn fetch_existing_ids(&self, owner: &OwnerId, ids: &[EntityId]) -> Result<Vec<EntityId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id FROM {} WHERE owner_id = $1 AND id = ANY($2)",
            R::TABLE
        );
        let ids = ids.to_vec();
        let rows = self
            .client
            .query(&sql, &[&owner.as_str(), &ids])
            .await
            .with_context(|| format!("failed to check existing {}", R::TABLE))?;
        rows.iter()
            .map(|row| row.try_get::<_, EntityId>("id").context("id column"))
            .collect()
    }

    async fn fetch_updated_since(
        &self,
        owner: &OwnerId,
        thresholds: &[(EntityId, DateTime<Utc>)],
    ) -> Result<Vec<Entity<R>>> {
        if thresholds.is_empty() {
            return Ok(Vec::new());
        }
        let (ids, limits): (Vec<EntityId>, Vec<DateTime<Utc>>) = thresholds.iter().copied().unzip();
        let columns = Self::select_list()
            .split(", ")
            .map(|col| format!("t.{col}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {columns} FROM {table} t \
             JOIN unnest($2::uuid[], $3::timestamptz[]) AS k(id, threshold) ON t.id = k.id \
             WHERE t.owner_id = $1 AND t.updated_at > k.threshold",
            table = R::TABLE,
        );
        let rows = self
            .client
            .query(&sql, &[&owner.as_str(), &ids, &limits])
            .await
            .with_context(|| format!("failed to read updated {}", R::TABLE))?;
        Self::entities(&rows)
    }

    fn serialize(&self, entity: &Entity<R>) -> Result<Value> {
        let mut value = serde_json::to_value(entity)?;
        R::redact(&mut value)?;
        Ok(value)
    }
}

#[async_trait]
impl<R: PgRecord> MutationEmitter for PgStore<R> {
    async fn insert(&self, owner: &OwnerId, id: EntityId, payload: R) -> Result<Option<Entity<R>>> {
        let values = placeholders(3, R::COLUMNS.len()).join(", ");
        let sql = format!(
            "INSERT INTO {table} (id, owner_id, updated_at, {cols}) \
             VALUES ($1, $2, clock_timestamp(), {values}) \
             ON CONFLICT (id) DO NOTHING RETURNING {select}",
            table = R::TABLE,
            cols = R::COLUMNS.join(", "),
            select = Self::select_list(),
        );
        let owner_param = owner.as_str().to_string();
        let extra = payload.params();
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&id, &owner_param];
        params.extend(extra.iter().map(|v| v.as_ref() as &(dyn ToSql + Sync)));

        let _writing = self.writes.lock().await;
        let Some(row) = self
            .client
            .query_opt(&sql, &params)
            .await
            .with_context(|| format!("failed to insert into {}", R::TABLE))?
        else {
            return Ok(None);
        };
        let entity = Self::entity(&row)?;
        self.publisher.publish(ChangeEvent::Insert(entity.clone()));
        Ok(Some(entity))
    }

    async fn update(&self, owner: &OwnerId, id: EntityId, payload: R) -> Result<Option<Entity<R>>> {
        let assignments = R::COLUMNS
            .iter()
            .zip(placeholders(3, R::COLUMNS.len()))
            .map(|(col, param)| format!("{col} = {param}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {table} SET {assignments}, \
             updated_at = GREATEST(clock_timestamp(), updated_at + interval '1 millisecond') \
             WHERE id = $1 AND owner_id = $2 RETURNING {select}",
            table = R::TABLE,
            select = Self::select_list(),
        );
        let owner_param = owner.as_str().to_string();
        let extra = payload.params();
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&id, &owner_param];
        params.extend(extra.iter().map(|v| v.as_ref() as &(dyn ToSql + Sync)));

        let _writing = self.writes.lock().await;
        let Some(row) = self
            .client
            .query_opt(&sql, &params)
            .await
            .with_context(|| format!("failed to update {}", R::TABLE))?
        else {
            return Ok(None);
        };
        let entity = Self::entity(&row)?;
        self.publisher.publish(ChangeEvent::Update(entity.clone()));
        Ok(Some(entity))
    }

    async fn delete(&self, owner: &OwnerId, id: EntityId) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1 AND owner_id = $2", R::TABLE);
        let _writing = self.writes.lock().await;
        let deleted = self
            .client
            .execute(&sql, &[&id, &owner.as_str()])
            .await
            .with_context(|| format!("failed to delete from {}", R::TABLE))?;
        if deleted == 0 {
            return Ok(false);
        }
        self.publisher.publish(ChangeEvent::Delete {
            owner_id: owner.clone(),
            id,
        });
        Ok(true)
    }
}
