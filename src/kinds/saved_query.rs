// ABOUTME: Saved SQL query records
// ABOUTME: Optionally pinned to a saved connection

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sync_engine::EntityKind;
use tokio_postgres::Row;
use uuid::Uuid;

use super::{PgRecord, SqlParam};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedQuery {
    pub name: String,
    pub sql: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub connection_id: Option<Uuid>,
}

impl PgRecord for SavedQuery {
    const KIND: EntityKind = EntityKind::SavedQuery;
    const TABLE: &'static str = "saved_queries";
    const COLUMNS: &'static [&'static str] = &["name", "sql", "description", "connection_id"];
    const COLUMN_DDL: &'static str = "name text NOT NULL, \
        sql text NOT NULL, \
        description text, \
        connection_id uuid";

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            name: row.try_get("name")?,
            sql: row.try_get("sql")?,
            description: row.try_get("description")?,
            connection_id: row.try_get("connection_id")?,
        })
    }

    fn params(&self) -> Vec<SqlParam> {
        vec![
            Box::new(self.name.clone()),
            Box::new(self.sql.clone()),
            Box::new(self.description.clone()),
            Box::new(self.connection_id),
        ]
    }
}
