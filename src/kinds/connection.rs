// ABOUTME: Saved database connection records
// ABOUTME: Stores connection coordinates only; credentials never reach this table

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sync_engine::EntityKind;
use tokio_postgres::Row;

use super::{PgRecord, SqlParam};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub name: String,
    /// Database engine, e.g. `postgres` or `mysql`.
    pub engine: String,
    pub host: String,
    pub port: i32,
    pub database: String,
    pub username: Option<String>,
    #[serde(default)]
    pub options: serde_json::Value,
}

impl PgRecord for Connection {
    const KIND: EntityKind = EntityKind::Connection;
    const TABLE: &'static str = "connections";
    const COLUMNS: &'static [&'static str] = &[
        "name", "engine", "host", "port", "database", "username", "options",
    ];
    const COLUMN_DDL: &'static str = "name text NOT NULL, \
        engine text NOT NULL, \
        host text NOT NULL, \
        port integer NOT NULL, \
        database text NOT NULL, \
        username text, \
        options jsonb NOT NULL DEFAULT '{}'::jsonb";

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            name: row.try_get("name")?,
            engine: row.try_get("engine")?,
            host: row.try_get("host")?,
            port: row.try_get("port")?,
            database: row.try_get("database")?,
            username: row.try_get("username")?,
            options: row.try_get("options")?,
        })
    }

    fn params(&self) -> Vec<SqlParam> {
        let options = if self.options.is_null() {
            serde_json::json!({})
        } else {
            self.options.clone()
        };
        vec![
            Box::new(self.name.clone()),
            Box::new(self.engine.clone()),
            Box::new(self.host.clone()),
            Box::new(self.port),
            Box::new(self.database.clone()),
            Box::new(self.username.clone()),
            Box::new(options),
        ]
    }
}
