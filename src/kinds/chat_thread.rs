// ABOUTME: Chat thread records with the connection context they were opened against
// ABOUTME: Connection URLs are sent to clients with the password removed

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sync_engine::EntityKind;
use tokio_postgres::Row;
use uuid::Uuid;

use super::{PgRecord, SqlParam};
use crate::utils::strip_password_from_url;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatThread {
    pub title: String,
    pub connection_id: Option<Uuid>,
    /// Snapshot of the connection used by the thread, including its `url`.
    #[serde(default)]
    pub connection: Option<Value>,
}

impl PgRecord for ChatThread {
    const KIND: EntityKind = EntityKind::ChatThread;
    const TABLE: &'static str = "chat_threads";
    const COLUMNS: &'static [&'static str] = &["title", "connection_id", "connection"];
    const COLUMN_DDL: &'static str = "title text NOT NULL, \
        connection_id uuid, \
        connection jsonb";

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            title: row.try_get("title")?,
            connection_id: row.try_get("connection_id")?,
            connection: row.try_get("connection")?,
        })
    }

    fn params(&self) -> Vec<SqlParam> {
        vec![
            Box::new(self.title.clone()),
            Box::new(self.connection_id),
            Box::new(self.connection.clone()),
        ]
    }

    fn redact(value: &mut Value) -> Result<()> {
        let Some(url) = value
            .get_mut("connection")
            .and_then(|conn| conn.get_mut("url"))
        else {
            return Ok(());
        };
        let redacted = match url.as_str() {
            Some(raw) => match strip_password_from_url(raw) {
                Ok(stripped) => Value::String(stripped),
                Err(err) => {
                    tracing::debug!(error = %err, "dropping unparseable thread connection url");
                    Value::Null
                }
            },
            None => return Ok(()),
        };
        *url = redacted;
        Ok(())
    }
}
