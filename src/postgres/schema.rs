// ABOUTME: Creates the metadata tables and their owner indexes
// ABOUTME: Idempotent; safe to run on every startup

use anyhow::{Context, Result};
use tokio_postgres::Client;

use crate::kinds::{ChatMessage, ChatThread, Connection, PgRecord, SavedQuery};
use crate::utils::{quote_ident, validate_postgres_identifier};

/// DDL for one kind's table plus the index every owner-scoped read relies on.
pub fn table_ddl<R: PgRecord>() -> Result<String> {
    validate_postgres_identifier(R::TABLE)?;
    let table = quote_ident(R::TABLE);
    let index = quote_ident(&format!("{}_owner_updated_idx", R::TABLE));
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
            id uuid PRIMARY KEY, \
            owner_id text NOT NULL, \
            updated_at timestamptz NOT NULL DEFAULT clock_timestamp(), \
            {columns}\
         );\n\
         CREATE INDEX IF NOT EXISTS {index} ON {table} (owner_id, updated_at);",
        columns = R::COLUMN_DDL,
    ))
}

pub fn schema_ddl() -> Result<Vec<(&'static str, String)>> {
    Ok(vec![
        (Connection::TABLE, table_ddl::<Connection>()?),
        (ChatThread::TABLE, table_ddl::<ChatThread>()?),
        (ChatMessage::TABLE, table_ddl::<ChatMessage>()?),
        (SavedQuery::TABLE, table_ddl::<SavedQuery>()?),
    ])
}

/// Create any missing tables.
pub async fn migrate(client: &Client) -> Result<()> {
    for (table, ddl) in schema_ddl()? {
        client
            .batch_execute(&ddl)
            .await
            .with_context(|| format!("failed to create table {table}"))?;
        tracing::info!(table, "table ready");
    }
    Ok(())
}
