// ABOUTME: Chat message records belonging to a chat thread
// ABOUTME: Messages sync per owner like every other kind; the thread link is informational

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use sync_engine::EntityKind;
use tokio_postgres::Row;
use uuid::Uuid;

use super::{PgRecord, SqlParam};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        Ok(match value {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "system" => Role::System,
            other => bail!("unknown chat message role '{other}'"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub thread_id: Uuid,
    pub role: Role,
    pub content: String,
}

impl PgRecord for ChatMessage {
    const KIND: EntityKind = EntityKind::ChatMessage;
    const TABLE: &'static str = "chat_messages";
    const COLUMNS: &'static [&'static str] = &["thread_id", "role", "content"];
    const COLUMN_DDL: &'static str = "thread_id uuid NOT NULL, \
        role text NOT NULL CHECK (role IN ('user', 'assistant', 'system')), \
        content text NOT NULL";

    fn from_row(row: &Row) -> Result<Self> {
        let role: String = row.try_get("role")?;
        Ok(Self {
            thread_id: row.try_get("thread_id")?,
            role: Role::parse(&role)?,
            content: row.try_get("content")?,
        })
    }

    fn params(&self) -> Vec<SqlParam> {
        vec![
            Box::new(self.thread_id),
            Box::new(self.role.as_str()),
            Box::new(self.content.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips() {
        for role in [Role::User, Role::Assistant, Role::System] {
            assert_eq!(Role::parse(role.as_str()).unwrap(), role);
        }
        assert!(Role::parse("tool").is_err());
    }

    #[test]
    fn payload_rejects_unknown_role() {
        let raw = format!(
            r#"{{"threadId":"{}","role":"robot","content":"hi"}}"#,
            Uuid::nil()
        );
        assert!(serde_json::from_str::<ChatMessage>(&raw).is_err());
    }
}
