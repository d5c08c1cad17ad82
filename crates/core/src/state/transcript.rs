//! # Transcript Manager
//!
//! Append-only storage for the intake conversation. Every persisted entry
//! is tagged with the stage (1-9) it belongs to; the orchestrator resolves
//! a session's current stage from these tags on every turn.

use super::db::GroundworkDb;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Assistant entry content marking a completed stage. Filtered out of any
/// transcript shown back to the user; the structured payload on the same
/// row carries the stage's final field values.
pub const STAGE_COMPLETED: &str = "Stage completed";

/// Who authored a transcript entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "assistant" => Self::Assistant,
            _ => Self::User,
        }
    }
}

/// One persisted conversation message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub role: MessageRole,
    pub content: String,
    /// Structured stage outcome captured alongside assistant entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured: Option<serde_json::Value>,
    pub stage: u8,
    pub created_at: DateTime<Utc>,
}

impl TranscriptEntry {
    /// Build a user entry for the given session and stage
    pub fn user(
        session_id: &str,
        user_id: Option<&str>,
        content: &str,
        stage: u8,
    ) -> Self {
        Self {
            id: new_message_id(),
            session_id: session_id.to_string(),
            user_id: user_id.map(|s| s.to_string()),
            role: MessageRole::User,
            content: content.to_string(),
            structured: None,
            stage,
            created_at: Utc::now(),
        }
    }

    /// Build an assistant entry, optionally carrying the structured stage
    /// outcome that produced it
    pub fn assistant(
        session_id: &str,
        content: &str,
        structured: Option<serde_json::Value>,
        stage: u8,
    ) -> Self {
        Self {
            id: new_message_id(),
            session_id: session_id.to_string(),
            user_id: None,
            role: MessageRole::Assistant,
            content: content.to_string(),
            structured,
            stage,
            created_at: Utc::now(),
        }
    }

    /// Whether this is the internal stage-completion sentinel
    pub fn is_completion_sentinel(&self) -> bool {
        self.role == MessageRole::Assistant && self.content == STAGE_COMPLETED
    }
}

/// SQLite-backed transcript manager
pub struct TranscriptManager {
    conn: Arc<Mutex<Connection>>,
}

impl TranscriptManager {
    /// Create from shared GroundworkDb connection
    pub fn new(db: &GroundworkDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Append one entry. The transcript is never updated in place.
    pub fn append(&self, entry: &TranscriptEntry) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let structured_json = entry
            .structured
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            r#"
            INSERT INTO chat_messages
            (id, session_id, user_id, role, content, structured_json, stage, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                entry.id,
                entry.session_id,
                entry.user_id,
                entry.role.as_str(),
                entry.content,
                structured_json,
                entry.stage,
                entry.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to append transcript entry")?;

        Ok(())
    }

    /// All entries for a session in insertion order
    pub fn list_for_session(&self, session_id: &str) -> Result<Vec<TranscriptEntry>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, session_id, user_id, role, content, structured_json, stage, created_at
            FROM chat_messages
            WHERE session_id = ?1
            ORDER BY created_at ASC, rowid ASC
            "#,
        )?;

        let entries = stmt
            .query_map(params![session_id], |row| Ok(Self::row_to_entry(row)?))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list transcript entries")?;

        Ok(entries)
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<TranscriptEntry> {
        let structured_json: Option<String> = row.get(5)?;
        let created_at_str: String = row.get(7)?;

        Ok(TranscriptEntry {
            id: row.get(0)?,
            session_id: row.get(1)?,
            user_id: row.get(2)?,
            role: MessageRole::from_str(&row.get::<_, String>(3)?),
            content: row.get(4)?,
            structured: structured_json.and_then(|s| serde_json::from_str(&s).ok()),
            stage: row.get(6)?,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

/// Generate a simple unique message id
fn new_message_id() -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    let salt = RandomState::new().build_hasher().finish() as u32;
    format!("msg-{:x}-{:x}", nanos, salt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_append_and_list_round_trip() {
        let path = ".groundwork/test_transcript.db";
        fs::create_dir_all(".groundwork").ok();
        let _ = fs::remove_file(path);

        let db = GroundworkDb::open_at(path).unwrap();
        let manager = TranscriptManager::new(&db);

        let user = TranscriptEntry::user("sess-1", Some("u-1"), "I want to build a trail app", 1);
        let assistant = TranscriptEntry::assistant(
            "sess-1",
            "What problem does it solve?",
            Some(serde_json::json!({"state": "ongoing"})),
            1,
        );

        manager.append(&user).unwrap();
        manager.append(&assistant).unwrap();

        let entries = manager.list_for_session("sess-1").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, MessageRole::User);
        assert_eq!(entries[0].user_id, Some("u-1".to_string()));
        assert_eq!(entries[1].role, MessageRole::Assistant);
        assert_eq!(
            entries[1].structured.as_ref().unwrap()["state"],
            "ongoing"
        );

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let path = ".groundwork/test_transcript_sessions.db";
        fs::create_dir_all(".groundwork").ok();
        let _ = fs::remove_file(path);

        let db = GroundworkDb::open_at(path).unwrap();
        let manager = TranscriptManager::new(&db);

        manager
            .append(&TranscriptEntry::user("sess-a", None, "hello", 1))
            .unwrap();
        manager
            .append(&TranscriptEntry::user("sess-b", None, "hi", 3))
            .unwrap();

        let in_a = manager.list_for_session("sess-a").unwrap();
        assert_eq!(in_a.len(), 1);
        assert_eq!(in_a[0].stage, 1);
        let in_b = manager.list_for_session("sess-b").unwrap();
        assert_eq!(in_b.len(), 1);
        assert_eq!(in_b[0].stage, 3);
        assert!(manager.list_for_session("sess-c").unwrap().is_empty());

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_completion_sentinel_detection() {
        let sentinel = TranscriptEntry::assistant("sess-1", STAGE_COMPLETED, None, 2);
        assert!(sentinel.is_completion_sentinel());

        let user_echo = TranscriptEntry::user("sess-1", None, STAGE_COMPLETED, 2);
        assert!(!user_echo.is_completion_sentinel());

        let regular = TranscriptEntry::assistant("sess-1", "What's your budget?", None, 6);
        assert!(!regular.is_completion_sentinel());
    }
}
