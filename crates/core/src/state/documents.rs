//! # Document Manager
//!
//! Documents uploaded while the conversation runs are stored against the
//! session. Once finalization creates the project, they are relinked to it
//! one by one.

use super::db::GroundworkDb;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// A stored document reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub title: String,
    pub trashed: bool,
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed document manager
pub struct DocumentManager {
    conn: Arc<Mutex<Connection>>,
}

impl DocumentManager {
    /// Create from shared GroundworkDb connection
    pub fn new(db: &GroundworkDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Record a document against a session
    pub fn create(&self, session_id: &str, title: &str) -> Result<DocumentRecord> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let doc = DocumentRecord {
            id: generate_document_id(),
            session_id: session_id.to_string(),
            project_id: None,
            title: title.to_string(),
            trashed: false,
            created_at: Utc::now(),
        };

        conn.execute(
            "INSERT INTO documents (id, session_id, project_id, title, trashed, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![
                doc.id,
                doc.session_id,
                doc.project_id,
                doc.title,
                doc.created_at.to_rfc3339()
            ],
        )
        .context("Failed to create document")?;

        Ok(doc)
    }

    /// Non-trashed documents attached to a session, oldest first
    pub fn list_for_session(&self, session_id: &str) -> Result<Vec<DocumentRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT id, session_id, project_id, title, trashed, created_at
             FROM documents WHERE session_id = ?1 AND trashed = 0
             ORDER BY created_at ASC",
        )?;

        let docs = stmt
            .query_map(params![session_id], |row| Ok(Self::row_to_document(row)?))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list documents")?;

        Ok(docs)
    }

    /// Point one document at the given project
    pub fn relink_to_project(&self, document_id: &str, project_id: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let affected = conn.execute(
            "UPDATE documents SET project_id = ?1 WHERE id = ?2",
            params![project_id, document_id],
        )?;

        if affected == 0 {
            anyhow::bail!("Document not found: {}", document_id);
        }

        Ok(())
    }

    fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<DocumentRecord> {
        let trashed: i64 = row.get(4)?;
        let created_at_str: String = row.get(5)?;
        Ok(DocumentRecord {
            id: row.get(0)?,
            session_id: row.get(1)?,
            project_id: row.get(2)?,
            title: row.get(3)?,
            trashed: trashed != 0,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

/// Generate a unique document id
fn generate_document_id() -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    let salt = RandomState::new().build_hasher().finish() as u32;
    format!("doc-{:x}-{:x}", nanos, salt)
}
