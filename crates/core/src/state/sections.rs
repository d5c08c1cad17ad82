//! # Section Manager
//!
//! Narrative workspace sections. The background job persists each category's
//! sections as soon as they are generated, so a failed category never costs
//! the ones already written.

use super::db::GroundworkDb;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// A persisted narrative section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionRecord {
    pub id: String,
    pub project_id: String,
    pub category: String,
    pub name: String,
    pub kind: String,
    pub content: String,
    pub position: u32,
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed section manager
pub struct SectionManager {
    conn: Arc<Mutex<Connection>>,
}

impl SectionManager {
    /// Create from shared GroundworkDb connection
    pub fn new(db: &GroundworkDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Persist one section row
    pub fn create(
        &self,
        project_id: &str,
        category: &str,
        name: &str,
        kind: &str,
        content: &str,
        position: u32,
    ) -> Result<SectionRecord> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let section = SectionRecord {
            id: generate_section_id(),
            project_id: project_id.to_string(),
            category: category.to_string(),
            name: name.to_string(),
            kind: kind.to_string(),
            content: content.to_string(),
            position,
            created_at: Utc::now(),
        };

        conn.execute(
            "INSERT INTO project_sections
             (id, project_id, category, name, kind, content, position, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                section.id,
                section.project_id,
                section.category,
                section.name,
                section.kind,
                section.content,
                section.position,
                section.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to create section")?;

        Ok(section)
    }

    /// All sections of a project, in category then position order
    pub fn list_for_project(&self, project_id: &str) -> Result<Vec<SectionRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT id, project_id, category, name, kind, content, position, created_at
             FROM project_sections WHERE project_id = ?1
             ORDER BY category ASC, position ASC",
        )?;

        let sections = stmt
            .query_map(params![project_id], |row| Ok(Self::row_to_section(row)?))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list sections")?;

        Ok(sections)
    }

    fn row_to_section(row: &rusqlite::Row) -> rusqlite::Result<SectionRecord> {
        let created_at_str: String = row.get(7)?;
        Ok(SectionRecord {
            id: row.get(0)?,
            project_id: row.get(1)?,
            category: row.get(2)?,
            name: row.get(3)?,
            kind: row.get(4)?,
            content: row.get(5)?,
            position: row.get(6)?,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

/// Generate a unique section id
fn generate_section_id() -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    let salt = RandomState::new().build_hasher().finish() as u32;
    format!("sec-{:x}-{:x}", nanos, salt)
}
