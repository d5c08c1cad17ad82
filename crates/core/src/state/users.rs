//! # User Manager
//!
//! Stored users resolved during finalization. Team members disclosed in the
//! conversation are matched (or created) by email so project rows can
//! reference stable user ids.

use super::db::GroundworkDb;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// A stored user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed user manager
pub struct UserManager {
    conn: Arc<Mutex<Connection>>,
}

impl UserManager {
    /// Create from shared GroundworkDb connection
    pub fn new(db: &GroundworkDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Look up a user by id
    pub fn get_by_id(&self, id: &str) -> Result<Option<UserRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let user = conn
            .query_row(
                "SELECT id, email, name, created_at FROM users WHERE id = ?1",
                params![id],
                |row| Ok(Self::row_to_user(row)?),
            )
            .optional()
            .context("Failed to look up user by id")?;

        Ok(user)
    }

    /// Look up a user by email
    pub fn get_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let user = conn
            .query_row(
                "SELECT id, email, name, created_at FROM users WHERE email = ?1",
                params![email],
                |row| Ok(Self::row_to_user(row)?),
            )
            .optional()
            .context("Failed to look up user by email")?;

        Ok(user)
    }

    /// Create a user record
    pub fn create(&self, email: Option<&str>, name: Option<&str>) -> Result<UserRecord> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let user = UserRecord {
            id: generate_user_id(),
            email: email.map(|s| s.to_string()),
            name: name.map(|s| s.to_string()),
            created_at: Utc::now(),
        };

        conn.execute(
            "INSERT INTO users (id, email, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                user.id,
                user.email,
                user.name,
                user.created_at.to_rfc3339()
            ],
        )
        .context("Failed to create user")?;

        Ok(user)
    }

    /// Find a user by email, creating one if absent. The name is only used
    /// when a new record is created; an existing record wins as-is.
    pub fn get_or_create_by_email(&self, email: &str, name: Option<&str>) -> Result<UserRecord> {
        if let Some(existing) = self.get_by_email(email)? {
            return Ok(existing);
        }
        self.create(Some(email), name)
    }

    fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<UserRecord> {
        let created_at_str: String = row.get(3)?;
        Ok(UserRecord {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

/// Generate a unique user id
fn generate_user_id() -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    let salt = RandomState::new().build_hasher().finish() as u32;
    format!("usr-{:x}-{:x}", nanos, salt)
}
