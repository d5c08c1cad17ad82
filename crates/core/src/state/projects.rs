//! # Project and Task Manager
//!
//! Rows created by the finalization pipeline: the project record itself and
//! its dated sprint tasks. Task keys look like `PROJ-1A2B3C4D-SP-17`; the
//! trailing number comes from one counter shared by every project so keys
//! stay unique even across projects.

use super::db::GroundworkDb;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Counter name for sprint task keys
const TASK_COUNTER: &str = "sprint_task";

/// A created project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub key: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_user_id: Option<String>,
    pub team_user_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A sprint task row; sub-tasks reference their parent via `parent_task_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub project_id: String,
    pub key: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: String,
    pub priority: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reporter_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sprint_week: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TaskRecord {
    /// New task with defaults; callers fill in dates, assignee and parent
    pub fn new(project_id: &str, key: &str, title: &str) -> Self {
        Self {
            id: generate_task_id(),
            project_id: project_id.to_string(),
            key: key.to_string(),
            title: title.to_string(),
            description: None,
            status: "todo".to_string(),
            priority: "Medium".to_string(),
            assignee_id: None,
            reporter_id: None,
            parent_task_id: None,
            sprint_week: None,
            start_date: None,
            due_date: None,
            created_at: Utc::now(),
        }
    }
}

/// SQLite-backed project and task manager
pub struct ProjectManager {
    conn: Arc<Mutex<Connection>>,
}

impl ProjectManager {
    /// Create from shared GroundworkDb connection
    pub fn new(db: &GroundworkDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Create a project with a fresh short key
    pub fn create_project(
        &self,
        name: &str,
        description: Option<&str>,
        lead_user_id: Option<&str>,
        team_user_ids: &[String],
    ) -> Result<ProjectRecord> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let project = ProjectRecord {
            id: generate_project_id(),
            key: generate_project_key(),
            name: name.to_string(),
            description: description.map(|s| s.to_string()),
            status: "active".to_string(),
            lead_user_id: lead_user_id.map(|s| s.to_string()),
            team_user_ids: team_user_ids.to_vec(),
            created_at: Utc::now(),
        };

        let team_json = serde_json::to_string(&project.team_user_ids)?;

        conn.execute(
            r#"
            INSERT INTO projects
            (id, key, name, description, status, lead_user_id, team_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                project.id,
                project.key,
                project.name,
                project.description,
                project.status,
                project.lead_user_id,
                team_json,
                project.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to create project")?;

        Ok(project)
    }

    /// Load a project by id
    pub fn get_project(&self, id: &str) -> Result<Option<ProjectRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let project = conn
            .query_row(
                "SELECT id, key, name, description, status, lead_user_id, team_json, created_at
                 FROM projects WHERE id = ?1",
                params![id],
                |row| Ok(Self::row_to_project(row)?),
            )
            .optional()
            .context("Failed to load project")?;

        Ok(project)
    }

    /// Next value of the shared task-key counter (starts at 1)
    pub fn next_task_number(&self) -> Result<i64> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "INSERT INTO counters (name, value) VALUES (?1, 1)
             ON CONFLICT(name) DO UPDATE SET value = value + 1",
            params![TASK_COUNTER],
        )?;

        let value: i64 = conn.query_row(
            "SELECT value FROM counters WHERE name = ?1",
            params![TASK_COUNTER],
            |row| row.get(0),
        )?;

        Ok(value)
    }

    /// Persist one task row
    pub fn save_task(&self, task: &TaskRecord) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            r#"
            INSERT INTO tasks
            (id, project_id, key, title, description, status, priority, assignee_id,
             reporter_id, parent_task_id, sprint_week, start_date, due_date, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                task.id,
                task.project_id,
                task.key,
                task.title,
                task.description,
                task.status,
                task.priority,
                task.assignee_id,
                task.reporter_id,
                task.parent_task_id,
                task.sprint_week,
                task.start_date.map(|t| t.to_rfc3339()),
                task.due_date.map(|t| t.to_rfc3339()),
                task.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to save task")?;

        Ok(())
    }

    /// All tasks of a project in key-counter order
    pub fn list_tasks_for_project(&self, project_id: &str) -> Result<Vec<TaskRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT id, project_id, key, title, description, status, priority, assignee_id,
                    reporter_id, parent_task_id, sprint_week, start_date, due_date, created_at
             FROM tasks WHERE project_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;

        let tasks = stmt
            .query_map(params![project_id], |row| Ok(Self::row_to_task(row)?))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list tasks")?;

        Ok(tasks)
    }

    fn row_to_project(row: &rusqlite::Row) -> rusqlite::Result<ProjectRecord> {
        let team_json: String = row.get(6)?;
        let created_at_str: String = row.get(7)?;
        Ok(ProjectRecord {
            id: row.get(0)?,
            key: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            status: row.get(4)?,
            lead_user_id: row.get(5)?,
            team_user_ids: serde_json::from_str(&team_json).unwrap_or_default(),
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<TaskRecord> {
        let start_date_str: Option<String> = row.get(11)?;
        let due_date_str: Option<String> = row.get(12)?;
        let created_at_str: String = row.get(13)?;

        let parse = |s: String| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .ok()
        };

        Ok(TaskRecord {
            id: row.get(0)?,
            project_id: row.get(1)?,
            key: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            status: row.get(5)?,
            priority: row.get(6)?,
            assignee_id: row.get(7)?,
            reporter_id: row.get(8)?,
            parent_task_id: row.get(9)?,
            sprint_week: row.get(10)?,
            start_date: start_date_str.and_then(parse),
            due_date: due_date_str.and_then(parse),
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

/// Generate a unique project id
fn generate_project_id() -> String {
    format!("proj-{}", unique_suffix())
}

/// Generate a short human-facing project key like `PROJ-1A2B3C4D`
fn generate_project_key() -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64;
    let salt = RandomState::new().build_hasher().finish();
    format!("PROJ-{:08X}", (nanos ^ salt) as u32)
}

/// Generate a unique task id
fn generate_task_id() -> String {
    format!("task-{}", unique_suffix())
}

fn unique_suffix() -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    let salt = RandomState::new().build_hasher().finish() as u32;
    format!("{:x}-{:x}", nanos, salt)
}
