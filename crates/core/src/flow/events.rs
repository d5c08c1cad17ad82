//! # Completion Events
//!
//! Structured progress events streamed while the finalization pipeline
//! runs. Events are emitted in strict pipeline order and never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which pipeline step an event belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionEventKind {
    /// Team members resolved to backing user records
    TeamMembersSynced,
    /// Project record created
    ProjectCreated,
    /// Session documents relinked to the project
    SourcesUpdated,
    /// Task schedule generated and persisted
    SprintPlanGenerated,
    /// Background narrative job detached
    NarrativeSectionsStarted,
    /// Whole pipeline finished
    Completed,
    /// Pipeline aborted
    Error,
}

/// Step lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Started,
    Completed,
    Failed,
}

/// One event in a finalization run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEvent {
    /// Unique event ID
    pub id: String,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Step this event belongs to
    #[serde(rename = "type")]
    pub kind: CompletionEventKind,
    /// Step lifecycle status
    pub status: EventStatus,
    /// Created project, once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Failure description on error events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl CompletionEvent {
    /// Create a new event
    pub fn new(kind: CompletionEventKind, status: EventStatus) -> Self {
        Self {
            id: event_id(),
            timestamp: Utc::now(),
            kind,
            status,
            project_id: None,
            error_detail: None,
        }
    }

    /// A step's opening event
    pub fn started(kind: CompletionEventKind) -> Self {
        Self::new(kind, EventStatus::Started)
    }

    /// A step's closing event
    pub fn completed(kind: CompletionEventKind) -> Self {
        Self::new(kind, EventStatus::Completed)
    }

    /// Attach the created project id
    pub fn with_project(mut self, project_id: &str) -> Self {
        self.project_id = Some(project_id.to_string());
        self
    }

    /// Attach a failure description
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }
}

/// Generate a simple unique event id
fn event_id() -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    let salt = RandomState::new().build_hasher().finish() as u32;
    format!("evt-{:x}-{:x}", nanos, salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = CompletionEvent::completed(CompletionEventKind::ProjectCreated)
            .with_project("proj-123");

        assert_eq!(event.kind, CompletionEventKind::ProjectCreated);
        assert_eq!(event.status, EventStatus::Completed);
        assert_eq!(event.project_id, Some("proj-123".to_string()));
    }

    #[test]
    fn test_kind_serializes_under_type_key() {
        let event = CompletionEvent::started(CompletionEventKind::TeamMembersSynced);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "team_members_synced");
        assert_eq!(json["status"], "started");
        assert!(json.get("project_id").is_none());
        assert!(json.get("error_detail").is_none());
    }

    #[test]
    fn test_error_event_carries_detail() {
        let event = CompletionEvent::new(CompletionEventKind::Error, EventStatus::Failed)
            .with_detail("No project title available");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "error");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error_detail"], "No project title available");
    }
}
