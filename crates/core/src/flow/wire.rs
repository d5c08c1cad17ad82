//! # Wire Types
//!
//! Request/response shapes for the streaming chat endpoint. Every response
//! is one self-contained JSON object; the server writes one per line.

use crate::flow::events::CompletionEvent;
use crate::state::{MessageRole, TranscriptEntry, UserPreferences};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection status carried on every request and response line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Session handshake: replay history, no agent call
    Started,
    /// A normal conversational turn
    Active,
    /// Finalization pipeline event line
    EventsStreaming,
    /// Finalization finished (or session already past it)
    EventsCompleted,
    /// Turn-level failure
    Error,
}

/// One incoming turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub connection_status: ConnectionStatus,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
    pub idea_state_stage: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_preferences: Option<UserPreferences>,
}

/// A transcript entry as the client sees it (sentinels already filtered)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub stage: u8,
    pub created_at: DateTime<Utc>,
}

impl TranscriptMessage {
    pub fn from_entry(entry: &TranscriptEntry) -> Self {
        Self {
            id: entry.id.clone(),
            role: entry.role,
            content: entry.content.clone(),
            stage: entry.stage,
            created_at: entry.created_at,
        }
    }

    /// Replay view of a transcript: completion sentinels are internal
    /// bookkeeping and never shown to the user.
    pub fn replay(entries: &[TranscriptEntry]) -> Vec<TranscriptMessage> {
        entries
            .iter()
            .filter(|e| !e.is_completion_sentinel())
            .map(TranscriptMessage::from_entry)
            .collect()
    }
}

/// One outgoing response line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub connection_status: ConnectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<TranscriptMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub idea_state_stage: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<CompletionEvent>,
}

impl ChatResponse {
    fn base(status: ConnectionStatus, stage: u8) -> Self {
        Self {
            connection_status: status,
            messages: None,
            response_content: None,
            formatted_output: None,
            error_message: None,
            idea_state_stage: stage,
            event: None,
        }
    }

    /// Handshake reply carrying the replayed transcript
    pub fn started(stage: u8, messages: Vec<TranscriptMessage>) -> Self {
        Self {
            messages: Some(messages),
            ..Self::base(ConnectionStatus::Started, stage)
        }
    }

    /// Normal conversational reply
    pub fn active(stage: u8, content: impl Into<String>) -> Self {
        Self {
            response_content: Some(content.into()),
            ..Self::base(ConnectionStatus::Active, stage)
        }
    }

    /// One finalization pipeline event
    pub fn streaming_event(stage: u8, event: CompletionEvent) -> Self {
        Self {
            event: Some(event),
            ..Self::base(ConnectionStatus::EventsStreaming, stage)
        }
    }

    /// Terminal line after finalization (or for already-finalized sessions)
    pub fn events_completed(stage: u8, content: impl Into<String>) -> Self {
        Self {
            response_content: Some(content.into()),
            ..Self::base(ConnectionStatus::EventsCompleted, stage)
        }
    }

    /// Turn-level failure line
    pub fn error(stage: u8, message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::base(ConnectionStatus::Error, stage)
        }
    }

    /// Attach the filtered state rendering the client shows alongside a reply
    pub fn with_formatted_output(mut self, output: serde_json::Value) -> Self {
        self.formatted_output = Some(output);
        self
    }
}
