//! # State Management
//!
//! SQLite-backed persistence for everything Groundwork remembers:
//! the conversation transcript, the shared idea state, and the project
//! artifacts the finalization pipeline creates.

pub mod db;
pub mod documents;
pub mod idea;
pub mod projects;
pub mod retry;
pub mod sections;
pub mod transcript;
pub mod users;

pub use db::GroundworkDb;
pub use documents::{DocumentManager, DocumentRecord};
pub use idea::{IdeaState, SharedIdeaState, TeamMember, TechStackPreferences, UserPreferences};
pub use projects::{ProjectManager, ProjectRecord, TaskRecord};
pub use retry::{with_retry, with_retry_policy, RetryPolicy, StoreError};
pub use sections::{SectionManager, SectionRecord};
pub use transcript::{MessageRole, TranscriptEntry, TranscriptManager, STAGE_COMPLETED};
pub use users::{UserManager, UserRecord};
