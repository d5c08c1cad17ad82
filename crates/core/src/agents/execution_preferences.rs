//! # Execution Preferences Agent (Stage 7)
//!
//! How the team wants to work: sprint format, working style, appetite for
//! risk, and where they want AI to carry the load.

use crate::agents::StageStatus;
use crate::models::ModelConfig;
use crate::run_llm_function;
use crate::state::idea::{merge_field, IdeaState};
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Structured result of the execution preferences stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct ExecutionPreferencesState {
    #[serde(default)]
    pub working_style: Option<String>,
    #[serde(default)]
    pub preferred_sprint_format: Option<String>,
    #[serde(default)]
    pub need_ai_assistance_for: Option<Vec<String>>,
    #[serde(default)]
    pub risk_tolerance: Option<String>,
    #[serde(default)]
    pub follow_up_question: Option<String>,
    #[serde(default)]
    pub state: StageStatus,
}

impl ExecutionPreferencesState {
    /// Merge non-null fields into the shared idea state
    pub fn apply_to(&self, idea: &mut IdeaState) {
        merge_field(&mut idea.working_style, &self.working_style);
        merge_field(
            &mut idea.preferred_sprint_format,
            &self.preferred_sprint_format,
        );
        merge_field(
            &mut idea.need_ai_assistance_for,
            &self.need_ai_assistance_for,
        );
        merge_field(&mut idea.risk_tolerance, &self.risk_tolerance);
    }
}

/// Run the stage over the flattened conversation
pub async fn run(
    conversation: &str,
    config: &ModelConfig,
) -> anyhow::Result<ExecutionPreferencesState> {
    run_llm_function!(config, ExecutionPreferencesState, SYSTEM_PROMPT, conversation)
}

const SYSTEM_PROMPT: &str = include_str!("defaults/execution_preferences.md");
