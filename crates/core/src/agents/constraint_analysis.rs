//! # Constraint Analysis Agent (Stage 6)
//!
//! The reality check: budget, time, tools already paid for, and any assets
//! that can be reused instead of rebuilt.

use crate::agents::StageStatus;
use crate::models::ModelConfig;
use crate::run_llm_function;
use crate::state::idea::{merge_field, IdeaState};
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Structured result of the constraint analysis stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct ConstraintAnalysisState {
    #[serde(default)]
    pub budget_range: Option<String>,
    #[serde(default)]
    pub tools_they_already_use: Option<Vec<String>>,
    #[serde(default)]
    pub time_constraints: Option<String>,
    #[serde(default)]
    pub assets_available: Option<Vec<String>>,
    #[serde(default)]
    pub follow_up_question: Option<String>,
    #[serde(default)]
    pub state: StageStatus,
}

impl ConstraintAnalysisState {
    /// Merge non-null fields into the shared idea state
    pub fn apply_to(&self, idea: &mut IdeaState) {
        merge_field(&mut idea.budget_range, &self.budget_range);
        merge_field(
            &mut idea.tools_they_already_use,
            &self.tools_they_already_use,
        );
        merge_field(&mut idea.time_constraints, &self.time_constraints);
        merge_field(&mut idea.assets_available, &self.assets_available);
    }
}

/// Run the stage over the flattened conversation
pub async fn run(
    conversation: &str,
    config: &ModelConfig,
) -> anyhow::Result<ConstraintAnalysisState> {
    run_llm_function!(config, ConstraintAnalysisState, SYSTEM_PROMPT, conversation)
}

const SYSTEM_PROMPT: &str = include_str!("defaults/constraint_analysis.md");
