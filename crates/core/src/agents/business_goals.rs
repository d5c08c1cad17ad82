//! # Business Goals Agent (Stage 4)
//!
//! What does the next month need to prove? Captures the 4-week goal, how
//! the product earns, where it launches and which numbers define success.

use crate::agents::StageStatus;
use crate::models::ModelConfig;
use crate::run_llm_function;
use crate::state::idea::{merge_field, IdeaState};
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Structured result of the business goals stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct BusinessGoalsState {
    #[serde(default)]
    pub primary_goal_for_4_weeks: Option<String>,
    #[serde(default)]
    pub monetization_model: Option<String>,
    #[serde(default)]
    pub launch_channel: Option<Vec<String>>,
    #[serde(default)]
    pub kpi_for_success: Option<Vec<String>>,
    #[serde(default)]
    pub follow_up_question: Option<String>,
    #[serde(default)]
    pub state: StageStatus,
}

impl BusinessGoalsState {
    /// Merge non-null fields into the shared idea state
    pub fn apply_to(&self, idea: &mut IdeaState) {
        merge_field(
            &mut idea.primary_goal_for_4_weeks,
            &self.primary_goal_for_4_weeks,
        );
        merge_field(&mut idea.monetization_model, &self.monetization_model);
        merge_field(&mut idea.launch_channel, &self.launch_channel);
        merge_field(&mut idea.kpi_for_success, &self.kpi_for_success);
    }
}

/// Run the stage over the flattened conversation
pub async fn run(conversation: &str, config: &ModelConfig) -> anyhow::Result<BusinessGoalsState> {
    run_llm_function!(config, BusinessGoalsState, SYSTEM_PROMPT, conversation)
}

const SYSTEM_PROMPT: &str = include_str!("defaults/business_goals.md");
