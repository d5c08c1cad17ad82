//! # Idea Evaluation Agent (Stage 1)
//!
//! Opens the intake: pins down what the idea is, the problem it solves and
//! who it is for, then keeps asking until a short summary can be written.

use crate::agents::StageStatus;
use crate::models::ModelConfig;
use crate::run_llm_function;
use crate::state::idea::{merge_field, IdeaState};
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Structured result of the idea evaluation stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct IdeaEvaluationState {
    #[serde(default)]
    pub idea_title: Option<String>,
    #[serde(default)]
    pub problem_statement: Option<String>,
    #[serde(default)]
    pub target_user: Option<String>,
    #[serde(default)]
    pub idea_summary_short: Option<String>,
    /// Next question for the user; empty once the stage is complete
    #[serde(default)]
    pub follow_up_question: Option<String>,
    #[serde(default)]
    pub state: StageStatus,
}

impl IdeaEvaluationState {
    /// Merge non-null fields into the shared idea state
    pub fn apply_to(&self, idea: &mut IdeaState) {
        merge_field(&mut idea.idea_title, &self.idea_title);
        merge_field(&mut idea.problem_statement, &self.problem_statement);
        merge_field(&mut idea.target_user, &self.target_user);
        merge_field(&mut idea.idea_summary_short, &self.idea_summary_short);
    }
}

/// Run the stage over the flattened conversation
pub async fn run(
    conversation: &str,
    config: &ModelConfig,
) -> anyhow::Result<IdeaEvaluationState> {
    run_llm_function!(config, IdeaEvaluationState, SYSTEM_PROMPT, conversation)
}

const SYSTEM_PROMPT: &str = include_str!("defaults/idea_evaluation.md");
