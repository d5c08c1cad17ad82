//! # Deep Idea Analysis Agent (Stage 2)
//!
//! Expands the one-liner into a long description, the must-have feature
//! set, and whether something like it already exists.

use crate::agents::StageStatus;
use crate::models::ModelConfig;
use crate::run_llm_function;
use crate::state::idea::{merge_field, IdeaState};
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Structured result of the deep analysis stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct DeepAnalysisState {
    #[serde(default)]
    pub idea_long_description: Option<String>,
    #[serde(default)]
    pub core_features_must_have: Option<Vec<String>>,
    #[serde(default)]
    pub optional_features_good_to_have: Option<Vec<String>>,
    #[serde(default)]
    pub is_product_needed: Option<bool>,
    #[serde(default)]
    pub product_similar_to: Option<String>,
    #[serde(default)]
    pub follow_up_question: Option<String>,
    #[serde(default)]
    pub state: StageStatus,
}

impl DeepAnalysisState {
    /// Merge non-null fields into the shared idea state
    pub fn apply_to(&self, idea: &mut IdeaState) {
        merge_field(&mut idea.idea_long_description, &self.idea_long_description);
        merge_field(
            &mut idea.core_features_must_have,
            &self.core_features_must_have,
        );
        merge_field(
            &mut idea.optional_features_good_to_have,
            &self.optional_features_good_to_have,
        );
        merge_field(&mut idea.is_product_needed, &self.is_product_needed);
        merge_field(&mut idea.product_similar_to, &self.product_similar_to);
    }
}

/// Run the stage over the flattened conversation
pub async fn run(conversation: &str, config: &ModelConfig) -> anyhow::Result<DeepAnalysisState> {
    run_llm_function!(config, DeepAnalysisState, SYSTEM_PROMPT, conversation)
}

const SYSTEM_PROMPT: &str = include_str!("defaults/deep_idea_analysis.md");
