//! # Market & Competition Agent (Stage 5)
//!
//! Who else is solving this, how big the market might be, and what the
//! user has actually validated versus assumed.

use crate::agents::StageStatus;
use crate::models::ModelConfig;
use crate::run_llm_function;
use crate::state::idea::{merge_field, IdeaState};
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Structured result of the market and competition stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct MarketCompetitionState {
    #[serde(default)]
    pub market_size_assumption: Option<String>,
    #[serde(default)]
    pub primary_competitors: Option<Vec<String>>,
    #[serde(default)]
    pub competitive_advantage: Option<String>,
    #[serde(default)]
    pub user_pain_points_from_research: Option<Vec<String>>,
    #[serde(default)]
    pub validation_status: Option<String>,
    #[serde(default)]
    pub follow_up_question: Option<String>,
    #[serde(default)]
    pub state: StageStatus,
}

impl MarketCompetitionState {
    /// Merge non-null fields into the shared idea state
    pub fn apply_to(&self, idea: &mut IdeaState) {
        merge_field(
            &mut idea.market_size_assumption,
            &self.market_size_assumption,
        );
        merge_field(&mut idea.primary_competitors, &self.primary_competitors);
        merge_field(&mut idea.competitive_advantage, &self.competitive_advantage);
        merge_field(
            &mut idea.user_pain_points_from_research,
            &self.user_pain_points_from_research,
        );
        merge_field(&mut idea.validation_status, &self.validation_status);
    }
}

/// Run the stage over the flattened conversation
pub async fn run(
    conversation: &str,
    config: &ModelConfig,
) -> anyhow::Result<MarketCompetitionState> {
    run_llm_function!(config, MarketCompetitionState, SYSTEM_PROMPT, conversation)
}

const SYSTEM_PROMPT: &str = include_str!("defaults/market_competition.md");
