//! # Technology & Implementation Agent (Stage 8)
//!
//! The last conversational stage: required tech, preferred stack,
//! integrations, and the data the MVP cannot ship without. Completing this
//! stage hands the session to the finalization pipeline.

use crate::agents::StageStatus;
use crate::models::ModelConfig;
use crate::run_llm_function;
use crate::state::idea::{merge_field, IdeaState};
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Structured result of the technology and implementation stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct TechImplementationState {
    #[serde(default)]
    pub tech_required: Option<Vec<String>>,
    #[serde(default)]
    pub preferred_frontend: Option<String>,
    #[serde(default)]
    pub preferred_backend: Option<String>,
    #[serde(default)]
    pub preferred_database: Option<String>,
    #[serde(default)]
    pub ai_models: Option<String>,
    #[serde(default)]
    pub cloud: Option<String>,
    #[serde(default)]
    pub integrations_needed: Option<Vec<String>>,
    #[serde(default)]
    pub data_needed_for_mvp: Option<Vec<String>>,
    #[serde(default)]
    pub constraints: Option<Vec<String>>,
    #[serde(default)]
    pub follow_up_question: Option<String>,
    #[serde(default)]
    pub state: StageStatus,
}

impl TechImplementationState {
    /// Merge non-null fields into the shared idea state. The five stack
    /// answers land in the nested tech-stack preference object.
    pub fn apply_to(&self, idea: &mut IdeaState) {
        merge_field(&mut idea.tech_required, &self.tech_required);
        merge_field(&mut idea.integrations_needed, &self.integrations_needed);
        merge_field(&mut idea.data_needed_for_mvp, &self.data_needed_for_mvp);
        merge_field(&mut idea.constraints, &self.constraints);

        if self.has_stack_fields() {
            let stack = idea.preferred_tech_stack.get_or_insert_with(Default::default);
            merge_field(&mut stack.frontend, &self.preferred_frontend);
            merge_field(&mut stack.backend, &self.preferred_backend);
            merge_field(&mut stack.database, &self.preferred_database);
            merge_field(&mut stack.ai_models, &self.ai_models);
            merge_field(&mut stack.cloud, &self.cloud);
        }
    }

    fn has_stack_fields(&self) -> bool {
        self.preferred_frontend.is_some()
            || self.preferred_backend.is_some()
            || self.preferred_database.is_some()
            || self.ai_models.is_some()
            || self.cloud.is_some()
    }
}

/// Run the stage over the flattened conversation
pub async fn run(
    conversation: &str,
    config: &ModelConfig,
) -> anyhow::Result<TechImplementationState> {
    run_llm_function!(config, TechImplementationState, SYSTEM_PROMPT, conversation)
}

const SYSTEM_PROMPT: &str = include_str!("defaults/technology_implementation.md");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_answers_group_into_nested_object() {
        let mut idea = IdeaState::default();

        TechImplementationState {
            preferred_frontend: Some("Next.js".to_string()),
            preferred_database: Some("Postgres".to_string()),
            ..Default::default()
        }
        .apply_to(&mut idea);

        let stack = idea.preferred_tech_stack.clone().unwrap();
        assert_eq!(stack.frontend, Some("Next.js".to_string()));
        assert_eq!(stack.database, Some("Postgres".to_string()));
        assert_eq!(stack.backend, None);

        // A later partial answer fills gaps without clearing earlier ones
        TechImplementationState {
            preferred_backend: Some("FastAPI".to_string()),
            ..Default::default()
        }
        .apply_to(&mut idea);

        let stack = idea.preferred_tech_stack.unwrap();
        assert_eq!(stack.frontend, Some("Next.js".to_string()));
        assert_eq!(stack.backend, Some("FastAPI".to_string()));
    }

    #[test]
    fn test_no_stack_answers_leaves_state_untouched() {
        let mut idea = IdeaState::default();
        TechImplementationState {
            tech_required: Some(vec!["auth".to_string()]),
            ..Default::default()
        }
        .apply_to(&mut idea);

        assert!(idea.preferred_tech_stack.is_none());
        assert_eq!(idea.tech_required, Some(vec!["auth".to_string()]));
    }
}
