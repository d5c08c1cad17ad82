//! # Team Profile Agent (Stage 3)
//!
//! Collects who is building this: names, emails, skills and how much
//! execution capacity the team really has. The emails gathered here are
//! what finalization later resolves into stored users.

use crate::agents::StageStatus;
use crate::models::ModelConfig;
use crate::run_llm_function;
use crate::state::idea::{merge_field, IdeaState, TeamMember};
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Structured result of the team profile stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct TeamProfileState {
    #[serde(default)]
    pub team: Option<Vec<TeamMember>>,
    #[serde(default)]
    pub execution_capacity: Option<String>,
    #[serde(default)]
    pub follow_up_question: Option<String>,
    #[serde(default)]
    pub state: StageStatus,
}

impl TeamProfileState {
    /// Merge non-null fields into the shared idea state. The team list is
    /// replaced wholesale when present - agents always return the full
    /// roster, not a delta.
    pub fn apply_to(&self, idea: &mut IdeaState) {
        merge_field(&mut idea.team, &self.team);
        merge_field(&mut idea.execution_capacity, &self.execution_capacity);
    }
}

/// Run the stage over the flattened conversation
pub async fn run(conversation: &str, config: &ModelConfig) -> anyhow::Result<TeamProfileState> {
    run_llm_function!(config, TeamProfileState, SYSTEM_PROMPT, conversation)
}

const SYSTEM_PROMPT: &str = include_str!("defaults/team_profile.md");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_list_replaced_when_present() {
        let mut idea = IdeaState {
            team: Some(vec![TeamMember {
                name: Some("Old Member".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let outcome = TeamProfileState {
            team: Some(vec![
                TeamMember {
                    name: Some("Maya".to_string()),
                    email: Some("maya@example.com".to_string()),
                    profession: Some("Backend engineer".to_string()),
                    ..Default::default()
                },
                TeamMember {
                    name: Some("Jo".to_string()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };
        outcome.apply_to(&mut idea);

        let team = idea.team.unwrap();
        assert_eq!(team.len(), 2);
        assert_eq!(team[0].email, Some("maya@example.com".to_string()));
    }

    #[test]
    fn test_absent_team_keeps_existing() {
        let mut idea = IdeaState {
            team: Some(vec![TeamMember::default()]),
            ..Default::default()
        };

        TeamProfileState {
            execution_capacity: Some("nights and weekends".to_string()),
            ..Default::default()
        }
        .apply_to(&mut idea);

        assert_eq!(idea.team.unwrap().len(), 1);
        assert_eq!(
            idea.execution_capacity,
            Some("nights and weekends".to_string())
        );
    }
}
