//! # Stage Agents
//!
//! One typed agent per intake stage, plus the sprint planner and the
//! narrative writer used after completion. Each conversational agent maps
//! the dialogue so far to a closed structured outcome: the stage's fields,
//! a follow-up question, and an ongoing/completed verdict.

pub mod business_goals;
pub mod constraint_analysis;
pub mod deep_analysis;
pub mod execution_preferences;
pub mod idea_evaluation;
pub mod llm_helpers;
pub mod market_competition;
pub mod narrative;
pub mod sprint_planner;
pub mod team_profile;
pub mod tech_implementation;

pub use business_goals::BusinessGoalsState;
pub use constraint_analysis::ConstraintAnalysisState;
pub use deep_analysis::DeepAnalysisState;
pub use execution_preferences::ExecutionPreferencesState;
pub use idea_evaluation::IdeaEvaluationState;
pub use market_competition::MarketCompetitionState;
pub use narrative::{
    LlmNarrativeWriter, NarrativeCategory, NarrativeSection, NarrativeWriter, SECTION_KIND_TEXT,
};
pub use sprint_planner::{LlmSprintPlanner, SprintPlanner, SprintTask, SprintWeek, TaskPriority};
pub use team_profile::TeamProfileState;
pub use tech_implementation::TechImplementationState;

use crate::models::ModelConfig;
use crate::state::idea::IdeaState;
use async_trait::async_trait;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// The fixed intake sequence. Stages 1-8 are conversational; stage 9 only
/// triggers the finalization pipeline and never talks to an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    IdeaEvaluation,
    DeepAnalysis,
    TeamProfile,
    BusinessGoals,
    MarketCompetition,
    ConstraintAnalysis,
    ExecutionPreferences,
    TechImplementation,
    Completion,
}

impl Stage {
    /// Wire/storage stage number (1-9)
    pub fn number(&self) -> u8 {
        match self {
            Self::IdeaEvaluation => 1,
            Self::DeepAnalysis => 2,
            Self::TeamProfile => 3,
            Self::BusinessGoals => 4,
            Self::MarketCompetition => 5,
            Self::ConstraintAnalysis => 6,
            Self::ExecutionPreferences => 7,
            Self::TechImplementation => 8,
            Self::Completion => 9,
        }
    }

    pub fn from_number(n: u8) -> Option<Stage> {
        match n {
            1 => Some(Self::IdeaEvaluation),
            2 => Some(Self::DeepAnalysis),
            3 => Some(Self::TeamProfile),
            4 => Some(Self::BusinessGoals),
            5 => Some(Self::MarketCompetition),
            6 => Some(Self::ConstraintAnalysis),
            7 => Some(Self::ExecutionPreferences),
            8 => Some(Self::TechImplementation),
            9 => Some(Self::Completion),
            _ => None,
        }
    }

    /// The stage after this one, if any
    pub fn next(&self) -> Option<Stage> {
        Self::from_number(self.number() + 1)
    }

    pub fn is_conversational(&self) -> bool {
        !matches!(self, Self::Completion)
    }

    /// Stable key used for prompts, logs and per-stage model overrides
    pub fn key(&self) -> &'static str {
        match self {
            Self::IdeaEvaluation => "idea_evaluation",
            Self::DeepAnalysis => "deep_idea_analysis",
            Self::TeamProfile => "team_profile",
            Self::BusinessGoals => "business_goals",
            Self::MarketCompetition => "market_competition",
            Self::ConstraintAnalysis => "constraint_analysis",
            Self::ExecutionPreferences => "execution_preferences",
            Self::TechImplementation => "technology_implementation",
            Self::Completion => "completion",
        }
    }

    /// All conversational stages in order
    pub fn conversational() -> [Stage; 8] {
        [
            Self::IdeaEvaluation,
            Self::DeepAnalysis,
            Self::TeamProfile,
            Self::BusinessGoals,
            Self::MarketCompetition,
            Self::ConstraintAnalysis,
            Self::ExecutionPreferences,
            Self::TechImplementation,
        ]
    }
}

/// Whether an agent considers its stage finished
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, LLMOutput,
)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Ongoing,
    Completed,
}

/// Who authored an in-memory conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    /// Synthesized context (the greeting carrying known idea state)
    Context,
}

impl TurnRole {
    fn label(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
            Self::Context => "Context",
        }
    }
}

/// One in-memory message handed to a stage agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }

    pub fn context(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Context,
            content: content.into(),
        }
    }
}

/// Render turns into the single prompt string the LLM functions take
pub fn flatten_turns(turns: &[ChatTurn]) -> String {
    turns
        .iter()
        .map(|turn| format!("{}: {}", turn.role.label(), turn.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Closed set of structured results a conversational stage can produce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageOutcome {
    IdeaEvaluation(IdeaEvaluationState),
    DeepAnalysis(DeepAnalysisState),
    TeamProfile(TeamProfileState),
    BusinessGoals(BusinessGoalsState),
    MarketCompetition(MarketCompetitionState),
    ConstraintAnalysis(ConstraintAnalysisState),
    ExecutionPreferences(ExecutionPreferencesState),
    TechImplementation(TechImplementationState),
}

impl StageOutcome {
    /// The stage this outcome belongs to
    pub fn stage(&self) -> Stage {
        match self {
            Self::IdeaEvaluation(_) => Stage::IdeaEvaluation,
            Self::DeepAnalysis(_) => Stage::DeepAnalysis,
            Self::TeamProfile(_) => Stage::TeamProfile,
            Self::BusinessGoals(_) => Stage::BusinessGoals,
            Self::MarketCompetition(_) => Stage::MarketCompetition,
            Self::ConstraintAnalysis(_) => Stage::ConstraintAnalysis,
            Self::ExecutionPreferences(_) => Stage::ExecutionPreferences,
            Self::TechImplementation(_) => Stage::TechImplementation,
        }
    }

    pub fn status(&self) -> StageStatus {
        match self {
            Self::IdeaEvaluation(s) => s.state,
            Self::DeepAnalysis(s) => s.state,
            Self::TeamProfile(s) => s.state,
            Self::BusinessGoals(s) => s.state,
            Self::MarketCompetition(s) => s.state,
            Self::ConstraintAnalysis(s) => s.state,
            Self::ExecutionPreferences(s) => s.state,
            Self::TechImplementation(s) => s.state,
        }
    }

    /// The next question to ask the user; empty once the stage completed
    pub fn follow_up(&self) -> &str {
        let question = match self {
            Self::IdeaEvaluation(s) => &s.follow_up_question,
            Self::DeepAnalysis(s) => &s.follow_up_question,
            Self::TeamProfile(s) => &s.follow_up_question,
            Self::BusinessGoals(s) => &s.follow_up_question,
            Self::MarketCompetition(s) => &s.follow_up_question,
            Self::ConstraintAnalysis(s) => &s.follow_up_question,
            Self::ExecutionPreferences(s) => &s.follow_up_question,
            Self::TechImplementation(s) => &s.follow_up_question,
        };
        question.as_deref().unwrap_or("")
    }

    /// Merge this outcome's non-null fields into the idea state
    pub fn apply_to(&self, idea: &mut IdeaState) {
        match self {
            Self::IdeaEvaluation(s) => s.apply_to(idea),
            Self::DeepAnalysis(s) => s.apply_to(idea),
            Self::TeamProfile(s) => s.apply_to(idea),
            Self::BusinessGoals(s) => s.apply_to(idea),
            Self::MarketCompetition(s) => s.apply_to(idea),
            Self::ConstraintAnalysis(s) => s.apply_to(idea),
            Self::ExecutionPreferences(s) => s.apply_to(idea),
            Self::TechImplementation(s) => s.apply_to(idea),
        }
    }

    /// Plain JSON of the inner stage fields, stored on the transcript row.
    /// The stage itself is carried by the row's stage column.
    pub fn to_json(&self) -> serde_json::Value {
        let result = match self {
            Self::IdeaEvaluation(s) => serde_json::to_value(s),
            Self::DeepAnalysis(s) => serde_json::to_value(s),
            Self::TeamProfile(s) => serde_json::to_value(s),
            Self::BusinessGoals(s) => serde_json::to_value(s),
            Self::MarketCompetition(s) => serde_json::to_value(s),
            Self::ConstraintAnalysis(s) => serde_json::to_value(s),
            Self::ExecutionPreferences(s) => serde_json::to_value(s),
            Self::TechImplementation(s) => serde_json::to_value(s),
        };
        result.unwrap_or_else(|_| serde_json::Value::Null)
    }

    /// Parse a stored structured payload back into the right stage's type.
    /// Fails on shapes that do not fit the stage's closed field set.
    pub fn from_json(stage: Stage, value: &serde_json::Value) -> anyhow::Result<StageOutcome> {
        let value = value.clone();
        let outcome = match stage {
            Stage::IdeaEvaluation => Self::IdeaEvaluation(serde_json::from_value(value)?),
            Stage::DeepAnalysis => Self::DeepAnalysis(serde_json::from_value(value)?),
            Stage::TeamProfile => Self::TeamProfile(serde_json::from_value(value)?),
            Stage::BusinessGoals => Self::BusinessGoals(serde_json::from_value(value)?),
            Stage::MarketCompetition => Self::MarketCompetition(serde_json::from_value(value)?),
            Stage::ConstraintAnalysis => Self::ConstraintAnalysis(serde_json::from_value(value)?),
            Stage::ExecutionPreferences => {
                Self::ExecutionPreferences(serde_json::from_value(value)?)
            }
            Stage::TechImplementation => Self::TechImplementation(serde_json::from_value(value)?),
            Stage::Completion => {
                anyhow::bail!("Stage 9 has no conversational outcome")
            }
        };
        Ok(outcome)
    }
}

/// A conversational stage handler. Stateless across calls: everything the
/// agent knows arrives through the turns.
#[async_trait]
pub trait StageAgent: Send + Sync {
    /// Which stage this agent serves
    fn stage(&self) -> Stage;

    /// Map the conversation so far to a structured stage outcome
    async fn invoke(&self, turns: &[ChatTurn]) -> anyhow::Result<StageOutcome>;
}

/// LLM-backed agent for one conversational stage
pub struct LlmStageAgent {
    stage: Stage,
    config: ModelConfig,
}

impl LlmStageAgent {
    pub fn new(stage: Stage, config: ModelConfig) -> Self {
        Self { stage, config }
    }
}

#[async_trait]
impl StageAgent for LlmStageAgent {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn invoke(&self, turns: &[ChatTurn]) -> anyhow::Result<StageOutcome> {
        let conversation = flatten_turns(turns);
        let config = self.config.for_stage(self.stage.key());

        let outcome = match self.stage {
            Stage::IdeaEvaluation => {
                StageOutcome::IdeaEvaluation(idea_evaluation::run(&conversation, &config).await?)
            }
            Stage::DeepAnalysis => {
                StageOutcome::DeepAnalysis(deep_analysis::run(&conversation, &config).await?)
            }
            Stage::TeamProfile => {
                StageOutcome::TeamProfile(team_profile::run(&conversation, &config).await?)
            }
            Stage::BusinessGoals => {
                StageOutcome::BusinessGoals(business_goals::run(&conversation, &config).await?)
            }
            Stage::MarketCompetition => StageOutcome::MarketCompetition(
                market_competition::run(&conversation, &config).await?,
            ),
            Stage::ConstraintAnalysis => StageOutcome::ConstraintAnalysis(
                constraint_analysis::run(&conversation, &config).await?,
            ),
            Stage::ExecutionPreferences => StageOutcome::ExecutionPreferences(
                execution_preferences::run(&conversation, &config).await?,
            ),
            Stage::TechImplementation => StageOutcome::TechImplementation(
                tech_implementation::run(&conversation, &config).await?,
            ),
            Stage::Completion => {
                anyhow::bail!("Stage 9 is pipeline-driven and has no agent")
            }
        };

        Ok(outcome)
    }
}

/// The set of agents the orchestrator routes turns to
#[derive(Clone, Default)]
pub struct AgentRoster {
    agents: HashMap<Stage, Arc<dyn StageAgent>>,
}

impl AgentRoster {
    /// Empty roster; add agents with [`AgentRoster::with_agent`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Full LLM roster, one agent per conversational stage
    pub fn llm(config: &ModelConfig) -> Self {
        let mut roster = Self::new();
        for stage in Stage::conversational() {
            roster = roster.with_agent(Arc::new(LlmStageAgent::new(stage, config.clone())));
        }
        roster
    }

    pub fn with_agent(mut self, agent: Arc<dyn StageAgent>) -> Self {
        self.agents.insert(agent.stage(), agent);
        self
    }

    pub fn agent_for(&self, stage: Stage) -> Option<Arc<dyn StageAgent>> {
        self.agents.get(&stage).cloned()
    }
}
