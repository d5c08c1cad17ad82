//! # Sprint Planner Agent
//!
//! Turns the finished idea state into a week of concrete tasks. The
//! finalization pipeline asks for each of the four weeks in its own call so
//! a single oversized response never sinks the whole plan.

use crate::models::ModelConfig;
use crate::run_llm_function;
use async_trait::async_trait;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Task urgency as the planner assigns it
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, LLMOutput,
)]
pub enum TaskPriority {
    High,
    #[default]
    Medium,
    Low,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }
}

/// One planned unit of work. `timeline_days` may be fractional (half-day
/// tasks are common in week one).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct SprintTask {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub timeline_days: f64,
    #[serde(default)]
    pub assignee_email: Option<String>,
    /// Smaller pieces persisted as child rows of this task
    #[serde(default)]
    pub sub_tasks: Option<Vec<String>>,
}

/// One week of the sprint plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct SprintWeek {
    pub week: u32,
    pub tasks: Vec<SprintTask>,
}

/// Planner seam. The pipeline only depends on this trait; tests script it.
#[async_trait]
pub trait SprintPlanner: Send + Sync {
    /// Plan one week of the sprint from the idea context
    async fn plan_week(&self, idea_context: &str, week: u32) -> anyhow::Result<SprintWeek>;
}

/// LLM-backed sprint planner
pub struct LlmSprintPlanner {
    config: ModelConfig,
}

impl LlmSprintPlanner {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SprintPlanner for LlmSprintPlanner {
    async fn plan_week(&self, idea_context: &str, week: u32) -> anyhow::Result<SprintWeek> {
        let config = self.config.for_stage("sprint_planner");
        let input = format!(
            "Idea context:\n{}\n\nPlan week {} of the 4-week sprint. \
             Return only tasks for week {}.",
            idea_context, week, week
        );
        let mut plan: SprintWeek =
            run_llm_function!(&config, SprintWeek, SYSTEM_PROMPT, input.as_str())?;
        // Models occasionally echo the wrong week number; the request wins
        plan.week = week;
        Ok(plan)
    }
}

const SYSTEM_PROMPT: &str = include_str!("defaults/sprint_planner.md");
