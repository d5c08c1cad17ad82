//! # Shared Idea State
//!
//! The single mutable record of everything the intake conversation has
//! learned about the user's idea. Stage agents contribute partial results;
//! merging is non-null-overwrite (a field that arrives as `None` never
//! clears a value already present).
//!
//! One `SharedIdeaState` exists per session. The finalization pipeline and
//! the background narrative job only ever see deep-copy snapshots.

use anyhow::Result;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

/// A member of the founding team, as disclosed during the team stage.
/// `id` is filled in by the finalization pipeline once the member is
/// resolved to a stored user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct TeamMember {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub profession: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub domain_expertise: Option<String>,
}

/// Preferred technology stack, grouped from stage 8 answers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TechStackPreferences {
    #[serde(default)]
    pub frontend: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub ai_models: Option<String>,
    #[serde(default)]
    pub cloud: Option<String>,
}

/// Caller identity hints arriving with a request rather than from a stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UserPreferences {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
}

/// Everything known about the idea, grouped by the stage that supplies it.
/// Every field is optional; absence means "not disclosed yet".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdeaState {
    // Idea evaluation (stage 1)
    pub idea_title: Option<String>,
    pub problem_statement: Option<String>,
    pub target_user: Option<String>,
    pub idea_summary_short: Option<String>,

    // Deep idea analysis (stage 2)
    pub idea_long_description: Option<String>,
    pub core_features_must_have: Option<Vec<String>>,
    pub optional_features_good_to_have: Option<Vec<String>>,
    pub is_product_needed: Option<bool>,
    pub product_similar_to: Option<String>,

    // Team profile (stage 3)
    pub team: Option<Vec<TeamMember>>,
    pub execution_capacity: Option<String>,

    // Business goals (stage 4)
    pub primary_goal_for_4_weeks: Option<String>,
    pub monetization_model: Option<String>,
    pub launch_channel: Option<Vec<String>>,
    pub kpi_for_success: Option<Vec<String>>,

    // Market and competition (stage 5)
    pub market_size_assumption: Option<String>,
    pub primary_competitors: Option<Vec<String>>,
    pub competitive_advantage: Option<String>,
    pub user_pain_points_from_research: Option<Vec<String>>,
    pub validation_status: Option<String>,

    // Constraint analysis (stage 6)
    pub budget_range: Option<String>,
    pub tools_they_already_use: Option<Vec<String>>,
    pub time_constraints: Option<String>,
    pub assets_available: Option<Vec<String>>,

    // Execution preferences (stage 7)
    pub working_style: Option<String>,
    pub preferred_sprint_format: Option<String>,
    pub need_ai_assistance_for: Option<Vec<String>>,
    pub risk_tolerance: Option<String>,

    // Technology and implementation (stage 8)
    pub tech_required: Option<Vec<String>>,
    pub preferred_tech_stack: Option<TechStackPreferences>,
    pub integrations_needed: Option<Vec<String>>,
    pub data_needed_for_mvp: Option<Vec<String>>,
    pub constraints: Option<Vec<String>>,

    // Caller identity, set from requests rather than agent output
    pub user_preferences: Option<UserPreferences>,
}

impl IdeaState {
    /// JSON rendering with empty fields removed - what gets shown to agents
    /// in the greeting and to the narrative writer as idea context.
    pub fn context_json(&self) -> Value {
        serde_json::to_value(self)
            .map(prune_empty)
            .unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// Pretty-printed form of [`IdeaState::context_json`]
    pub fn context_text(&self) -> String {
        serde_json::to_string_pretty(&self.context_json()).unwrap_or_else(|_| "{}".to_string())
    }

    /// Whether any stage has contributed data yet (user preferences alone
    /// do not count)
    pub fn has_stage_data(&self) -> bool {
        let mut value = self.context_json();
        if let Some(obj) = value.as_object_mut() {
            obj.remove("user_preferences");
            !obj.is_empty()
        } else {
            false
        }
    }
}

/// Overwrite `target` only when the incoming value is present.
/// This is the whole merge rule: null is a no-op, non-null wins.
pub fn merge_field<T: Clone>(target: &mut Option<T>, incoming: &Option<T>) {
    if let Some(value) = incoming {
        *target = Some(value.clone());
    }
}

/// Recursively drop nulls, empty strings, empty arrays and empty objects
fn prune_empty(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let pruned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(key, val)| {
                    let val = prune_empty(val);
                    if is_empty_value(&val) {
                        None
                    } else {
                        Some((key, val))
                    }
                })
                .collect();
            Value::Object(pruned)
        }
        Value::Array(items) => {
            let pruned: Vec<Value> = items
                .into_iter()
                .map(prune_empty)
                .filter(|v| !is_empty_value(v))
                .collect();
            Value::Array(pruned)
        }
        other => other,
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Session-scoped handle to the idea state. All mutation goes through the
/// lock; readers take snapshots.
#[derive(Clone, Default)]
pub struct SharedIdeaState {
    inner: Arc<Mutex<IdeaState>>,
}

impl SharedIdeaState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: IdeaState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Deep copy of the current state
    pub fn snapshot(&self) -> Result<IdeaState> {
        let state = self
            .inner
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(state.clone())
    }

    /// Atomically replace the whole state (used when rehydrating a session
    /// from its persisted transcript)
    pub fn replace(&self, next: IdeaState) -> Result<()> {
        let mut state = self
            .inner
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        *state = next;
        Ok(())
    }

    /// Run a merge under the lock. Callers apply stage outcomes here; the
    /// closure must follow the non-null-overwrite rule (see [`merge_field`]).
    pub fn merge_with<F>(&self, merge: F) -> Result<()>
    where
        F: FnOnce(&mut IdeaState),
    {
        let mut state = self
            .inner
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        merge(&mut state);
        Ok(())
    }

    /// Single-field update for late-arriving caller identity
    pub fn set_preferences(&self, prefs: &UserPreferences) -> Result<()> {
        let mut state = self
            .inner
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let current = state.user_preferences.get_or_insert_with(Default::default);
        merge_field(&mut current.user_id, &prefs.user_id);
        merge_field(&mut current.user_name, &prefs.user_name);
        merge_field(&mut current.user_email, &prefs.user_email);
        Ok(())
    }
}
