//! # Narrative Writer Agent
//!
//! Long-form workspace content generated after finalization. The workspace
//! is a fixed plan: eight categories, each with a handful of named
//! sections. A category is written in one continuous conversation so later
//! sections can build on earlier ones, with a short pause between section
//! calls to stay under rate limits.

use crate::models::ModelConfig;
use crate::run_llm_function;
use async_trait::async_trait;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Section kind for plain markdown content
pub const SECTION_KIND_TEXT: &str = "text";

/// Pause between section calls within one category
const SECTION_DELAY: Duration = Duration::from_secs(2);

/// The fixed workspace categories, in generation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeCategory {
    Narrative,
    Product,
    Engineering,
    Administrative,
    PeopleHr,
    Gtm,
    Funding,
    Tools,
}

impl NarrativeCategory {
    /// All categories in generation order
    pub fn all() -> [NarrativeCategory; 8] {
        [
            Self::Narrative,
            Self::Product,
            Self::Engineering,
            Self::Administrative,
            Self::PeopleHr,
            Self::Gtm,
            Self::Funding,
            Self::Tools,
        ]
    }

    /// Storage key for section rows
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Narrative => "narrative",
            Self::Product => "product",
            Self::Engineering => "engineering",
            Self::Administrative => "administrative",
            Self::PeopleHr => "people_hr",
            Self::Gtm => "gtm",
            Self::Funding => "funding",
            Self::Tools => "tools",
        }
    }

    /// Human-facing label, used in prompts
    pub fn title(&self) -> &'static str {
        match self {
            Self::Narrative => "Narrative",
            Self::Product => "Product",
            Self::Engineering => "Engineering",
            Self::Administrative => "Administrative",
            Self::PeopleHr => "People & HR",
            Self::Gtm => "Go-To-Market",
            Self::Funding => "Funding",
            Self::Tools => "Tools",
        }
    }

    /// The named sections this category always contains
    pub fn section_names(&self) -> &'static [&'static str] {
        match self {
            Self::Narrative => &[
                "Executive Summary",
                "Problem Statement",
                "Solution Overview",
                "Positioning",
            ],
            Self::Product => &[
                "User Personas",
                "User Flows",
                "MVP Features",
                "Success Criteria",
            ],
            Self::Engineering => &[
                "Tech Stack",
                "System Architecture",
                "Security & Compliance",
                "Testing Strategy",
            ],
            Self::Administrative => &[
                "Company Structure",
                "Operating Cadence",
                "Compliance Basics",
            ],
            Self::PeopleHr => &[
                "Roles & Responsibilities",
                "Hiring Plan",
                "Culture Principles",
            ],
            Self::Gtm => &["Channels", "Messaging", "Launch Experiments", "Metrics"],
            Self::Funding => &["Why Now", "Market Context", "Use of Funds"],
            Self::Tools => &["Tool Stack", "Build vs Buy"],
        }
    }
}

/// A generated workspace section, ready to persist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeSection {
    pub name: String,
    pub kind: String,
    pub content: String,
}

/// Raw model output for one section call
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, LLMOutput)]
struct SectionDraft {
    /// Markdown body of the section
    content: String,
}

/// Writer seam. The background job only depends on this trait.
#[async_trait]
pub trait NarrativeWriter: Send + Sync {
    /// Generate every section of one category from the idea context
    async fn write_category(
        &self,
        idea_context: &str,
        category: NarrativeCategory,
    ) -> anyhow::Result<Vec<NarrativeSection>>;
}

/// LLM-backed narrative writer
pub struct LlmNarrativeWriter {
    config: ModelConfig,
    section_delay: Duration,
}

impl LlmNarrativeWriter {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            section_delay: SECTION_DELAY,
        }
    }

    /// Override the pause between section calls (tests use zero)
    pub fn with_section_delay(mut self, delay: Duration) -> Self {
        self.section_delay = delay;
        self
    }
}

#[async_trait]
impl NarrativeWriter for LlmNarrativeWriter {
    async fn write_category(
        &self,
        idea_context: &str,
        category: NarrativeCategory,
    ) -> anyhow::Result<Vec<NarrativeSection>> {
        let config = self.config.for_stage("narrative");
        let names = category.section_names();

        // One continuous conversation per category: the idea context goes
        // in once, every finished section stays visible to the next call.
        let mut transcript = format!(
            "Idea context:\n{}\n\nYou are writing the \"{}\" category of the project workspace.",
            idea_context,
            category.title()
        );
        let mut sections = Vec::with_capacity(names.len());

        for (index, name) in names.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.section_delay).await;
            }

            let input = format!("{}\n\nWrite the \"{}\" section now.", transcript, name);
            match run_llm_function!(&config, SectionDraft, SYSTEM_PROMPT, input.as_str()) {
                Ok(draft) => {
                    transcript.push_str(&format!("\n\n## {}\n{}", name, draft.content));
                    sections.push(NarrativeSection {
                        name: name.to_string(),
                        kind: SECTION_KIND_TEXT.to_string(),
                        content: draft.content,
                    });
                }
                Err(err) => {
                    // A single bad section should not cost the category
                    tracing::warn!(
                        "Section '{}' of category '{}' failed, skipping: {:#}",
                        name,
                        category.as_str(),
                        err
                    );
                }
            }
        }

        Ok(sections)
    }
}

const SYSTEM_PROMPT: &str = include_str!("defaults/narrative_section.md");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eight_categories_in_fixed_order() {
        let all = NarrativeCategory::all();
        assert_eq!(all.len(), 8);
        assert_eq!(all[0], NarrativeCategory::Narrative);
        assert_eq!(all[7], NarrativeCategory::Tools);
    }

    #[test]
    fn test_every_category_has_two_to_six_sections() {
        for category in NarrativeCategory::all() {
            let count = category.section_names().len();
            assert!(
                (2..=6).contains(&count),
                "category {} has {} sections",
                category.as_str(),
                count
            );
        }
    }

    #[test]
    fn test_storage_keys_are_snake_case() {
        assert_eq!(NarrativeCategory::PeopleHr.as_str(), "people_hr");
        assert_eq!(NarrativeCategory::Gtm.as_str(), "gtm");
        let json = serde_json::to_string(&NarrativeCategory::PeopleHr).unwrap();
        assert_eq!(json, "\"people_hr\"");
    }
}
