//! # Background Narrative Job
//!
//! Generates the long-form workspace after finalization. Detached from the
//! triggering request: the spawn returns immediately and the job keeps
//! running after the HTTP response has finished. Input is an owned
//! snapshot; the live session state is never read or written back.
//!
//! Categories are processed in their fixed order and each category's
//! sections are persisted immediately, so a failure in category K+1 never
//! loses category K's output. A wall-clock budget bounds the whole job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::agents::{NarrativeCategory, NarrativeWriter};
use crate::state::{with_retry, GroundworkDb, IdeaState, SectionManager};

/// Limits for one narrative job
#[derive(Debug, Clone)]
pub struct NarrativeJobConfig {
    /// Wall-clock budget for the whole job, checked before each category
    pub budget: Duration,
    /// Pause between categories
    pub category_delay: Duration,
}

impl Default for NarrativeJobConfig {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(30 * 60),
            category_delay: Duration::from_secs(2),
        }
    }
}

/// How far a narrative job got; used for logging and tests only
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NarrativeJobReport {
    /// Categories whose sections were generated and persisted
    pub categories_completed: u32,
    /// Categories whose generation failed (contributed zero sections)
    pub categories_failed: u32,
    /// Categories never started because the budget ran out
    pub categories_skipped: u32,
    pub sections_persisted: u32,
    /// Sections generated but lost to a persistence failure
    pub sections_skipped: u32,
}

/// Detach the narrative job. Callers must not await the handle on the
/// request path; it exists for tests and graceful-shutdown hooks.
pub fn spawn_narrative_job(
    db: Arc<GroundworkDb>,
    writer: Arc<dyn NarrativeWriter>,
    snapshot: IdeaState,
    project_id: String,
    config: NarrativeJobConfig,
) -> tokio::task::JoinHandle<NarrativeJobReport> {
    tokio::spawn(async move { run_narrative_job(db, writer, snapshot, project_id, config).await })
}

/// The job body. One category at a time, in order, persisting as it goes.
pub async fn run_narrative_job(
    db: Arc<GroundworkDb>,
    writer: Arc<dyn NarrativeWriter>,
    snapshot: IdeaState,
    project_id: String,
    config: NarrativeJobConfig,
) -> NarrativeJobReport {
    let started = Instant::now();
    let sections = SectionManager::new(&db);
    let idea_context = snapshot.context_text();
    let categories = NarrativeCategory::all();

    let mut report = NarrativeJobReport::default();

    for (index, category) in categories.iter().enumerate() {
        if started.elapsed() >= config.budget {
            report.categories_skipped = (categories.len() - index) as u32;
            tracing::warn!(
                "Narrative budget exhausted after {} of {} categories for project {}",
                index,
                categories.len(),
                project_id
            );
            break;
        }
        if index > 0 {
            tokio::time::sleep(config.category_delay).await;
        }

        match writer.write_category(&idea_context, *category).await {
            Ok(generated) => {
                let mut position = 0u32;
                for section in &generated {
                    let result = with_retry(|| {
                        sections.create(
                            &project_id,
                            category.as_str(),
                            &section.name,
                            &section.kind,
                            &section.content,
                            position,
                        )
                    })
                    .await;
                    position += 1;
                    match result {
                        Ok(_) => report.sections_persisted += 1,
                        Err(err) => {
                            tracing::warn!(
                                "Failed to persist section '{}' of '{}': {:#}",
                                section.name,
                                category.as_str(),
                                err
                            );
                            report.sections_skipped += 1;
                        }
                    }
                }
                report.categories_completed += 1;
                tracing::info!(
                    "Narrative category '{}' done ({} sections)",
                    category.as_str(),
                    generated.len()
                );
            }
            Err(err) => {
                // A broken category contributes nothing; the job goes on
                report.categories_failed += 1;
                tracing::warn!(
                    "Narrative category '{}' failed, continuing: {:#}",
                    category.as_str(),
                    err
                );
            }
        }
    }

    tracing::info!(
        "Narrative job for project {} finished: {} completed, {} failed, {} skipped, {} sections",
        project_id,
        report.categories_completed,
        report.categories_failed,
        report.categories_skipped,
        report.sections_persisted
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{NarrativeSection, SECTION_KIND_TEXT};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::fs;

    /// Writer that fails one category and produces two sections elsewhere
    struct ScriptedWriter {
        fail: NarrativeCategory,
    }

    #[async_trait]
    impl NarrativeWriter for ScriptedWriter {
        async fn write_category(
            &self,
            _idea_context: &str,
            category: NarrativeCategory,
        ) -> Result<Vec<NarrativeSection>> {
            if category == self.fail {
                anyhow::bail!("collaborator unavailable");
            }
            Ok(vec![
                NarrativeSection {
                    name: "First".to_string(),
                    kind: SECTION_KIND_TEXT.to_string(),
                    content: format!("{} first", category.as_str()),
                },
                NarrativeSection {
                    name: "Second".to_string(),
                    kind: SECTION_KIND_TEXT.to_string(),
                    content: format!("{} second", category.as_str()),
                },
            ])
        }
    }

    fn quick_config() -> NarrativeJobConfig {
        NarrativeJobConfig {
            budget: Duration::from_secs(60),
            category_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_one_failed_category_never_loses_the_others() {
        let path = ".groundwork/test_narrative_partial.db";
        fs::create_dir_all(".groundwork").ok();
        let _ = fs::remove_file(path);

        let db = Arc::new(GroundworkDb::open_at(path).unwrap());
        let writer = Arc::new(ScriptedWriter {
            fail: NarrativeCategory::Engineering,
        });

        let report = run_narrative_job(
            Arc::clone(&db),
            writer,
            IdeaState::default(),
            "proj-1".to_string(),
            quick_config(),
        )
        .await;

        assert_eq!(report.categories_completed, 7);
        assert_eq!(report.categories_failed, 1);
        assert_eq!(report.categories_skipped, 0);
        assert_eq!(report.sections_persisted, 14);

        let sections = SectionManager::new(&db);
        let rows = sections.list_for_project("proj-1").unwrap();
        assert_eq!(rows.len(), 14);
        assert!(!rows.iter().any(|r| r.category == "engineering"));
        assert!(rows.iter().any(|r| r.category == "people_hr"));

        drop(sections);
        drop(db);
        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_zero_budget_skips_every_category() {
        let path = ".groundwork/test_narrative_budget.db";
        fs::create_dir_all(".groundwork").ok();
        let _ = fs::remove_file(path);

        let db = Arc::new(GroundworkDb::open_at(path).unwrap());
        let writer = Arc::new(ScriptedWriter {
            fail: NarrativeCategory::Engineering,
        });

        let config = NarrativeJobConfig {
            budget: Duration::ZERO,
            category_delay: Duration::ZERO,
        };
        let report = run_narrative_job(
            Arc::clone(&db),
            writer,
            IdeaState::default(),
            "proj-1".to_string(),
            config,
        )
        .await;

        assert_eq!(report.categories_skipped, 8);
        assert_eq!(report.sections_persisted, 0);

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_detached_spawn_survives_to_completion() {
        let path = ".groundwork/test_narrative_spawn.db";
        fs::create_dir_all(".groundwork").ok();
        let _ = fs::remove_file(path);

        let db = Arc::new(GroundworkDb::open_at(path).unwrap());
        let writer = Arc::new(ScriptedWriter {
            fail: NarrativeCategory::Engineering,
        });

        let handle = spawn_narrative_job(
            Arc::clone(&db),
            writer,
            IdeaState::default(),
            "proj-2".to_string(),
            quick_config(),
        );
        let report = handle.await.unwrap();
        assert_eq!(report.categories_completed, 7);

        drop(db);
        let _ = fs::remove_file(path);
    }
}
