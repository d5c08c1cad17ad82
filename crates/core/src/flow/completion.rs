//! # Finalization Pipeline
//!
//! Runs when a session reaches stage 9. A strictly ordered sequence of
//! steps turns the accumulated `IdeaState` into persistent artifacts:
//! resolve the acting user, sync collaborators, create the project, relink
//! session documents, generate and persist the dated sprint plan, then
//! detach the background narrative job. Each step emits a `started` and a
//! `completed` event; an unrecoverable failure emits an `error` event and
//! aborts. Per-row failures inside a step are logged, counted and skipped.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::agents::{NarrativeWriter, SprintPlanner, SprintWeek};
use crate::state::{
    with_retry, DocumentManager, GroundworkDb, IdeaState, ProjectManager, TaskRecord, TeamMember,
    UserManager,
};

use super::events::{CompletionEvent, CompletionEventKind, EventStatus};
use super::narrative_job::{spawn_narrative_job, NarrativeJobConfig};
use super::schedule::{schedule_for_week, task_key};

/// Configuration for one finalization run
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// How many plan weeks to generate
    pub sprint_weeks: u32,
    /// Shift the schedule anchor to tomorrow
    pub today_already_used: bool,
    /// Schedule anchor override; `None` means now
    pub base_date: Option<DateTime<Utc>>,
    /// Settings handed to the detached narrative job
    pub narrative: NarrativeJobConfig,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            sprint_weeks: 4,
            today_already_used: false,
            base_date: None,
            narrative: NarrativeJobConfig::default(),
        }
    }
}

/// What a finished pipeline produced, with per-step skip counts
#[derive(Debug, Clone)]
pub struct CompletionSummary {
    pub project_id: String,
    pub project_key: String,
    pub members_synced: u32,
    pub members_skipped: u32,
    pub documents_relinked: u32,
    pub documents_skipped: u32,
    pub tasks_persisted: u32,
    pub tasks_skipped: u32,
    /// Events that occurred, in emission order
    pub events: Vec<CompletionEvent>,
}

/// The finalization pipeline
pub struct CompletionPipeline {
    db: Arc<GroundworkDb>,
    planner: Arc<dyn SprintPlanner>,
    writer: Arc<dyn NarrativeWriter>,
    config: CompletionConfig,
    events: Vec<CompletionEvent>,
    event_tx: Option<mpsc::Sender<CompletionEvent>>,
}

impl CompletionPipeline {
    pub fn new(
        db: Arc<GroundworkDb>,
        planner: Arc<dyn SprintPlanner>,
        writer: Arc<dyn NarrativeWriter>,
        config: CompletionConfig,
    ) -> Self {
        Self {
            db,
            planner,
            writer,
            config,
            events: Vec::new(),
            event_tx: None,
        }
    }

    /// Set event channel for streaming events as steps finish
    pub fn with_event_channel(mut self, tx: mpsc::Sender<CompletionEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Emit an event
    async fn emit(&mut self, event: CompletionEvent) {
        self.events.push(event.clone());
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    /// Run the pipeline for a session. On abort, an `error` event is
    /// emitted before the failure propagates.
    #[tracing::instrument(skip(self, idea), fields(session_id = %session_id))]
    pub async fn run(
        &mut self,
        session_id: &str,
        request_user_id: Option<&str>,
        idea: &IdeaState,
    ) -> Result<CompletionSummary> {
        match self.run_steps(session_id, request_user_id, idea).await {
            Ok(summary) => Ok(summary),
            Err(err) => {
                self.emit(
                    CompletionEvent::new(CompletionEventKind::Error, EventStatus::Failed)
                        .with_detail(format!("{:#}", err)),
                )
                .await;
                Err(err)
            }
        }
    }

    async fn run_steps(
        &mut self,
        session_id: &str,
        request_user_id: Option<&str>,
        idea: &IdeaState,
    ) -> Result<CompletionSummary> {
        let users = UserManager::new(&self.db);
        let projects = ProjectManager::new(&self.db);
        let documents = DocumentManager::new(&self.db);

        // Step 1: resolve the acting user. No event of its own; failure
        // here aborts before anything is created.
        let user_id = resolve_acting_user(&users, request_user_id, idea).await?;

        // Step 2: sync collaborators on a working copy of the team
        self.emit(CompletionEvent::started(CompletionEventKind::TeamMembersSynced))
            .await;
        let mut team = idea.team.clone().unwrap_or_default();
        let mut members_synced = 0u32;
        let mut members_skipped = 0u32;
        for member in &mut team {
            let Some(email) = member.email.clone().filter(|e| !e.trim().is_empty()) else {
                continue;
            };
            let name = member.name.clone();
            let result = with_retry(|| users.get_or_create_by_email(&email, name.as_deref())).await;
            match result {
                Ok(record) => {
                    member.id = Some(record.id);
                    members_synced += 1;
                }
                Err(err) => {
                    tracing::warn!("Failed to sync team member {}: {:#}", email, err);
                    members_skipped += 1;
                }
            }
        }
        let team_ids: Vec<String> = team.iter().filter_map(|m| m.id.clone()).collect();
        self.emit(CompletionEvent::completed(CompletionEventKind::TeamMembersSynced))
            .await;

        // Step 3: create the project record
        self.emit(CompletionEvent::started(CompletionEventKind::ProjectCreated))
            .await;
        let title = idea
            .idea_title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Cannot create a project without a title"))?;
        let project = with_retry(|| {
            projects.create_project(
                title,
                idea.idea_summary_short.as_deref(),
                Some(&user_id),
                &team_ids,
            )
        })
        .await
        .context("Failed to create project record")?;
        tracing::info!("Created project {} ({})", project.key, project.id);
        self.emit(
            CompletionEvent::completed(CompletionEventKind::ProjectCreated)
                .with_project(&project.id),
        )
        .await;

        // Step 4: relink this session's documents to the new project.
        // Listing degrades to empty on storage trouble; relinks are
        // skipped per document.
        self.emit(CompletionEvent::started(CompletionEventKind::SourcesUpdated))
            .await;
        let session_docs = match with_retry(|| documents.list_for_session(session_id)).await {
            Ok(list) => list,
            Err(err) => {
                tracing::warn!("Could not list session documents, relinking none: {:#}", err);
                Vec::new()
            }
        };
        let mut documents_relinked = 0u32;
        let mut documents_skipped = 0u32;
        for doc in &session_docs {
            let result = with_retry(|| documents.relink_to_project(&doc.id, &project.id)).await;
            match result {
                Ok(()) => documents_relinked += 1,
                Err(err) => {
                    tracing::warn!("Failed to relink document {}: {:#}", doc.id, err);
                    documents_skipped += 1;
                }
            }
        }
        self.emit(CompletionEvent::completed(CompletionEventKind::SourcesUpdated))
            .await;

        // Step 5: generate the full plan, then persist it dated
        self.emit(CompletionEvent::started(CompletionEventKind::SprintPlanGenerated))
            .await;
        let idea_context = idea.context_text();
        let mut weeks: Vec<SprintWeek> = Vec::with_capacity(self.config.sprint_weeks as usize);
        for week in 1..=self.config.sprint_weeks {
            let plan = self
                .planner
                .plan_week(&idea_context, week)
                .await
                .with_context(|| format!("Sprint plan generation failed for week {}", week))?;
            weeks.push(plan);
        }
        let (tasks_persisted, tasks_skipped) = self
            .persist_plan(&projects, &project.id, &project.key, &user_id, &team, &weeks)
            .await;
        self.emit(CompletionEvent::completed(CompletionEventKind::SprintPlanGenerated))
            .await;

        // Step 6: detach the narrative job and finish without waiting.
        // The job reads its own snapshot, with the synced team in it.
        self.emit(CompletionEvent::started(CompletionEventKind::NarrativeSectionsStarted))
            .await;
        let mut snapshot = idea.clone();
        snapshot.team = Some(team);
        spawn_narrative_job(
            Arc::clone(&self.db),
            Arc::clone(&self.writer),
            snapshot,
            project.id.clone(),
            self.config.narrative.clone(),
        );
        self.emit(CompletionEvent::completed(CompletionEventKind::NarrativeSectionsStarted))
            .await;

        self.emit(
            CompletionEvent::completed(CompletionEventKind::Completed).with_project(&project.id),
        )
        .await;

        Ok(CompletionSummary {
            project_id: project.id,
            project_key: project.key,
            members_synced,
            members_skipped,
            documents_relinked,
            documents_skipped,
            tasks_persisted,
            tasks_skipped,
            events: std::mem::take(&mut self.events),
        })
    }

    /// Persist every generated task and its sub-tasks as dated rows.
    /// Row-level failures are counted and skipped; a parent failure skips
    /// its sub-tasks too since they would reference a missing row.
    async fn persist_plan(
        &self,
        projects: &ProjectManager,
        project_id: &str,
        project_key: &str,
        reporter_id: &str,
        team: &[TeamMember],
        weeks: &[SprintWeek],
    ) -> (u32, u32) {
        let base = self.config.base_date.unwrap_or_else(Utc::now);
        let assignees: HashMap<String, String> = team
            .iter()
            .filter_map(|m| match (&m.email, &m.id) {
                (Some(email), Some(id)) => Some((email.to_lowercase(), id.clone())),
                _ => None,
            })
            .collect();

        let mut persisted = 0u32;
        let mut skipped = 0u32;

        for week_plan in weeks {
            for task in &week_plan.tasks {
                let sub_count = task.sub_tasks.as_ref().map(|s| s.len() as u32).unwrap_or(0);

                let number = match with_retry(|| projects.next_task_number()).await {
                    Ok(n) => n,
                    Err(err) => {
                        tracing::warn!("Failed to reserve task key: {:#}", err);
                        skipped += 1 + sub_count;
                        continue;
                    }
                };

                let window = schedule_for_week(
                    base,
                    self.config.today_already_used,
                    week_plan.week,
                    task.timeline_days,
                );
                let mut record =
                    TaskRecord::new(project_id, &task_key(project_key, number), &task.title);
                record.description = Some(task.description.clone());
                record.priority = task.priority.as_str().to_string();
                record.reporter_id = Some(reporter_id.to_string());
                record.assignee_id = task
                    .assignee_email
                    .as_ref()
                    .and_then(|e| assignees.get(&e.to_lowercase()).cloned());
                record.sprint_week = Some(week_plan.week);
                record.start_date = Some(window.start);
                record.due_date = Some(window.due);

                let saved = with_retry(|| projects.save_task(&record)).await;
                if let Err(err) = saved {
                    tracing::warn!("Failed to save task {}: {:#}", record.key, err);
                    skipped += 1 + sub_count;
                    continue;
                }
                persisted += 1;

                for sub_title in task.sub_tasks.iter().flatten() {
                    let number = match with_retry(|| projects.next_task_number()).await {
                        Ok(n) => n,
                        Err(err) => {
                            tracing::warn!("Failed to reserve sub-task key: {:#}", err);
                            skipped += 1;
                            continue;
                        }
                    };
                    let mut sub =
                        TaskRecord::new(project_id, &task_key(project_key, number), sub_title);
                    sub.priority = record.priority.clone();
                    sub.parent_task_id = Some(record.id.clone());
                    sub.reporter_id = record.reporter_id.clone();
                    sub.assignee_id = record.assignee_id.clone();
                    sub.sprint_week = record.sprint_week;
                    sub.start_date = record.start_date;
                    sub.due_date = record.due_date;

                    let saved = with_retry(|| projects.save_task(&sub)).await;
                    match saved {
                        Ok(()) => persisted += 1,
                        Err(err) => {
                            tracing::warn!("Failed to save sub-task {}: {:#}", sub.key, err);
                            skipped += 1;
                        }
                    }
                }
            }
        }

        (persisted, skipped)
    }
}

/// Resolve the acting user: explicit caller id, then preference id, then
/// get-or-create by preference email. Fatal when none applies.
async fn resolve_acting_user(
    users: &UserManager,
    request_user_id: Option<&str>,
    idea: &IdeaState,
) -> Result<String> {
    if let Some(id) = request_user_id.filter(|id| !id.trim().is_empty()) {
        return Ok(id.to_string());
    }

    if let Some(prefs) = &idea.user_preferences {
        if let Some(id) = prefs.user_id.as_deref().filter(|id| !id.trim().is_empty()) {
            return Ok(id.to_string());
        }
        if let Some(email) = prefs
            .user_email
            .as_deref()
            .filter(|e| !e.trim().is_empty())
        {
            let name = prefs.user_name.clone();
            let record = with_retry(|| users.get_or_create_by_email(email, name.as_deref()))
                .await
                .context("Failed to resolve acting user by email")?;
            return Ok(record.id);
        }
    }

    anyhow::bail!("No acting user could be resolved for finalization")
}
