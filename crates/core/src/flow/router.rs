//! # Turn Orchestrator
//!
//! One orchestrator per session. Routes an incoming turn to the right
//! stage agent, applies completion and chaining rules, persists transcript
//! entries, and pushes response lines into the caller's channel. When the
//! transcript shows all eight conversational stages are done, the turn
//! triggers the finalization pipeline instead of an agent call.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::agents::{
    AgentRoster, ChatTurn, LlmNarrativeWriter, LlmSprintPlanner, NarrativeWriter, SprintPlanner,
    Stage, StageOutcome, StageStatus,
};
use crate::models::ModelConfig;
use crate::state::{
    with_retry, GroundworkDb, IdeaState, MessageRole, SharedIdeaState, TranscriptEntry,
    TranscriptManager, STAGE_COMPLETED,
};

use super::completion::{CompletionConfig, CompletionPipeline};
use super::wire::{ChatRequest, ChatResponse, ConnectionStatus, TranscriptMessage};

/// First message of a brand-new session
const WELCOME: &str = "Hey! 👋 Welcome to Groundwork. Tell me about the idea you're excited to build — even a rough thought is enough. Let's shape it together.";

/// Reply when a finalized session receives another turn
const ALREADY_FINALIZED: &str =
    "This session has already been finalized. Start a new session to plan another idea.";

/// Where a turn goes after looking at the persisted transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageResolution {
    /// Conversational turn for this stage
    Conversational(Stage),
    /// All eight stages are done; run the finalization pipeline
    Finalize,
    /// Finalization already ran; no conversational turns accepted
    PastCompletion,
}

/// Per-session turn router
pub struct Orchestrator {
    db: Arc<GroundworkDb>,
    roster: AgentRoster,
    planner: Arc<dyn SprintPlanner>,
    writer: Arc<dyn NarrativeWriter>,
    state: SharedIdeaState,
    config: CompletionConfig,
}

impl Orchestrator {
    pub fn new(
        db: Arc<GroundworkDb>,
        roster: AgentRoster,
        planner: Arc<dyn SprintPlanner>,
        writer: Arc<dyn NarrativeWriter>,
    ) -> Self {
        Self {
            db,
            roster,
            planner,
            writer,
            state: SharedIdeaState::new(),
            config: CompletionConfig::default(),
        }
    }

    /// Orchestrator with every collaborator backed by the configured LLM
    pub fn llm(db: Arc<GroundworkDb>, config: &ModelConfig) -> Self {
        Self::new(
            db,
            AgentRoster::llm(config),
            Arc::new(LlmSprintPlanner::new(config.clone())),
            Arc::new(LlmNarrativeWriter::new(config.clone())),
        )
    }

    /// Override finalization settings (weeks, schedule anchor, narrative)
    pub fn with_completion_config(mut self, config: CompletionConfig) -> Self {
        self.config = config;
        self
    }

    /// Handle to the session's shared idea state
    pub fn state(&self) -> &SharedIdeaState {
        &self.state
    }

    /// Process one turn, pushing every response line into `tx`. All
    /// failures are reported as lines; this never panics the caller.
    #[tracing::instrument(skip(self, request, tx), fields(session_id = %request.session_id))]
    pub async fn handle_turn(&self, request: ChatRequest, tx: &mpsc::Sender<ChatResponse>) {
        if request.idea_state_stage > 9 {
            send(
                tx,
                ChatResponse::error(
                    request.idea_state_stage,
                    "idea_state_stage must be between 1 and 9",
                ),
            )
            .await;
            return;
        }

        match request.connection_status {
            ConnectionStatus::Started => self.handle_started(&request, tx).await,
            ConnectionStatus::Active => self.handle_active(&request, tx).await,
            _ => {
                send(
                    tx,
                    ChatResponse::error(
                        request.idea_state_stage,
                        "connection_status must be 'started' or 'active'",
                    ),
                )
                .await;
            }
        }
    }

    /// Handshake: replay the transcript, seeding a welcome for empty
    /// sessions, and rebuild state from completed outcomes if needed.
    async fn handle_started(&self, request: &ChatRequest, tx: &mpsc::Sender<ChatResponse>) {
        self.apply_preferences(request);

        let transcripts = TranscriptManager::new(&self.db);
        let entries = match with_retry(|| transcripts.list_for_session(&request.session_id)).await
        {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!("Transcript unavailable, replaying empty history: {:#}", err);
                Vec::new()
            }
        };
        self.rehydrate_if_blank(&entries);

        if entries.is_empty() {
            // A stage 9 seed would read back as a finalized session, so
            // the welcome stays in the conversational range.
            let seed_stage = match request.idea_state_stage {
                s @ 1..=8 => s,
                _ => 1,
            };
            let welcome = TranscriptEntry::assistant(&request.session_id, WELCOME, None, seed_stage);
            if let Err(err) = with_retry(|| transcripts.append(&welcome)).await {
                tracing::warn!("Failed to persist welcome message: {:#}", err);
            }
            send(
                tx,
                ChatResponse::started(seed_stage, vec![TranscriptMessage::from_entry(&welcome)]),
            )
            .await;
            return;
        }

        let stage = match resolve_stage(&entries) {
            StageResolution::Conversational(stage) => stage.number(),
            StageResolution::Finalize | StageResolution::PastCompletion => 9,
        };
        send(tx, ChatResponse::started(stage, TranscriptMessage::replay(&entries))).await;
    }

    /// A conversational or finalization turn
    async fn handle_active(&self, request: &ChatRequest, tx: &mpsc::Sender<ChatResponse>) {
        let message = request.user_message.as_deref().map(str::trim).unwrap_or("");
        if message.is_empty() {
            send(
                tx,
                ChatResponse::error(
                    request.idea_state_stage,
                    "An active turn requires a non-empty user_message",
                ),
            )
            .await;
            return;
        }

        self.apply_preferences(request);

        let transcripts = TranscriptManager::new(&self.db);
        let entries = match with_retry(|| transcripts.list_for_session(&request.session_id)).await
        {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!("Transcript unavailable, resolving from empty: {:#}", err);
                Vec::new()
            }
        };
        self.rehydrate_if_blank(&entries);

        match resolve_stage(&entries) {
            StageResolution::PastCompletion => {
                send(tx, ChatResponse::events_completed(9, ALREADY_FINALIZED)).await;
            }
            StageResolution::Finalize => {
                self.run_finalization(request, tx).await;
            }
            StageResolution::Conversational(stage) => {
                self.run_conversation(stage, message, request, &entries, &transcripts, tx)
                    .await;
            }
        }
    }

    /// Invoke the stage agent and apply the completion/chaining rules.
    /// At most one automatic hop to the next stage happens per turn.
    async fn run_conversation(
        &self,
        stage: Stage,
        message: &str,
        request: &ChatRequest,
        entries: &[TranscriptEntry],
        transcripts: &TranscriptManager,
        tx: &mpsc::Sender<ChatResponse>,
    ) {
        let user_entry = TranscriptEntry::user(
            &request.session_id,
            request.user_id.as_deref(),
            message,
            stage.number(),
        );
        if let Err(err) = with_retry(|| transcripts.append(&user_entry)).await {
            tracing::warn!("Failed to persist user message: {:#}", err);
        }

        let snapshot = match self.state.snapshot() {
            Ok(idea) => idea,
            Err(err) => {
                send(tx, ChatResponse::error(stage.number(), format!("State unavailable: {}", err)))
                    .await;
                return;
            }
        };
        let mut turns = build_turns(stage, &snapshot, entries);
        turns.push(ChatTurn::user(message));

        let mut current = stage;
        let mut hopped = false;
        loop {
            let Some(agent) = self.roster.agent_for(current) else {
                send(
                    tx,
                    ChatResponse::error(
                        current.number(),
                        format!("No agent available for stage {}", current.number()),
                    ),
                )
                .await;
                return;
            };

            let outcome = match agent.invoke(&turns).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!("Stage {} agent failed: {:#}", current.number(), err);
                    send(
                        tx,
                        ChatResponse::error(
                            current.number(),
                            format!("Stage agent failed: {:#}", err),
                        ),
                    )
                    .await;
                    return;
                }
            };

            match outcome.status() {
                StageStatus::Ongoing => {
                    let entry = TranscriptEntry::assistant(
                        &request.session_id,
                        outcome.follow_up(),
                        Some(outcome.to_json()),
                        current.number(),
                    );
                    if let Err(err) = with_retry(|| transcripts.append(&entry)).await {
                        tracing::warn!("Failed to persist assistant reply: {:#}", err);
                    }
                    self.send_active(tx, current.number(), outcome.follow_up()).await;
                    return;
                }
                StageStatus::Completed => {
                    if let Err(err) = self.state.merge_with(|idea| outcome.apply_to(idea)) {
                        send(
                            tx,
                            ChatResponse::error(
                                current.number(),
                                format!("State unavailable: {}", err),
                            ),
                        )
                        .await;
                        return;
                    }

                    // The next turn's stage resolution reads this row, so
                    // a failed write has to surface instead of silently
                    // losing the advancement.
                    let sentinel = TranscriptEntry::assistant(
                        &request.session_id,
                        STAGE_COMPLETED,
                        Some(outcome.to_json()),
                        current.number(),
                    );
                    if let Err(err) = with_retry(|| transcripts.append(&sentinel)).await {
                        tracing::error!("Failed to persist stage completion: {:#}", err);
                        send(
                            tx,
                            ChatResponse::error(
                                current.number(),
                                "Could not record stage completion, please retry",
                            ),
                        )
                        .await;
                        return;
                    }

                    let next = match current.next() {
                        Some(next) => next,
                        None => {
                            send(tx, ChatResponse::events_completed(9, ALREADY_FINALIZED)).await;
                            return;
                        }
                    };

                    if !next.is_conversational() {
                        // All eight stages done. The pipeline runs on the
                        // next turn; nothing is persisted at stage 9 here.
                        self.send_active(
                            tx,
                            next.number(),
                            "Every stage is complete. Send one more message and I'll create your project and sprint plan.",
                        )
                        .await;
                        return;
                    }

                    if hopped {
                        // One automatic hop per turn. This completion is
                        // recorded; the reply carries its wrap-up text.
                        self.send_active(tx, next.number(), outcome.follow_up()).await;
                        return;
                    }

                    hopped = true;
                    current = next;
                    let snapshot = match self.state.snapshot() {
                        Ok(idea) => idea,
                        Err(err) => {
                            send(
                                tx,
                                ChatResponse::error(
                                    current.number(),
                                    format!("State unavailable: {}", err),
                                ),
                            )
                            .await;
                            return;
                        }
                    };
                    // The next stage opens from the greeting alone
                    turns = vec![ChatTurn::context(greeting_text(&snapshot))];
                }
            }
        }
    }

    /// Run the finalization pipeline, forwarding its events as stream
    /// lines and closing with a persisted terminal entry.
    async fn run_finalization(&self, request: &ChatRequest, tx: &mpsc::Sender<ChatResponse>) {
        let snapshot = match self.state.snapshot() {
            Ok(idea) => idea,
            Err(err) => {
                send(tx, ChatResponse::error(9, format!("State unavailable: {}", err))).await;
                return;
            }
        };

        let (event_tx, mut event_rx) = mpsc::channel(32);
        let mut pipeline = CompletionPipeline::new(
            Arc::clone(&self.db),
            Arc::clone(&self.planner),
            Arc::clone(&self.writer),
            self.config.clone(),
        )
        .with_event_channel(event_tx);

        let forward_tx = tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                let _ = forward_tx.send(ChatResponse::streaming_event(9, event)).await;
            }
        });

        let result = pipeline
            .run(&request.session_id, request.user_id.as_deref(), &snapshot)
            .await;
        // Dropping the pipeline closes the event channel; waiting on the
        // forwarder flushes every event line before the terminal line.
        drop(pipeline);
        let _ = forwarder.await;

        match result {
            Ok(summary) => {
                let content = format!(
                    "Project {} is ready: {} tasks scheduled across {} weeks. Workspace documents are being written in the background.",
                    summary.project_key, summary.tasks_persisted, self.config.sprint_weeks
                );
                let terminal = TranscriptEntry::assistant(
                    &request.session_id,
                    &content,
                    Some(serde_json::json!({
                        "project_id": summary.project_id,
                        "project_key": summary.project_key,
                    })),
                    9,
                );
                let transcripts = TranscriptManager::new(&self.db);
                if let Err(err) = with_retry(|| transcripts.append(&terminal)).await {
                    tracing::warn!("Failed to persist finalization entry: {:#}", err);
                }
                send(tx, ChatResponse::events_completed(9, content)).await;
            }
            Err(err) => {
                send(tx, ChatResponse::error(9, format!("{:#}", err))).await;
            }
        }
    }

    /// Merge request preferences into the shared state
    fn apply_preferences(&self, request: &ChatRequest) {
        if let Some(prefs) = &request.user_preferences {
            if let Err(err) = self.state.set_preferences(prefs) {
                tracing::warn!("Failed to apply user preferences: {:#}", err);
            }
        }
    }

    /// Rebuild a blank state from the completed outcomes in the
    /// transcript, oldest first. Used after restarts, when the process
    /// holding the in-memory state is gone but the transcript survives.
    fn rehydrate_if_blank(&self, entries: &[TranscriptEntry]) {
        let blank = match self.state.snapshot() {
            Ok(idea) => !idea.has_stage_data(),
            Err(err) => {
                tracing::warn!("State unavailable for rehydration: {:#}", err);
                return;
            }
        };
        if !blank || entries.is_empty() {
            return;
        }

        let result = self.state.merge_with(|idea| {
            for entry in entries {
                if entry.role != MessageRole::Assistant {
                    continue;
                }
                let Some(structured) = &entry.structured else {
                    continue;
                };
                if !structured_completed(entry) {
                    continue;
                }
                let Some(stage) = Stage::from_number(entry.stage) else {
                    continue;
                };
                if !stage.is_conversational() {
                    continue;
                }
                match StageOutcome::from_json(stage, structured) {
                    Ok(outcome) => outcome.apply_to(idea),
                    Err(err) => {
                        tracing::warn!(
                            "Skipping unreadable stage {} outcome during rehydration: {:#}",
                            entry.stage,
                            err
                        );
                    }
                }
            }
        });
        if let Err(err) = result {
            tracing::warn!("Failed to rehydrate state: {:#}", err);
        }
    }

    /// Send an `active` line with the filtered state attached
    async fn send_active(&self, tx: &mpsc::Sender<ChatResponse>, stage: u8, content: &str) {
        let mut response = ChatResponse::active(stage, content);
        match self.state.snapshot() {
            Ok(idea) => response = response.with_formatted_output(idea.context_json()),
            Err(err) => tracing::warn!("State snapshot unavailable: {:#}", err),
        }
        send(tx, response).await;
    }
}

async fn send(tx: &mpsc::Sender<ChatResponse>, response: ChatResponse) {
    if tx.send(response).await.is_err() {
        tracing::warn!("Response channel closed, dropping line");
    }
}

/// Resolve where a turn goes from the persisted transcript alone. The
/// current stage is the highest stage tag present, bumped by one when the
/// last assistant entry at that stage recorded a completed outcome (the
/// follow-up tagged with the next stage may not have been written yet).
fn resolve_stage(entries: &[TranscriptEntry]) -> StageResolution {
    let Some(highest) = entries.iter().map(|e| e.stage).max() else {
        return StageResolution::Conversational(Stage::IdeaEvaluation);
    };

    if entries
        .iter()
        .any(|e| e.role == MessageRole::Assistant && e.stage == 9)
    {
        return StageResolution::PastCompletion;
    }

    let mut effective = highest;
    if stage_completed_at(entries, highest) {
        effective = highest.saturating_add(1);
    }
    if effective >= 9 {
        return StageResolution::Finalize;
    }

    match Stage::from_number(effective) {
        Some(stage) if stage.is_conversational() => StageResolution::Conversational(stage),
        _ => StageResolution::Conversational(Stage::IdeaEvaluation),
    }
}

/// Whether the last assistant entry tagged with `stage` records a
/// completed outcome
fn stage_completed_at(entries: &[TranscriptEntry], stage: u8) -> bool {
    entries
        .iter()
        .rev()
        .find(|e| e.role == MessageRole::Assistant && e.stage == stage)
        .map(|e| e.is_completion_sentinel() || structured_completed(e))
        .unwrap_or(false)
}

fn structured_completed(entry: &TranscriptEntry) -> bool {
    entry
        .structured
        .as_ref()
        .and_then(|v| v.get("state"))
        .and_then(|s| s.as_str())
        == Some("completed")
}

/// Messages handed to the stage agent. Stage 1 sees the raw history;
/// later stages see a synthesized greeting with the filtered state JSON
/// plus their own stage's conversation.
fn build_turns(stage: Stage, idea: &IdeaState, entries: &[TranscriptEntry]) -> Vec<ChatTurn> {
    let mut turns = Vec::new();
    if stage.number() > 1 {
        turns.push(ChatTurn::context(greeting_text(idea)));
        for entry in entries {
            if entry.is_completion_sentinel() || entry.stage != stage.number() {
                continue;
            }
            turns.push(to_turn(entry));
        }
    } else {
        for entry in entries {
            if entry.is_completion_sentinel() {
                continue;
            }
            turns.push(to_turn(entry));
        }
    }
    turns
}

fn to_turn(entry: &TranscriptEntry) -> ChatTurn {
    match entry.role {
        MessageRole::User => ChatTurn::user(entry.content.as_str()),
        MessageRole::Assistant => ChatTurn::assistant(entry.content.as_str()),
    }
}

fn greeting_text(idea: &IdeaState) -> String {
    let rendered = serde_json::to_string_pretty(&idea.context_json())
        .unwrap_or_else(|_| "{}".to_string());
    format!(
        "Here is everything the founder has shared so far, as structured JSON:\n{}",
        rendered
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed_sentinel(stage: u8) -> TranscriptEntry {
        TranscriptEntry::assistant(
            "sess-1",
            STAGE_COMPLETED,
            Some(serde_json::json!({"state": "completed"})),
            stage,
        )
    }

    #[test]
    fn test_empty_transcript_resolves_to_stage_one() {
        assert_eq!(
            resolve_stage(&[]),
            StageResolution::Conversational(Stage::IdeaEvaluation)
        );
    }

    #[test]
    fn test_ongoing_stage_resolves_to_highest() {
        let entries = vec![
            TranscriptEntry::user("sess-1", None, "hello", 1),
            completed_sentinel(1),
            TranscriptEntry::assistant("sess-1", "What features?", None, 2),
            TranscriptEntry::user("sess-1", None, "chat and maps", 2),
        ];
        assert_eq!(
            resolve_stage(&entries),
            StageResolution::Conversational(Stage::DeepAnalysis)
        );
    }

    #[test]
    fn test_stage_eight_completion_advances_to_finalize() {
        let entries = vec![
            TranscriptEntry::user("sess-1", None, "react please", 8),
            completed_sentinel(8),
        ];
        assert_eq!(resolve_stage(&entries), StageResolution::Finalize);
    }

    #[test]
    fn test_stage_eight_ongoing_stays_conversational() {
        let entries = vec![
            completed_sentinel(7),
            TranscriptEntry::assistant(
                "sess-1",
                "Any stack preferences?",
                Some(serde_json::json!({"state": "ongoing"})),
                8,
            ),
        ];
        assert_eq!(
            resolve_stage(&entries),
            StageResolution::Conversational(Stage::TechImplementation)
        );
    }

    #[test]
    fn test_assistant_entry_at_nine_means_past_completion() {
        let entries = vec![
            completed_sentinel(8),
            TranscriptEntry::assistant("sess-1", "Project PROJ-1 is ready", None, 9),
        ];
        assert_eq!(resolve_stage(&entries), StageResolution::PastCompletion);
    }

    #[test]
    fn test_stage_one_turns_are_raw_history_without_sentinels() {
        let entries = vec![
            TranscriptEntry::assistant("sess-1", "Welcome!", None, 1),
            TranscriptEntry::user("sess-1", None, "an app for hikers", 1),
        ];
        let turns = build_turns(Stage::IdeaEvaluation, &IdeaState::default(), &entries);
        assert_eq!(turns.len(), 2);
        assert!(turns[0].content.contains("Welcome"));
    }

    #[test]
    fn test_later_stages_get_greeting_and_own_history_only() {
        let mut idea = IdeaState::default();
        idea.idea_title = Some("Trail App".to_string());

        let entries = vec![
            TranscriptEntry::user("sess-1", None, "an app for hikers", 1),
            completed_sentinel(1),
            TranscriptEntry::assistant("sess-1", "Who is on the team?", None, 3),
        ];
        let turns = build_turns(Stage::TeamProfile, &idea, &entries);

        assert_eq!(turns.len(), 2);
        assert!(turns[0].content.contains("Trail App"));
        assert!(turns[1].content.contains("team"));
    }

    #[test]
    fn test_trailing_sentinel_resolves_to_next_stage() {
        let entries = vec![
            TranscriptEntry::user("sess-1", None, "the pitch", 1),
            completed_sentinel(1),
            completed_sentinel(2),
        ];
        assert_eq!(
            resolve_stage(&entries),
            StageResolution::Conversational(Stage::TeamProfile)
        );
    }

    // Turn-level tests below drive the orchestrator end to end over a
    // temporary database with scripted agents.

    use crate::agents::{
        DeepAnalysisState, IdeaEvaluationState, NarrativeCategory, NarrativeSection, SprintTask,
        SprintWeek, StageAgent, TaskPriority, SECTION_KIND_TEXT,
    };
    use crate::flow::NarrativeJobConfig;
    use crate::state::GroundworkDb;
    use async_trait::async_trait;
    use std::fs;

    struct FixedAgent {
        stage: Stage,
        outcome: StageOutcome,
    }

    #[async_trait]
    impl StageAgent for FixedAgent {
        fn stage(&self) -> Stage {
            self.stage
        }

        async fn invoke(&self, _turns: &[ChatTurn]) -> anyhow::Result<StageOutcome> {
            Ok(self.outcome.clone())
        }
    }

    struct FixedPlanner;

    #[async_trait]
    impl SprintPlanner for FixedPlanner {
        async fn plan_week(&self, _idea_context: &str, week: u32) -> anyhow::Result<SprintWeek> {
            Ok(SprintWeek {
                week,
                tasks: vec![SprintTask {
                    title: format!("Week {} focus", week),
                    description: "Do the thing".to_string(),
                    priority: TaskPriority::Medium,
                    timeline_days: 1.0,
                    assignee_email: None,
                    sub_tasks: None,
                }],
            })
        }
    }

    struct NoopWriter;

    #[async_trait]
    impl NarrativeWriter for NoopWriter {
        async fn write_category(
            &self,
            _idea_context: &str,
            _category: NarrativeCategory,
        ) -> anyhow::Result<Vec<NarrativeSection>> {
            Ok(vec![NarrativeSection {
                name: "Overview".to_string(),
                kind: SECTION_KIND_TEXT.to_string(),
                content: "stub".to_string(),
            }])
        }
    }

    fn orchestrator_with(db: &Arc<GroundworkDb>, roster: AgentRoster) -> Orchestrator {
        Orchestrator::new(
            Arc::clone(db),
            roster,
            Arc::new(FixedPlanner),
            Arc::new(NoopWriter),
        )
    }

    fn started_request(session_id: &str, stage: u8) -> ChatRequest {
        ChatRequest {
            connection_status: ConnectionStatus::Started,
            session_id: session_id.to_string(),
            user_id: None,
            user_message: None,
            idea_state_stage: stage,
            user_preferences: None,
        }
    }

    fn active_request(session_id: &str, stage: u8, message: &str) -> ChatRequest {
        ChatRequest {
            connection_status: ConnectionStatus::Active,
            session_id: session_id.to_string(),
            user_id: None,
            user_message: Some(message.to_string()),
            idea_state_stage: stage,
            user_preferences: None,
        }
    }

    async fn drain(
        orchestrator: &Orchestrator,
        request: ChatRequest,
    ) -> Vec<ChatResponse> {
        let (tx, mut rx) = mpsc::channel(32);
        orchestrator.handle_turn(request, &tx).await;
        drop(tx);
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_started_seeds_welcome_for_new_session() {
        let path = ".groundwork/test_router_welcome.db";
        fs::create_dir_all(".groundwork").ok();
        let _ = fs::remove_file(path);

        let db = Arc::new(GroundworkDb::open_at(path).unwrap());
        let orchestrator = orchestrator_with(&db, AgentRoster::new());

        let lines = drain(&orchestrator, started_request("sess-1", 1)).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].connection_status, ConnectionStatus::Started);
        assert_eq!(lines[0].idea_state_stage, 1);
        let messages = lines[0].messages.as_ref().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.contains("Welcome to Groundwork"));

        // Reconnecting replays the persisted welcome instead of reseeding
        let lines = drain(&orchestrator, started_request("sess-1", 1)).await;
        assert_eq!(lines[0].messages.as_ref().unwrap().len(), 1);

        drop(orchestrator);
        drop(db);
        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_started_clamps_welcome_out_of_conversational_range() {
        let path = ".groundwork/test_router_welcome_clamp.db";
        fs::create_dir_all(".groundwork").ok();
        let _ = fs::remove_file(path);

        let db = Arc::new(GroundworkDb::open_at(path).unwrap());
        let orchestrator = orchestrator_with(&db, AgentRoster::new());

        let lines = drain(&orchestrator, started_request("sess-1", 9)).await;
        assert_eq!(lines[0].idea_state_stage, 1);
        assert_eq!(
            TranscriptManager::new(&db)
                .list_for_session("sess-1")
                .unwrap()[0]
                .stage,
            1
        );

        drop(orchestrator);
        drop(db);
        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_ongoing_turn_replies_and_persists_both_entries() {
        let path = ".groundwork/test_router_ongoing.db";
        fs::create_dir_all(".groundwork").ok();
        let _ = fs::remove_file(path);

        let db = Arc::new(GroundworkDb::open_at(path).unwrap());
        let roster = AgentRoster::new().with_agent(Arc::new(FixedAgent {
            stage: Stage::IdeaEvaluation,
            outcome: StageOutcome::IdeaEvaluation(IdeaEvaluationState {
                idea_title: Some("Trail App".to_string()),
                follow_up_question: Some("What problem does it solve?".to_string()),
                state: StageStatus::Ongoing,
                ..Default::default()
            }),
        }));
        let orchestrator = orchestrator_with(&db, roster);

        let lines = drain(&orchestrator, active_request("sess-1", 1, "An app for hikers")).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].connection_status, ConnectionStatus::Active);
        assert_eq!(lines[0].idea_state_stage, 1);
        assert_eq!(
            lines[0].response_content.as_deref(),
            Some("What problem does it solve?")
        );
        assert!(lines[0].formatted_output.is_some());

        let entries = TranscriptManager::new(&db).list_for_session("sess-1").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, MessageRole::User);
        assert_eq!(entries[0].content, "An app for hikers");
        assert_eq!(entries[1].role, MessageRole::Assistant);
        assert!(entries[1].structured.is_some());
        // An ongoing turn never merges into the shared state
        assert_eq!(orchestrator.state().snapshot().unwrap().idea_title, None);

        drop(orchestrator);
        drop(db);
        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_completed_stage_merges_and_hops_to_next() {
        let path = ".groundwork/test_router_hop.db";
        fs::create_dir_all(".groundwork").ok();
        let _ = fs::remove_file(path);

        let db = Arc::new(GroundworkDb::open_at(path).unwrap());
        let roster = AgentRoster::new()
            .with_agent(Arc::new(FixedAgent {
                stage: Stage::IdeaEvaluation,
                outcome: StageOutcome::IdeaEvaluation(IdeaEvaluationState {
                    idea_title: Some("Trail App".to_string()),
                    idea_summary_short: Some("Hiking recommendations".to_string()),
                    state: StageStatus::Completed,
                    ..Default::default()
                }),
            }))
            .with_agent(Arc::new(FixedAgent {
                stage: Stage::DeepAnalysis,
                outcome: StageOutcome::DeepAnalysis(DeepAnalysisState {
                    follow_up_question: Some("What are the must-have features?".to_string()),
                    state: StageStatus::Ongoing,
                    ..Default::default()
                }),
            }));
        let orchestrator = orchestrator_with(&db, roster);

        let lines = drain(&orchestrator, active_request("sess-1", 1, "The full pitch")).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].connection_status, ConnectionStatus::Active);
        assert_eq!(lines[0].idea_state_stage, 2);
        assert_eq!(
            lines[0].response_content.as_deref(),
            Some("What are the must-have features?")
        );

        let snapshot = orchestrator.state().snapshot().unwrap();
        assert_eq!(snapshot.idea_title, Some("Trail App".to_string()));

        let entries = TranscriptManager::new(&db).list_for_session("sess-1").unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries[1].is_completion_sentinel());
        assert_eq!(entries[1].stage, 1);
        assert_eq!(entries[2].stage, 2);

        drop(orchestrator);
        drop(db);
        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_chained_completion_stops_after_one_hop() {
        let path = ".groundwork/test_router_chain.db";
        fs::create_dir_all(".groundwork").ok();
        let _ = fs::remove_file(path);

        let db = Arc::new(GroundworkDb::open_at(path).unwrap());
        // No stage 3 agent: a second hop would fail the turn
        let roster = AgentRoster::new()
            .with_agent(Arc::new(FixedAgent {
                stage: Stage::IdeaEvaluation,
                outcome: StageOutcome::IdeaEvaluation(IdeaEvaluationState {
                    idea_title: Some("Trail App".to_string()),
                    state: StageStatus::Completed,
                    ..Default::default()
                }),
            }))
            .with_agent(Arc::new(FixedAgent {
                stage: Stage::DeepAnalysis,
                outcome: StageOutcome::DeepAnalysis(DeepAnalysisState {
                    idea_long_description: Some("A long description".to_string()),
                    follow_up_question: Some("That covers the analysis.".to_string()),
                    state: StageStatus::Completed,
                    ..Default::default()
                }),
            }));
        let orchestrator = orchestrator_with(&db, roster);

        let lines = drain(&orchestrator, active_request("sess-1", 1, "The full pitch")).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].connection_status, ConnectionStatus::Active);
        assert_eq!(lines[0].idea_state_stage, 3);
        assert_eq!(
            lines[0].response_content.as_deref(),
            Some("That covers the analysis.")
        );

        let snapshot = orchestrator.state().snapshot().unwrap();
        assert_eq!(snapshot.idea_title, Some("Trail App".to_string()));
        assert_eq!(
            snapshot.idea_long_description,
            Some("A long description".to_string())
        );

        let entries = TranscriptManager::new(&db).list_for_session("sess-1").unwrap();
        assert!(entries[1].is_completion_sentinel());
        assert!(entries[2].is_completion_sentinel());
        assert_eq!(entries[2].stage, 2);
        assert_eq!(
            resolve_stage(&entries),
            StageResolution::Conversational(Stage::TeamProfile)
        );

        drop(orchestrator);
        drop(db);
        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_stage_eight_completion_announces_finalization() {
        let path = ".groundwork/test_router_stage_eight.db";
        fs::create_dir_all(".groundwork").ok();
        let _ = fs::remove_file(path);

        let db = Arc::new(GroundworkDb::open_at(path).unwrap());
        let transcripts = TranscriptManager::new(&db);
        transcripts
            .append(&TranscriptEntry::assistant(
                "sess-1",
                "Any stack preferences?",
                Some(serde_json::json!({"state": "ongoing"})),
                8,
            ))
            .unwrap();

        let roster = AgentRoster::new().with_agent(Arc::new(FixedAgent {
            stage: Stage::TechImplementation,
            outcome: StageOutcome::TechImplementation(
                crate::agents::TechImplementationState {
                    state: StageStatus::Completed,
                    ..Default::default()
                },
            ),
        }));
        let orchestrator = orchestrator_with(&db, roster);

        let lines = drain(&orchestrator, active_request("sess-1", 8, "React and Postgres")).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].connection_status, ConnectionStatus::Active);
        assert_eq!(lines[0].idea_state_stage, 9);

        let entries = transcripts.list_for_session("sess-1").unwrap();
        assert!(entries.last().unwrap().is_completion_sentinel());
        assert_eq!(resolve_stage(&entries), StageResolution::Finalize);

        drop(orchestrator);
        drop(db);
        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_finalization_turn_streams_events_then_terminal_line() {
        let path = ".groundwork/test_router_finalize.db";
        fs::create_dir_all(".groundwork").ok();
        let _ = fs::remove_file(path);

        let db = Arc::new(GroundworkDb::open_at(path).unwrap());
        let transcripts = TranscriptManager::new(&db);
        // Stage 1 outcome that rehydration will replay into the state
        transcripts
            .append(&TranscriptEntry::assistant(
                "sess-1",
                STAGE_COMPLETED,
                Some(serde_json::json!({
                    "idea_title": "Trail App",
                    "idea_summary_short": "Hiking recommendations",
                    "state": "completed",
                })),
                1,
            ))
            .unwrap();
        transcripts
            .append(&TranscriptEntry::assistant(
                "sess-1",
                STAGE_COMPLETED,
                Some(serde_json::json!({"state": "completed"})),
                8,
            ))
            .unwrap();

        let orchestrator = orchestrator_with(&db, AgentRoster::new()).with_completion_config(
            CompletionConfig {
                sprint_weeks: 1,
                today_already_used: false,
                base_date: Some("2024-01-01T15:00:00Z".parse().unwrap()),
                narrative: NarrativeJobConfig {
                    budget: std::time::Duration::ZERO,
                    category_delay: std::time::Duration::ZERO,
                },
            },
        );

        let request = ChatRequest {
            user_id: Some("u-1".to_string()),
            ..active_request("sess-1", 9, "Let's finalize")
        };
        let lines = drain(&orchestrator, request).await;

        // 11 step events for one week, then the terminal line
        assert_eq!(lines.len(), 12);
        for line in &lines[..11] {
            assert_eq!(line.connection_status, ConnectionStatus::EventsStreaming);
            assert!(line.event.is_some());
        }
        let terminal = lines.last().unwrap();
        assert_eq!(terminal.connection_status, ConnectionStatus::EventsCompleted);
        assert_eq!(terminal.idea_state_stage, 9);
        assert!(terminal.response_content.as_ref().unwrap().contains("PROJ-"));

        let entries = transcripts.list_for_session("sess-1").unwrap();
        let last = entries.last().unwrap();
        assert_eq!(last.stage, 9);
        assert!(last.structured.as_ref().unwrap()["project_key"]
            .as_str()
            .unwrap()
            .starts_with("PROJ-"));

        // A further turn refuses to run the pipeline again
        let lines = drain(&orchestrator, active_request("sess-1", 9, "again please")).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].connection_status, ConnectionStatus::EventsCompleted);
        assert!(lines[0]
            .response_content
            .as_ref()
            .unwrap()
            .contains("already been finalized"));

        drop(orchestrator);
        drop(db);
        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_active_turn_rejects_blank_message() {
        let path = ".groundwork/test_router_blank.db";
        fs::create_dir_all(".groundwork").ok();
        let _ = fs::remove_file(path);

        let db = Arc::new(GroundworkDb::open_at(path).unwrap());
        let orchestrator = orchestrator_with(&db, AgentRoster::new());

        let lines = drain(&orchestrator, active_request("sess-1", 1, "   ")).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].connection_status, ConnectionStatus::Error);
        assert!(lines[0]
            .error_message
            .as_ref()
            .unwrap()
            .contains("user_message"));
        assert!(TranscriptManager::new(&db)
            .list_for_session("sess-1")
            .unwrap()
            .is_empty());

        drop(orchestrator);
        drop(db);
        let _ = fs::remove_file(path);
    }
}
