//! Full intake journey driven through the crate's public surface: scripted
//! stage agents walk a session from the opening word to a finalized project
//! with a persisted schedule and background-written workspace sections.

use async_trait::async_trait;
use groundwork_core::agents::{
    AgentRoster, BusinessGoalsState, ChatTurn, ConstraintAnalysisState, DeepAnalysisState,
    ExecutionPreferencesState, IdeaEvaluationState, MarketCompetitionState, NarrativeCategory,
    NarrativeSection, NarrativeWriter, SprintPlanner, SprintTask, SprintWeek, Stage, StageAgent,
    StageOutcome, StageStatus, TaskPriority, TeamProfileState, TechImplementationState,
    SECTION_KIND_TEXT,
};
use groundwork_core::flow::{
    ChatRequest, ChatResponse, CompletionConfig, ConnectionStatus, NarrativeJobConfig,
    Orchestrator,
};
use groundwork_core::state::{
    GroundworkDb, MessageRole, ProjectManager, SectionManager, TranscriptManager,
};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Completes its stage on the first user message, every time
struct ScriptedAgent {
    stage: Stage,
}

#[async_trait]
impl StageAgent for ScriptedAgent {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn invoke(&self, _turns: &[ChatTurn]) -> anyhow::Result<StageOutcome> {
        let follow_up = Some(format!("Next question from stage {}", self.stage.number()));
        Ok(match self.stage {
            Stage::IdeaEvaluation => StageOutcome::IdeaEvaluation(IdeaEvaluationState {
                idea_title: Some("Trail Companion".to_string()),
                idea_summary_short: Some("Personalized hiking recommendations".to_string()),
                follow_up_question: follow_up,
                state: StageStatus::Completed,
                ..Default::default()
            }),
            Stage::DeepAnalysis => StageOutcome::DeepAnalysis(DeepAnalysisState {
                follow_up_question: follow_up,
                state: StageStatus::Completed,
                ..Default::default()
            }),
            Stage::TeamProfile => StageOutcome::TeamProfile(TeamProfileState {
                follow_up_question: follow_up,
                state: StageStatus::Completed,
                ..Default::default()
            }),
            Stage::BusinessGoals => StageOutcome::BusinessGoals(BusinessGoalsState {
                follow_up_question: follow_up,
                state: StageStatus::Completed,
                ..Default::default()
            }),
            Stage::MarketCompetition => StageOutcome::MarketCompetition(MarketCompetitionState {
                follow_up_question: follow_up,
                state: StageStatus::Completed,
                ..Default::default()
            }),
            Stage::ConstraintAnalysis => {
                StageOutcome::ConstraintAnalysis(ConstraintAnalysisState {
                    follow_up_question: follow_up,
                    state: StageStatus::Completed,
                    ..Default::default()
                })
            }
            Stage::ExecutionPreferences => {
                StageOutcome::ExecutionPreferences(ExecutionPreferencesState {
                    follow_up_question: follow_up,
                    state: StageStatus::Completed,
                    ..Default::default()
                })
            }
            Stage::TechImplementation => {
                StageOutcome::TechImplementation(TechImplementationState {
                    follow_up_question: follow_up,
                    state: StageStatus::Completed,
                    ..Default::default()
                })
            }
            Stage::Completion => anyhow::bail!("stage 9 never reaches an agent"),
        })
    }
}

struct EagerPlanner;

#[async_trait]
impl SprintPlanner for EagerPlanner {
    async fn plan_week(&self, _idea_context: &str, week: u32) -> anyhow::Result<SprintWeek> {
        Ok(SprintWeek {
            week,
            tasks: vec![SprintTask {
                title: format!("Week {} milestone", week),
                description: "Ship it".to_string(),
                priority: TaskPriority::High,
                timeline_days: 2.0,
                assignee_email: None,
                sub_tasks: None,
            }],
        })
    }
}

struct StubWriter;

#[async_trait]
impl NarrativeWriter for StubWriter {
    async fn write_category(
        &self,
        _idea_context: &str,
        category: NarrativeCategory,
    ) -> anyhow::Result<Vec<NarrativeSection>> {
        Ok(vec![NarrativeSection {
            name: format!("{} overview", category.title()),
            kind: SECTION_KIND_TEXT.to_string(),
            content: "Written in the background".to_string(),
        }])
    }
}

fn scripted_roster() -> AgentRoster {
    let mut roster = AgentRoster::new();
    for stage in Stage::conversational() {
        roster = roster.with_agent(Arc::new(ScriptedAgent { stage }));
    }
    roster
}

fn orchestrator_over(db: &Arc<GroundworkDb>) -> Orchestrator {
    Orchestrator::new(
        Arc::clone(db),
        scripted_roster(),
        Arc::new(EagerPlanner),
        Arc::new(StubWriter),
    )
    .with_completion_config(CompletionConfig {
        sprint_weeks: 2,
        narrative: NarrativeJobConfig {
            category_delay: Duration::ZERO,
            ..Default::default()
        },
        ..Default::default()
    })
}

fn started(session_id: &str) -> ChatRequest {
    ChatRequest {
        connection_status: ConnectionStatus::Started,
        session_id: session_id.to_string(),
        user_id: None,
        user_message: None,
        idea_state_stage: 1,
        user_preferences: None,
    }
}

fn active(session_id: &str, message: &str) -> ChatRequest {
    ChatRequest {
        connection_status: ConnectionStatus::Active,
        session_id: session_id.to_string(),
        user_id: None,
        user_message: Some(message.to_string()),
        idea_state_stage: 1,
        user_preferences: None,
    }
}

async fn drain(orchestrator: &Orchestrator, request: ChatRequest) -> Vec<ChatResponse> {
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
async fn test_intake_journey_reaches_finalized_project() {
    let db_path = ".groundwork/test_intake_journey.db";
    fs::create_dir_all(".groundwork").ok();
    let _ = fs::remove_file(db_path);

    let db = Arc::new(GroundworkDb::open_at(db_path).unwrap());
    let orchestrator = orchestrator_over(&db);

    // Handshake seeds the welcome message.
    let lines = drain(&orchestrator, started("sess-journey")).await;
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].connection_status, ConnectionStatus::Started);
    assert_eq!(lines[0].idea_state_stage, 1);

    // Every scripted agent completes immediately, so each turn records two
    // stages and replies with the hopped stage's wrap-up. The client's
    // claimed stage is ignored; the transcript decides.
    for (message, expected_stage) in [
        ("an app for hikers", 3),
        ("it ranks trails by fitness level", 5),
        ("two founders, both technical", 7),
    ] {
        let lines = drain(&orchestrator, active("sess-journey", message)).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].connection_status, ConnectionStatus::Active);
        assert_eq!(lines[0].idea_state_stage, expected_stage);
    }

    // Completing stage eight announces the pipeline instead of hopping on.
    let lines = drain(&orchestrator, active("sess-journey", "rust backend, flutter app")).await;
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].idea_state_stage, 9);
    let notice = lines[0].response_content.clone().unwrap_or_default();
    assert!(notice.contains("Every stage is complete"), "got: {notice}");

    // Finalization turn: five step pairs, the pipeline completion event,
    // then the terminal line.
    let request = ChatRequest {
        user_id: Some("founder-1".to_string()),
        ..active("sess-journey", "go ahead")
    };
    let lines = drain(&orchestrator, request).await;
    assert_eq!(lines.len(), 12);
    for line in &lines[..11] {
        assert_eq!(line.connection_status, ConnectionStatus::EventsStreaming);
        assert!(line.event.is_some());
    }
    let terminal = &lines[11];
    assert_eq!(terminal.connection_status, ConnectionStatus::EventsCompleted);
    assert_eq!(terminal.idea_state_stage, 9);
    let content = terminal.response_content.clone().unwrap_or_default();
    assert!(content.contains("PROJ-"), "got: {content}");
    assert!(content.contains("2 tasks"), "got: {content}");

    // The terminal transcript entry carries the project reference.
    let transcripts = TranscriptManager::new(&db);
    let entries = transcripts.list_for_session("sess-journey").unwrap();
    let terminal_entry = entries
        .iter()
        .rev()
        .find(|e| e.stage == 9 && e.role == MessageRole::Assistant)
        .expect("terminal transcript entry");
    let structured = terminal_entry.structured.clone().expect("project reference");
    let project_id = structured["project_id"].as_str().unwrap().to_string();
    let project_key = structured["project_key"].as_str().unwrap().to_string();
    assert!(project_key.starts_with("PROJ-"));

    // Project and dated tasks were persisted with generated keys.
    let projects = ProjectManager::new(&db);
    let project = projects.get_project(&project_id).unwrap().expect("project row");
    assert_eq!(project.name, "Trail Companion");
    let tasks = projects.list_tasks_for_project(&project_id).unwrap();
    assert_eq!(tasks.len(), 2);
    for task in &tasks {
        assert!(task.key.starts_with(&format!("{}-SP-", project_key)));
        assert!(task.start_date.is_some());
        assert!(task.due_date.is_some());
    }

    // The detached narrative job persists one section per category.
    let sections = SectionManager::new(&db);
    let mut rows = Vec::new();
    for _ in 0..100 {
        rows = sections.list_for_project(&project_id).unwrap();
        if rows.len() >= NarrativeCategory::all().len() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(rows.len(), NarrativeCategory::all().len());

    // Reconnecting replays the visible transcript: the welcome, the four
    // user turns and the terminal summary. Sentinels stay internal.
    let replay = drain(&orchestrator, started("sess-journey")).await;
    assert_eq!(replay[0].connection_status, ConnectionStatus::Started);
    assert_eq!(replay[0].idea_state_stage, 9);
    let messages = replay[0].messages.clone().unwrap_or_default();
    assert_eq!(messages.len(), 6);
    assert!(messages.iter().all(|m| m.content != "Stage completed"));

    // Further conversational turns are refused.
    let lines = drain(&orchestrator, active("sess-journey", "one more thing")).await;
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].connection_status, ConnectionStatus::EventsCompleted);
    let content = lines[0].response_content.clone().unwrap_or_default();
    assert!(content.contains("already been finalized"), "got: {content}");

    drop(orchestrator);
    drop(db);
    let _ = fs::remove_file(db_path);
}

#[tokio::test]
async fn test_restart_rehydrates_idea_state_from_transcript() {
    let db_path = ".groundwork/test_intake_restart.db";
    fs::create_dir_all(".groundwork").ok();
    let _ = fs::remove_file(db_path);

    let db = Arc::new(GroundworkDb::open_at(db_path).unwrap());

    let first = orchestrator_over(&db);
    drain(&first, started("sess-restart")).await;
    let lines = drain(&first, active("sess-restart", "an app for hikers")).await;
    assert_eq!(lines[0].idea_state_stage, 3);
    drop(first);

    // A fresh orchestrator starts with blank in-memory state and must
    // rebuild it from the persisted completions before answering.
    let second = orchestrator_over(&db);
    let lines = drain(&second, active("sess-restart", "two founders")).await;
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].idea_state_stage, 5);

    let formatted = lines[0].formatted_output.clone().expect("idea context");
    assert_eq!(
        formatted["idea_title"].as_str(),
        Some("Trail Companion"),
        "title merged before the restart must survive it"
    );

    drop(second);
    drop(db);
    let _ = fs::remove_file(db_path);
}
