//! Groundwork Server
//!
//! Axum server exposing the intake orchestrator. One orchestrator lives per
//! session; every chat turn is answered as a stream of newline-delimited
//! JSON objects so finalization events arrive as they happen.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use groundwork_core::flow::{ChatRequest, ChatResponse, Orchestrator, TranscriptMessage};
use groundwork_core::models::{LlmProvider, ModelConfig};
use groundwork_core::state::{GroundworkDb, TranscriptManager};
use serde::Serialize;
use std::{collections::HashMap, convert::Infallible, net::SocketAddr, sync::Arc};
use tokio::{
    net::TcpListener,
    sync::{mpsc, RwLock},
};
use tokio_stream::wrappers::ReceiverStream;
use tracing_subscriber::EnvFilter;

const DEFAULT_DB_PATH: &str = ".groundwork/groundwork.db";

/// Application state
struct AppState {
    /// Unified database for all state
    db: Arc<GroundworkDb>,
    /// LLM configuration shared by every session
    model_config: ModelConfig,
    /// One orchestrator per session, created on first request
    sessions: RwLock<HashMap<String, Arc<Orchestrator>>>,
}

type SharedState = Arc<AppState>;

impl AppState {
    async fn orchestrator_for(&self, session_id: &str) -> Arc<Orchestrator> {
        if let Some(existing) = self.sessions.read().await.get(session_id) {
            return Arc::clone(existing);
        }

        let mut sessions = self.sessions.write().await;
        // Re-check under the write lock; a concurrent request may have won
        if let Some(existing) = sessions.get(session_id) {
            return Arc::clone(existing);
        }
        let orchestrator = Arc::new(Orchestrator::llm(
            Arc::clone(&self.db),
            &self.model_config,
        ));
        sessions.insert(session_id.to_string(), Arc::clone(&orchestrator));
        orchestrator
    }
}

// === API Types ===

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct SessionMessagesResponse {
    session_id: String,
    messages: Vec<TranscriptMessage>,
}

#[derive(Parser, Clone)]
#[command(
    author,
    version,
    about = "Groundwork - conversational founder intake and sprint planning"
)]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the Groundwork server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Path to the SQLite database
        #[arg(long, default_value = DEFAULT_DB_PATH)]
        db: String,
    },
}

// === API Handlers ===

/// Streaming chat endpoint. The whole turn is answered as NDJSON: one
/// `ChatResponse` object per line, flushed as the orchestrator produces
/// them, so pipeline events stream instead of arriving in one batch.
async fn streaming_chat(
    State(state): State<SharedState>,
    Json(request): Json<ChatRequest>,
) -> impl IntoResponse {
    tracing::info!(
        session_id = %request.session_id,
        stage = request.idea_state_stage,
        "Chat turn received"
    );

    let orchestrator = state.orchestrator_for(&request.session_id).await;
    let (tx, rx) = mpsc::channel::<ChatResponse>(32);

    tokio::spawn(async move {
        orchestrator.handle_turn(request, &tx).await;
    });

    let stream = ReceiverStream::new(rx).map(|line| {
        let mut json = serde_json::to_string(&line).unwrap_or_else(|_| "{}".to_string());
        json.push('\n');
        Ok::<_, Infallible>(json)
    });

    // Anti-buffering headers keep reverse proxies from batching the lines
    let headers = [
        (header::CONTENT_TYPE, "application/x-ndjson"),
        (header::CACHE_CONTROL, "no-cache"),
        (header::CONNECTION, "keep-alive"),
        (HeaderName::from_static("x-accel-buffering"), "no"),
    ];
    (headers, Body::from_stream(stream))
}

/// Replay a session's transcript, completion sentinels filtered out
async fn session_messages(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionMessagesResponse>, StatusCode> {
    let transcripts = TranscriptManager::new(&state.db);
    let entries = transcripts.list_for_session(&session_id).map_err(|err| {
        tracing::error!("Failed to load transcript for {}: {:#}", session_id, err);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(SessionMessagesResponse {
        messages: TranscriptMessage::replay(&entries),
        session_id,
    }))
}

/// Liveness check
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// === Configuration ===

/// Model selection from environment, falling back to the OpenAI default
fn model_config_from_env() -> ModelConfig {
    let mut config = ModelConfig::default();

    if let Ok(provider) = std::env::var("GROUNDWORK_PROVIDER") {
        config.provider = match provider.as_str() {
            "openai" => LlmProvider::OpenAI,
            "gemini" => LlmProvider::Gemini,
            "anthropic" => LlmProvider::Anthropic,
            other => {
                tracing::warn!("Unknown provider '{}', keeping default", other);
                config.provider
            }
        };
    }
    if let Ok(model) = std::env::var("GROUNDWORK_MODEL") {
        config.model = model;
    }
    if let Ok(url) = std::env::var("GROUNDWORK_BASE_URL") {
        config.base_url = Some(url);
    }

    config
}

// === Server Entry ===

pub async fn run_server() -> anyhow::Result<()> {
    let args = Args::parse();

    let (port, db_path) = match args.command {
        Some(CliCommand::Serve { port, db }) => (port, db),
        None => (8080, DEFAULT_DB_PATH.to_string()),
    };

    let db = Arc::new(GroundworkDb::open_at(&db_path)?);
    let model_config = model_config_from_env();
    tracing::info!(
        provider = model_config.provider.display_name(),
        model = %model_config.model,
        "Model configuration loaded"
    );

    let state: SharedState = Arc::new(AppState {
        db,
        model_config,
        sessions: RwLock::new(HashMap::new()),
    });

    let app = Router::new()
        .route("/api/streaming", post(streaming_chat))
        .route("/api/sessions/:session_id/messages", get(session_messages))
        .route("/api/health", get(health))
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    println!("🚀 Groundwork Server running at http://{}", addr);
    println!("   Chat:       POST /api/streaming (NDJSON)");
    println!("   Transcript: GET  /api/sessions/:session_id/messages");
    println!("   Health:     GET  /api/health");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    run_server().await
}
