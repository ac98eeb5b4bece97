//! # Interview Panel Backend - Main Application Entry Point
//!
//! A real-time voice interview server. Candidates connect over a
//! WebSocket, answer questions out loud, and the backend detects when
//! each answer is finished, transcribes the audio in batches, scores
//! the answer, and adapts the next question to the result.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (TOML + environment)
//! - **session**: data model and the session concurrency manager
//! - **audio**: PCM decoding, speech gate, batch flush policy
//! - **turn**: end-of-answer detection state machine
//! - **interview**: question bank, adaptive selection, scoring
//! - **jobs**: background transcription/scoring/report work
//! - **collaborators**: speech-to-text and analyzer integrations
//! - **ws**: the per-connection orchestrating actor

mod audio;
mod collaborators;
mod config;
mod error;
mod handlers;
mod health;
mod interview;
mod jobs;
mod session;
mod state;
mod turn;
mod ws;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use collaborators::{
    AnswerAnalyzer, DisabledSpeechToText, NeutralAnalyzer, OllamaAnalyzer, SpeechToText,
    TextReportRenderer, WhisperSpeechToText,
};
use config::AppConfig;
use jobs::{JobDispatcher, JobRunner};
use session::store::SessionStore;
use state::AppState;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!(
        "Starting interview-panel-backend v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!(
        "Configuration loaded: {}:{}",
        config.server.host, config.server.port
    );

    let store = Arc::new(SessionStore::new());
    enroll_candidates(&config, &store)?;

    let dispatcher = JobDispatcher::new(JobRunner {
        store: store.clone(),
        stt: build_speech_to_text(&config),
        analyzer: build_analyzer(&config),
        reporter: Arc::new(TextReportRenderer),
        scoring: config.scoring.clone(),
        jobs: config.jobs.clone(),
    });

    let app_state = AppState::new(config.clone(), store, dispatcher);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .route("/ws/interview/{token}", web::get().to(ws::interview_websocket))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Load the question bank and enroll a session per candidate token.
fn enroll_candidates(config: &AppConfig, store: &Arc<SessionStore>) -> Result<()> {
    if config.interview.bank_path.is_empty() {
        warn!("No question bank configured (interview.bank_path); no sessions enrolled");
        return Ok(());
    }

    let content = interview::bank::load_bank(Path::new(&config.interview.bank_path))
        .context("loading question bank")?;

    if content.tokens.is_empty() {
        warn!("Question bank has no candidate tokens; no sessions enrolled");
        return Ok(());
    }

    for token in &content.tokens {
        store
            .register_candidate(token, content.bank.clone(), content.distribution.clone())
            .with_context(|| format!("enrolling token '{}'", token))?;
    }

    Ok(())
}

fn build_speech_to_text(config: &AppConfig) -> Arc<dyn SpeechToText> {
    match config.models.transcriber.as_str() {
        "disabled" => {
            warn!("Speech-to-text disabled; answers rely on turn timeouts only");
            Arc::new(DisabledSpeechToText)
        }
        url => {
            info!(
                "Using Whisper transcriber at {} (model {})",
                url, config.models.transcriber_model
            );
            Arc::new(WhisperSpeechToText::new(
                url,
                &config.models.transcriber_model,
            ))
        }
    }
}

fn build_analyzer(config: &AppConfig) -> Arc<dyn AnswerAnalyzer> {
    let component_names: Vec<String> = config.scoring.weights.keys().cloned().collect();
    match config.models.analyzer_url.as_str() {
        "neutral" => {
            info!("Using built-in neutral answer analyzer");
            Arc::new(NeutralAnalyzer::new(component_names))
        }
        url => {
            info!(
                "Using Ollama analyzer at {} (model {})",
                url, config.models.analyzer_model
            );
            Arc::new(OllamaAnalyzer::new(
                url,
                &config.models.analyzer_model,
                component_names,
            ))
        }
    }
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "interview_panel_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
