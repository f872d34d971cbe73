// src/main.rs
// Interview engine HTTP server

use anyhow::{Result, bail};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use interview_engine::{
    Orchestrator,
    api::build_router,
    budget::CostLedger,
    clock::{Clock, SystemClock},
    config::{EnvConfig, FileConfig},
    generation::{DisabledGenerator, OpenAiCompatGenerator, TextGenerator},
    pool::{QuestionPool, StaticQuestionPool},
    session::{SessionStore, sweeper},
    state::AppState,
    telemetry::{EventSink, TracingSink},
};

#[derive(Parser)]
#[command(name = "interview-engine")]
#[command(about = "Adaptive interview orchestration engine")]
#[command(version)]
struct Cli {
    /// Address to bind (overrides INTERVIEW_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides INTERVIEW_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// TOML config file layered over the environment
    #[arg(short, long, env = "INTERVIEW_CONFIG")]
    config: Option<PathBuf>,

    /// Question bank TOML (defaults to the built-in bank)
    #[arg(long)]
    question_bank: Option<PathBuf>,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections...");
}

fn load_config(cli: &Cli) -> Result<EnvConfig> {
    let mut config = EnvConfig::load();
    if let Some(path) = &cli.config {
        FileConfig::load(path)?.apply(&mut config);
    }
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(bank) = &cli.question_bank {
        config.question_bank = Some(bank.clone());
    }
    Ok(config)
}

fn build_generator(config: &EnvConfig) -> Arc<dyn TextGenerator> {
    match (&config.llm.api_key, config.llm.has_provider()) {
        (Some(key), true) => {
            info!(model = %config.llm.model, base_url = %config.llm.base_url, "Follow-up generation enabled");
            Arc::new(OpenAiCompatGenerator::new(
                config.llm.base_url.clone(),
                key.clone(),
                config.llm.model.clone(),
                config.generation_timeout(),
            ))
        }
        _ => {
            info!("Follow-up generation disabled, pool questions only");
            Arc::new(DisabledGenerator)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let validation = config.validate();
    if !validation.is_valid() {
        bail!("Invalid configuration\n{}", validation.report());
    }
    for warning in &validation.warnings {
        warn!("{}", warning);
    }

    let Some(offset) = config.budget.ledger_offset() else {
        bail!(
            "Invalid ledger UTC offset: {} minutes",
            config.budget.utc_offset_minutes
        );
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sink: Arc<dyn EventSink> = Arc::new(TracingSink);

    let ledger = Arc::new(CostLedger::new(
        config.budget.pricing(),
        config.budget.limits(),
        offset,
        clock.clone(),
        sink.clone(),
    ));
    let store = Arc::new(SessionStore::new(
        config.session.timeout(),
        config.session.max_follow_ups,
        clock,
        sink.clone(),
    ));

    let bank = match &config.question_bank {
        Some(path) => StaticQuestionPool::load(path)?,
        None => StaticQuestionPool::builtin()?,
    };
    info!(questions = bank.len(), "Question bank loaded");
    let pool: Arc<dyn QuestionPool> = Arc::new(bank);

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        ledger.clone(),
        pool,
        build_generator(&config),
        sink,
        config.orchestrator_settings(),
    ));

    let (sweeper_tx, sweeper_handle) = sweeper::spawn(
        store.clone(),
        Some(ledger),
        config.session.sweep_interval(),
    );
    info!(
        "Session sweeper started - running every {} seconds",
        config.session.sweep_interval_secs
    );

    let app = build_router(Arc::new(AppState::new(orchestrator)));

    let bind_address = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Interview engine listening on http://{}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutting down gracefully...");
    let _ = sweeper_tx.send(true);
    if let Err(e) = sweeper_handle.await {
        warn!("Session sweeper did not stop cleanly: {}", e);
    }
    let dropped = store.drain();
    info!(sessions = dropped, "Shutdown complete");

    Ok(())
}
