use std::process::ExitCode;
use std::sync::Arc;

use axum::routing::{get, post};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relaycore::cli::Cli;
use relaycore::proxy::handler;
use relaycore::proxy::orchestrator::Orchestrator;
use relaycore::proxy::retry::RetryConfig;
use relaycore::repo::{InMemoryProviderRepo, StaticKeyResolver};
use relaycore::sink::{InMemoryLogSink, PostgresLogSink};
use relaycore::{config, scheduler, AppState};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fatal: {e:?}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Exit code 2 is reserved for a persistent store configured but
/// unreachable at startup; everything else is a generic config failure.
fn exit_code_for(error: &anyhow::Error) -> u8 {
    if error.to_string().contains("unreachable log store") {
        2
    } else {
        1
    }
}

async fn run() -> anyhow::Result<()> {
    let cfg = config::load()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(cfg.log_filter.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let port = cli.port.unwrap_or(cfg.gateway_port);

    let sink: Arc<dyn relaycore::sink::LogSink> = match &cfg.database_url {
        Some(url) => {
            let pg = PostgresLogSink::connect(url)
                .await
                .map_err(|e| anyhow::anyhow!("unreachable log store: {e}"))?;
            pg.migrate().await?;
            tracing::info!("log sink: postgres");
            Arc::new(pg)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; falling back to the in-memory log sink (logs are lost on restart)");
            Arc::new(InMemoryLogSink::new())
        }
    };

    // No admin surface wired yet: the repo starts empty until one is configured.
    let repo = Arc::new(InMemoryProviderRepo::new(Vec::new(), Vec::new(), Vec::new()));
    let key_resolver = Arc::new(StaticKeyResolver::new(1, "dev"));

    let retry_config = RetryConfig { max_attempts: cfg.retry_max_attempts, delay_ms: cfg.retry_delay_ms };
    let orchestrator = Orchestrator::new(repo, sink.clone(), cfg.http_timeout, retry_config);

    scheduler::spawn(sink, cfg.log_cleanup_hour, cfg.log_retention_days);

    let state = Arc::new(AppState { orchestrator, key_resolver });

    let app = axum::Router::new()
        .route("/healthz", get(handler::healthz))
        .route("/v1/chat/completions", post(handler::chat_completions))
        .route("/v1/completions", post(handler::completions))
        .route("/v1/embeddings", post(handler::embeddings))
        .route("/v1/messages", post(handler::messages))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "relaycore listening");
    axum::serve(listener, app).await?;

    Ok(())
}
