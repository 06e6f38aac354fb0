//! dispatchbox entry point.
//!
//! Thin by design: parse flags into a `Config`, start tracing, optionally
//! start the admin HTTP surface, then hand off to the supervisor. All
//! business logic lives in the library crates.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use dispatchbox_admin::{routes, state::AppState, MetricsRegistry};
use dispatchbox_config::{Config, LogLevel};
use dispatchbox_db::{RepoConfig, Repository};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Outbox worker (multi-process, SKIP LOCKED). Fetches pending/retry events
/// from Postgres and processes them under bounded concurrency.
#[derive(Parser, Debug)]
#[command(name = "dispatchbox", about, long_about = None)]
struct Cli {
    /// Postgres DSN (libpq style) or connection string.
    #[arg(long)]
    dsn: String,

    /// Number of worker tasks to start.
    #[arg(long, default_value_t = dispatchbox_config::DEFAULT_NUM_WORKERS)]
    processes: usize,

    /// How many events to fetch per DB round.
    #[arg(long = "batch-size", default_value_t = dispatchbox_config::DEFAULT_BATCH_SIZE)]
    batch_size: i64,

    /// Seconds to sleep when no work is available.
    #[arg(long = "poll-interval", default_value_t = 1.0)]
    poll_interval: f64,

    /// Maximum number of concurrent handler invocations per worker.
    #[arg(long = "max-parallel", default_value_t = dispatchbox_config::DEFAULT_MAX_PARALLEL)]
    max_parallel: usize,

    /// Seconds to wait before retrying a failed event.
    #[arg(long = "retry-backoff-seconds", default_value_t = dispatchbox_config::DEFAULT_RETRY_BACKOFF_SECONDS)]
    retry_backoff_seconds: i64,

    /// Dispatch attempts allowed before an event is dead-lettered.
    #[arg(long = "max-attempts", default_value_t = dispatchbox_config::DEFAULT_MAX_ATTEMPTS)]
    max_attempts: i32,

    /// Logging level.
    #[arg(long = "log-level", default_value = "INFO")]
    log_level: String,

    /// Admin HTTP server host.
    #[arg(long = "http-host", default_value = dispatchbox_config::DEFAULT_HTTP_HOST)]
    http_host: String,

    /// Admin HTTP server port.
    #[arg(long = "http-port", default_value_t = dispatchbox_config::DEFAULT_HTTP_PORT)]
    http_port: u16,

    /// Disable the admin HTTP server entirely.
    #[arg(long = "disable-http")]
    disable_http: bool,

    /// Per-handler dispatch deadline in seconds. Unset (default) preserves
    /// unbounded handler execution, matching the source's observable
    /// behavior.
    #[arg(long = "handler-timeout-seconds")]
    handler_timeout_seconds: Option<u64>,
}

impl TryFrom<Cli> for Config {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let log_level = LogLevel::parse(&cli.log_level)
            .ok_or_else(|| anyhow::anyhow!("unknown log level: {}", cli.log_level))?;

        Ok(Config {
            dsn: cli.dsn,
            num_workers: cli.processes,
            batch_size: cli.batch_size,
            poll_interval: Duration::from_secs_f64(cli.poll_interval),
            max_parallel: cli.max_parallel,
            retry_backoff_seconds: cli.retry_backoff_seconds,
            max_attempts: cli.max_attempts,
            log_level,
            http_host: cli.http_host,
            http_port: cli.http_port,
            disable_http: cli.disable_http,
            handler_timeout: cli.handler_timeout_seconds.map(Duration::from_secs),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev-time .env.local bootstrap; silent if absent.
    let _ = dotenvy::from_filename(".env.local");

    let cli = Cli::parse();
    let config: Config = cli.try_into()?;
    config.validate().context("invalid configuration")?;

    init_tracing(config.log_level);

    tracing::info!(
        processes = config.num_workers,
        batch_size = config.batch_size,
        poll_interval_secs = config.poll_interval.as_secs_f64(),
        "starting dispatchbox supervisor"
    );

    // Migrate before the admin surface goes live: otherwise a DLQ request
    // landing in the startup window hits a database with no outbox_event
    // table yet. spawn_workers also migrates (idempotent, via sqlx's own
    // tracking table) as a safety net for callers that reach the supervisor
    // without going through this binary.
    run_migrations(&config.dsn)
        .await
        .context("failed to run database migrations")?;

    let mut admin_handle = None;
    if !config.disable_http {
        admin_handle = Some(start_admin_server(&config).await?);
        tracing::info!(host = %config.http_host, port = config.http_port, "admin HTTP server enabled");
    }

    let handlers = Arc::new(dispatchbox_handlers::demo::registry());
    let result = dispatchbox_supervisor::run(&config, handlers).await;

    if let Some(handle) = admin_handle {
        handle.abort();
    }

    result
}

fn init_tracing(log_level: LogLevel) {
    let default_filter = log_level.as_filter();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

/// Apply pending schema migrations with a short-lived connection, then drop
/// it. Idempotent: sqlx tracks applied migrations in its own table.
async fn run_migrations(dsn: &str) -> anyhow::Result<()> {
    let repo_config = RepoConfig {
        connect_timeout: Duration::from_secs(10),
        query_timeout: Duration::from_secs(30),
        max_attempts: 1,
        retry_backoff: chrono::Duration::seconds(0),
        max_connections: 1,
    };
    let repo = Repository::connect(dsn, repo_config)
        .await
        .context("failed to connect to database for migration")?;
    repo.migrate().await.context("failed to run database migrations")
}

/// Start the admin HTTP surface as a background task, running concurrently
/// with, but independent of, the dispatch loop.
async fn start_admin_server(config: &Config) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let metrics = MetricsRegistry::install()
        .map_err(|err| tracing::warn!(error = %err, "failed to install metrics recorder"))
        .ok();

    let state = Arc::new(AppState::new(config.dsn.clone(), metrics));
    let app = routes::build_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr: SocketAddr = format!("{}:{}", config.http_host, config.http_port)
        .parse()
        .with_context(|| format!("invalid http bind address {}:{}", config.http_host, config.http_port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind admin HTTP server to {addr}"))?;

    Ok(tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(error = %err, "admin HTTP server crashed");
        }
    }))
}

/// CORS: allow only localhost origins, since the DLQ admin API is an
/// operator-facing surface, not a public one.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
