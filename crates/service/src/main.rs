use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::{Parser, Subcommand};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use cps_capabilities::mock::{MockScriptGenerator, MockVideoAssembler, MockYoutubeUploader};
use cps_domain::config::{Config, ConfigSeverity, CorsConfig};
use cps_service::api::{self, AppState};
use cps_service::calendar::CalendarManager;
use cps_service::events::EventBus;
use cps_service::executor::JobExecutor;
use cps_service::pipeline::Capabilities;
use cps_service::recurring::RecurringScheduler;
use cps_service::runtime::cancel::CancelMap;
use cps_service::scheduler::ContentScheduler;
use cps_service::store::JobStore;

#[derive(Parser)]
#[command(name = "content-scheduler", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP/WebSocket server (default when no subcommand is given).
    Serve,
    /// Validate the resolved configuration and exit.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Validate,
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = load_config()?;

            let issues = config.validate();
            for issue in &issues {
                match issue.severity {
                    ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
                    ConfigSeverity::Error => tracing::error!("config: {issue}"),
                }
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                tracing::error!("refusing to start with invalid configuration");
                std::process::exit(1);
            }

            match run_server(config).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    tracing::error!(error = %e, "content-scheduler exited with an error");
                    std::process::exit(2);
                }
            }
        }
        Some(Command::Config { action }) => {
            let config = load_config()?;
            match action {
                ConfigAction::Validate => {
                    let issues = config.validate();
                    for issue in &issues {
                        println!("{issue}");
                    }
                    let has_errors = issues.iter().any(|i| i.severity == ConfigSeverity::Error);
                    if has_errors {
                        std::process::exit(1);
                    }
                    Ok(())
                }
                ConfigAction::Show => {
                    println!("{}", serde_json::to_string_pretty(&config)?);
                    Ok(())
                }
            }
        }
    }
}

fn load_config() -> anyhow::Result<Config> {
    Config::load().map_err(|e| anyhow::anyhow!("{e}")).context("loading configuration")
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,cps_service=debug")),
        )
        .json()
        .init();
}

/// Runs the server given an already-validated `config` (the `serve` arm of
/// `main` gates on `Config::validate` before calling this, so any error
/// surfacing from here is a runtime failure — store unreachable or the
/// listener failing to bind — not a configuration problem).
async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::info!("content-scheduler starting");

    // ── Store ────────────────────────────────────────────────────────
    let store = Arc::new(
        JobStore::load(&config.store.url)
            .await
            .context("loading job store")?,
    );
    tracing::info!(dir = %config.store.url, "job store ready");

    // ── Calendar ─────────────────────────────────────────────────────
    let calendar = Arc::new(CalendarManager::new(config.calendar.clone()));
    calendar.rebuild_from(store.list_slots().await);
    tracing::info!("calendar manager ready");

    // ── Executor ─────────────────────────────────────────────────────
    let cancels = Arc::new(CancelMap::new());
    let executor = Arc::new(JobExecutor::new(config.scheduler.max_concurrent_jobs, cancels));
    tracing::info!(max_concurrent = config.scheduler.max_concurrent_jobs, "job executor ready");

    // ── Capabilities (mocked until real adapters are wired in) ────────
    let capabilities = Arc::new(Capabilities {
        scripts: Arc::new(MockScriptGenerator),
        assembler: Arc::new(MockVideoAssembler),
        uploader: Arc::new(MockYoutubeUploader),
    });
    tracing::info!("capabilities ready (mock script/assemble/upload)");

    // ── Content scheduler ────────────────────────────────────────────
    let events = EventBus::new();
    let scheduler = ContentScheduler::new(
        Arc::clone(&store),
        Arc::clone(&calendar),
        executor,
        events.clone(),
        capabilities,
        config.scheduler.clone(),
    );
    scheduler.recover_interrupted_jobs().await;
    tracing::info!("content scheduler ready");

    // ── Recurring scheduler ──────────────────────────────────────────
    let recurring = RecurringScheduler::new(Arc::clone(&store), Arc::clone(&scheduler));
    tracing::info!("recurring scheduler ready");

    // ── Dispatch loop ────────────────────────────────────────────────
    {
        let scheduler = Arc::clone(&scheduler);
        let interval_secs = config.scheduler.check_interval_seconds.max(1);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                let dispatched = scheduler.dispatch_once().await;
                if dispatched > 0 {
                    tracing::info!(dispatched, "dispatch tick");
                }
            }
        });
    }

    // ── Recurring-schedule tick loop ─────────────────────────────────
    {
        let recurring = Arc::clone(&recurring);
        let interval_secs = config.scheduler.check_interval_seconds.max(1);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                let fired = recurring.tick_once().await;
                if fired > 0 {
                    tracing::info!(fired, "recurring schedule tick");
                }
            }
        });
    }

    // ── Router ───────────────────────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);
    let app = api::router(AppState {
        scheduler,
        recurring,
        calendar,
        events,
        ws_idle_timeout_seconds: config.server.ws_idle_timeout_seconds,
    })
    .layer(cors_layer);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "content-scheduler listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server error")?;

    tracing::info!("content-scheduler shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

/// Build a [`CorsLayer`] from the configured allowed origins. Origins may
/// carry a trailing `:*` wildcard for the port segment; a literal `"*"`
/// allows all origins.
fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
