mod background;
mod generator;
mod handlers;
mod openapi;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, patch, post};
use clap::Parser;
use tokio::sync::watch;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use pgprofile_core::source::PgSource;
use pgprofile_core::{Calculator, PublishedState, SourceError};

use generator::LoadGenerator;
use openapi::ApiDoc;
use state::{SharedState, WebAppInner};

// ============================================================
// CLI
// ============================================================

#[derive(Parser)]
#[command(
    name = "pgprofile-web",
    about = "PostgreSQL workload profiler web API",
    version = pgprofile_core::VERSION
)]
struct Args {
    /// Listen address.
    #[arg(long, default_value = "0.0.0.0:8080", env = "PGPROFILE_LISTEN")]
    listen: String,

    /// PostgreSQL connection string. Falls back to PGHOST/PGPORT/PGUSER/... when unset.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Seconds between analysis ticks.
    #[arg(long, default_value = "5", env = "PGPROFILE_ANALYSIS_INTERVAL")]
    analysis_interval: u64,

    /// Measurement window in seconds.
    #[arg(long, default_value = "30", env = "PGPROFILE_WINDOW")]
    window: u64,

    /// Seconds between session-state samples.
    #[arg(long, default_value = "5", env = "PGPROFILE_ASH_INTERVAL")]
    ash_interval: u64,

    /// Seconds between cumulative counter snapshots.
    #[arg(long, default_value = "10", env = "PGPROFILE_SNAPSHOT_INTERVAL")]
    snapshot_interval: u64,

    /// Directory with the pgbench scripts of the load scenarios.
    #[arg(long, default_value = "./scenarios", env = "PGPROFILE_SCENARIOS_DIR")]
    scenarios_dir: PathBuf,
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("pgprofile_web=info,pgprofile_core=info")
            }),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            process::exit(1);
        }
    };
    runtime.block_on(async_main(args));
}

async fn async_main(args: Args) {
    info!(version = pgprofile_core::VERSION, "starting");

    // One connection per consumer: sampling, analysis, request handlers.
    let (sampler, analyzer, api) = match (
        open_source(&args),
        open_source(&args),
        open_source(&args),
    ) {
        (Ok(s), Ok(a), Ok(h)) => (Arc::new(s), Arc::new(a), Arc::new(h)),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
            error!(error = %e, "no database configured");
            process::exit(1);
        }
    };

    let probe = Arc::clone(&api);
    match tokio::task::spawn_blocking(move || probe.try_connect()).await {
        Ok(Ok(())) => info!("connected to PostgreSQL"),
        Ok(Err(e)) => warn!(error = %e, "PostgreSQL not reachable yet, will retry"),
        Err(e) => warn!(error = %e, "connection probe failed"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let published = PublishedState::new();

    let sampling = tokio::spawn(background::sampling_loop(
        sampler,
        Duration::from_secs(args.ash_interval.max(1)),
        Duration::from_secs(args.snapshot_interval.max(1)),
        shutdown_rx.clone(),
    ));
    let analysis = tokio::spawn(background::analysis_loop(
        Calculator::new(analyzer),
        published.clone(),
        Duration::from_secs(args.analysis_interval.max(1)),
        Duration::from_secs(args.window),
        shutdown_rx.clone(),
    ));
    info!(
        window_secs = args.window,
        analysis_interval_secs = args.analysis_interval,
        "background tasks started"
    );

    let generator = LoadGenerator::new(
        api.connection_string().to_string(),
        args.scenarios_dir.clone(),
        shutdown_rx,
    );
    let state: SharedState = Arc::new(WebAppInner {
        published,
        db: api,
        generator,
    });

    // Router
    let app = Router::new()
        .route("/api/v1/health", get(handlers::handle_health))
        .route("/status", get(handlers::handle_status))
        .route("/dashboard", get(handlers::handle_dashboard))
        .route("/config/apply", get(handlers::handle_apply_preset))
        .route("/config/current", get(handlers::handle_current_config))
        .route(
            "/config/custom",
            patch(handlers::handle_custom_config).post(handlers::handle_custom_config),
        )
        .route(
            "/config/apply-recommendations",
            post(handlers::handle_apply_recommendations),
        )
        .route("/load/start", get(handlers::handle_load_start))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(Arc::clone(&state))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new());

    let addr: SocketAddr = match args.listen.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(listen = %args.listen, error = %e, "invalid listen address");
            process::exit(1);
        }
    };
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind");
            process::exit(1);
        }
    };
    info!(%addr, "listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(ctrl_c())
        .await
    {
        error!(error = %e, "server error");
    }

    info!("shutting down");
    let _ = shutdown_tx.send(true);
    for (name, handle) in [("sampling", sampling), ("analysis", analysis)] {
        if let Err(e) = handle.await {
            error!(task = name, error = %e, "background task failed");
        }
    }
    state.generator.shutdown().await;
    info!("stopped");
}

fn open_source(args: &Args) -> Result<PgSource, SourceError> {
    match &args.database_url {
        Some(url) if !url.is_empty() => Ok(PgSource::with_connection_string(url.clone())),
        _ => PgSource::from_env(),
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
