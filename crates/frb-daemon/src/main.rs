//! frb-daemon entry point.
//!
//! Thin on purpose: load config, set up tracing, assemble the broker
//! runtime, wire middleware, serve until Ctrl-C. Handlers live in
//! `routes.rs`; shared state in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use frb_config::{
    load_layered_yaml, report_unused_keys, resolve_federation_secrets, UnusedKeyPolicy,
};
use frb_daemon::{routes, state};
use frb_runtime::BrokerRuntime;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "frb-daemon")]
#[command(about = "Federated resource broker daemon", long_about = None)]
struct Args {
    /// YAML config layers, later files override earlier ones.
    #[arg(long = "config", required = true)]
    config: Vec<String>,

    /// Refuse to start when the config carries keys nothing reads.
    #[arg(long, default_value_t = false)]
    strict_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();
    let args = Args::parse();

    let paths: Vec<&str> = args.config.iter().map(String::as_str).collect();
    let loaded = load_layered_yaml(&paths)?;
    let cfg = loaded.broker()?;

    let policy = if args.strict_config {
        UnusedKeyPolicy::Fail
    } else {
        UnusedKeyPolicy::Warn
    };
    let report = report_unused_keys(cfg.mode(), &loaded.config_json, policy)?;
    for key in &report.unused_leaf_pointers {
        warn!(key = %key, mode = %report.mode, "config key is not read in this mode");
    }

    let secrets = resolve_federation_secrets(&cfg)?;
    let token = secrets.token.clone();

    let runtime = Arc::new(BrokerRuntime::start(&cfg, secrets).await?);
    runtime.start_workers();

    let shared = Arc::new(
        state::AppState::new(Arc::clone(&runtime), token).with_config_hash(&loaded.config_hash),
    );
    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));
    state::spawn_transition_relay(runtime.registry(), shared.bus.clone());

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env()
        .or_else(|| cfg.server.bind_addr.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!(
        provider = %cfg.provider.id,
        mode = cfg.mode().as_str(),
        config_hash = %loaded.config_hash,
        "frb-daemon listening on http://{}",
        addr
    );

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    runtime.shutdown().await;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("FRB_DAEMON_ADDR").ok()?.parse().ok()
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl-c handler failed; shutting down");
    }
    info!("shutdown requested");
}

/// CORS: allow only localhost origins.
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
