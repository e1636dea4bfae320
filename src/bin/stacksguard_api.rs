//! StacksGuard API Server
//!
//! REST API for contract analysis, human audit records and reputation
//! queries.
//!
//! Usage:
//!   cargo run --bin stacksguard_api
//!
//! Environment:
//!   PORT / GUARD_PORT        - Server port (default: 8080)
//!   GUARD_HOST               - Server host (default: 0.0.0.0)
//!   GEMINI_API_KEY           - Scoring oracle key
//!   GUARD_REGISTRY_CONTRACT  - Query the on-chain registry instead of the local one
//!   GUARD_AUDITOR_KEYS       - auditor=key pairs allowed to write human audits
//!   RUST_LOG                 - Log filter (default: info)

use stacksguard::api::{create_router, start_cleanup_task, AppState};
use stacksguard::core::ReputationSource;
use stacksguard::providers::LedgerClient;
use stacksguard::{GuardConfig, GuardService, GuardTelemetry, QueryGateway};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    print_banner();

    let config = GuardConfig::from_env()?;

    let telemetry = Arc::new(GuardTelemetry::with_export_dir(PathBuf::from("./telemetry"), 1000));
    let telemetry_for_shutdown = telemetry.clone();

    let service = Arc::new(GuardService::from_config(&config, telemetry)?);

    // Consumers read the on-chain registry when one is configured
    let source: Arc<dyn ReputationSource> = match &config.ledger.registry_contract {
        Some(_) => {
            let client = LedgerClient::new(&config.ledger)?;
            info!("⛓️ Query gateway reads {} on {}", client.contract_id(), config.ledger.network.name());
            Arc::new(client)
        }
        None => {
            info!("🗂️ Query gateway reads the local registry");
            service.registry().clone()
        }
    };
    let gateway = Arc::new(QueryGateway::new(source).with_timeout(config.ledger.timeout));

    let state = Arc::new(AppState::new(service, gateway).with_auditor_keys(config.auditor_keys.clone()));

    start_cleanup_task();
    info!("🧹 Background cleanup task started");

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    info!("🚀 StacksGuard API starting on http://{}", addr);
    info!("");
    info!("Endpoints:");
    info!("  POST /v1/analyze                    - Analyze contract source");
    info!("  POST /v1/contracts/:id/analyze      - Analyze and record (ai)");
    info!("  POST /v1/contracts/:id/audits       - Record a human audit (auditor key)");
    info!("  GET  /v1/contracts/:id              - Reputation entry");
    info!("  GET  /v1/contracts/:id/history      - Audit history");
    info!("  GET  /v1/contracts/:id/score        - Gateway score");
    info!("  GET  /v1/contracts/:id/flagged      - Gateway flag (?mode=conservative)");
    info!("  GET  /v1/stats                      - Telemetry");
    info!("  GET  /v1/health                     - Health check");
    info!("");
    info!("Press Ctrl+C for graceful shutdown");

    let listener = TcpListener::bind(addr).await?;

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("⚠️ Failed to listen for Ctrl+C: {}", e);
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("");
    info!("🛑 Shutdown signal received, cleaning up...");

    let stats = telemetry_for_shutdown.get_stats();
    println!("{}", stats.summary_report());

    match telemetry_for_shutdown.export_stats_json() {
        Ok(path) => info!("   ✅ Stats exported to: {}", path.display()),
        Err(e) => warn!("   ⚠️ Failed to export stats: {}", e),
    }

    info!("👋 StacksGuard API shutdown complete");

    Ok(())
}

fn print_banner() {
    println!(
        r#"
    ╔══════════════════════════════════════════════════════════════╗
    ║                                                              ║
    ║        S T A C K S G U A R D                                 ║
    ║                                                              ║
    ║        Token Reputation Registry  ·  API v{:<8}            ║
    ║        AI-assisted triage for Clarity contracts              ║
    ║                                                              ║
    ╚══════════════════════════════════════════════════════════════╝
    "#,
        env!("CARGO_PKG_VERSION")
    );
}
