//! StacksGuard CLI
//!
//! Usage:
//!   stacksguard <contract.clar> [--json]
//!   stacksguard lookup <ADDRESS.contract-name> [--conservative]
//!
//! `analyze` exits with code 2 when the analysis is incomplete (oracle
//! unavailable or malformed reply); no score is printed in that case.
//! `lookup` queries the on-chain registry named by GUARD_REGISTRY_CONTRACT.

use eyre::{bail, Result, WrapErr};
use stacksguard::core::{FlagStatus, ScoreLookup};
use stacksguard::providers::LedgerClient;
use stacksguard::{
    AnalysisOutcome, ContractIdentity, GatewayMode, GuardConfig, PatternAnalyzer, QueryGateway,
};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

const EXIT_INCOMPLETE: i32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = GuardConfig::from_env()?;

    match args.first().map(String::as_str) {
        Some("lookup") => {
            let Some(raw) = args.get(1) else {
                bail!("usage: stacksguard lookup <ADDRESS.contract-name> [--conservative]");
            };
            let mode = if args.iter().any(|a| a == "--conservative") {
                GatewayMode::Conservative
            } else {
                GatewayMode::Permissive
            };
            lookup(&config, raw, mode).await
        }
        Some(path) if !path.starts_with("--") => {
            let json = args.iter().any(|a| a == "--json");
            analyze(&config, path, json).await
        }
        _ => bail!("usage: stacksguard <contract.clar> [--json] | stacksguard lookup <ADDRESS.contract-name>"),
    }
}

async fn analyze(config: &GuardConfig, path: &str, json: bool) -> Result<()> {
    let source = std::fs::read_to_string(path).wrap_err_with(|| format!("Failed to read {}", path))?;
    let analyzer = PatternAnalyzer::from_config(config)?;

    match analyzer.analyze_outcome(&source).await? {
        AnalysisOutcome::Verdict(verdict) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&verdict)?);
            } else {
                println!("{}", verdict.summary());
            }
            Ok(())
        }
        AnalysisOutcome::Unavailable(reason) => {
            eprintln!("⏳ Analysis incomplete: scoring oracle unavailable ({})", reason);
            std::process::exit(EXIT_INCOMPLETE);
        }
        AnalysisOutcome::Malformed(reason) => {
            eprintln!("🧩 Analysis incomplete: malformed oracle reply ({})", reason);
            std::process::exit(EXIT_INCOMPLETE);
        }
    }
}

async fn lookup(config: &GuardConfig, raw: &str, mode: GatewayMode) -> Result<()> {
    let identity: ContractIdentity = raw.parse()?;
    let client = LedgerClient::new(&config.ledger)?;
    let contract = client.contract_id();
    let gateway = QueryGateway::new(Arc::new(client)).with_timeout(config.ledger.timeout);

    println!("⛓️  Registry: {} ({})", contract, config.ledger.network.name());
    match gateway.score(&identity).await? {
        ScoreLookup::Scored(score) => println!("📊 Score:    {}", score),
        ScoreLookup::Unscored => println!("📊 Score:    unscored"),
    }

    let status = gateway.flag_status(&identity).await;
    let marker = match status {
        FlagStatus::Flagged => "🚩",
        FlagStatus::NotFlagged => "✅",
        FlagStatus::Unscored | FlagStatus::Unknown => "❔",
    };
    println!("{} Flag:     {:?} (blocks in {:?} mode: {})", marker, status, mode, mode.blocks(status));

    for report in gateway.audit_history(&identity).await? {
        println!(
            "   • {} scored {} [{}] at {}: {}",
            report.auditor, report.score, report.threat_level, report.timestamp, report.notes
        );
    }
    Ok(())
}
