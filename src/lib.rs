//! StacksGuard Library
//!
//! Token reputation registry with AI-assisted triage for Clarity contracts:
//! - Pattern analyzer (lexical signature scan + scoring oracle)
//! - Ratcheting score aggregator with human overrides
//! - Append-only reputation registry
//! - Read-only query gateway over the local registry or the on-chain contract

pub mod api;
pub mod core;
pub mod models;
pub mod providers;
pub mod utils;

pub use crate::core::{
    GatewayMode, GuardService, PatternAnalyzer, QueryGateway, ReputationRegistry, ScoreAggregator,
};
pub use models::{
    AnalysisOutcome, AnalysisVerdict, AppError, AppResult, AuditRecord, ContractIdentity,
    ErrorCode, GuardConfig, Provenance, RecordKind, ReputationEntry,
};
pub use utils::{GuardTelemetry, VerdictCache};
