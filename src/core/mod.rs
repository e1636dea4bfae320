//! Core Module - analysis, aggregation, registry and query path

pub mod aggregator;
pub mod analyzer;
pub mod gateway;
pub mod registry;
pub mod risk_score;
pub mod scanner;
pub mod service;
pub mod session;

pub use aggregator::{Aggregate, ScoreAggregator};
pub use analyzer::{OracleVerdict, PatternAnalyzer};
pub use gateway::{FlagStatus, GatewayMode, QueryGateway, ReputationSource, ScoreLookup};
pub use registry::ReputationRegistry;
pub use risk_score::{breakdown, RiskScore, RiskScoreBuilder, ScoreFactor};
pub use scanner::{classify_threat, scan, ScanReport};
pub use service::{auditor_verdict, GuardService, RecordedVerdict};
pub use session::{IdentityProvider, SessionState, WalletIdentity, WalletSession};
