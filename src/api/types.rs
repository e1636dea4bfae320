//! API Request/Response Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::gateway::{FlagStatus, GatewayMode, ScoreLookup};
use crate::core::risk_score::{breakdown, ScoreFactor};
use crate::core::service::RecordedVerdict;
use crate::models::{
    AnalysisVerdict, AppError, AuditRecord, AuditReport, Recommendation, RecordKind,
    ReputationEntry, Threat,
};
use crate::utils::cache::CacheStats;
use crate::utils::telemetry::TelemetryStats;

/// API Response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    /// Set to "analysis_incomplete" when no verdict could be produced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    pub latency_ms: f64,
    pub timestamp: i64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T, latency_ms: f64) -> Self {
        Self {
            success: true,
            status: None,
            data: Some(data),
            error: None,
            latency_ms,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(error: ApiError, latency_ms: f64) -> Self {
        Self {
            success: false,
            status: None,
            data: None,
            error: Some(error),
            latency_ms,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Oracle unavailable or malformed: never carries a score
    pub fn incomplete(error: ApiError, latency_ms: f64) -> Self {
        Self {
            status: Some("analysis_incomplete"),
            ..Self::error(error, latency_ms)
        }
    }
}

/// API Error
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn unauthorized() -> Self {
        Self {
            code: "API_UNAUTHORIZED".to_string(),
            message: "Invalid or missing auditor API key".to_string(),
            retryable: false,
            details: None,
        }
    }

    pub fn rate_limited(retry_after: u64) -> Self {
        Self {
            code: "API_RATE_LIMITED".to_string(),
            message: format!("Rate limit exceeded. Retry after {} seconds", retry_after),
            retryable: true,
            details: Some(format!("retry_after: {}", retry_after)),
        }
    }
}

impl From<&AppError> for ApiError {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.code_str().to_string(),
            message: err.message.clone(),
            retryable: err.code.is_retryable(),
            details: None,
        }
    }
}

// ============================================
// Analysis
// ============================================

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(rename = "contractCode", alias = "contract_code")]
    pub contract_code: String,
}

/// Analyzer output. `threats` keeps the plain string list older clients
/// read; `findings` carries severity and source, `breakdown` the weight
/// each finding adds.
#[derive(Debug, Serialize)]
pub struct AnalysisData {
    pub score: u8,
    pub threats: Vec<String>,
    pub reasoning: String,
    pub recommendation: Recommendation,
    pub findings: Vec<Threat>,
    pub breakdown: Vec<ScoreFactor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oracle_score: Option<u8>,
    pub analyzed_at: DateTime<Utc>,
}

impl From<&AnalysisVerdict> for AnalysisData {
    fn from(verdict: &AnalysisVerdict) -> Self {
        Self {
            score: verdict.score(),
            threats: verdict.threat_names(),
            reasoning: verdict.reasoning().to_string(),
            recommendation: verdict.recommendation(),
            findings: verdict.threats().to_vec(),
            breakdown: breakdown(verdict.threats()),
            oracle_score: verdict.oracle_score(),
            analyzed_at: verdict.analyzed_at(),
        }
    }
}

// ============================================
// Registry writes
// ============================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRequest {
    /// Optional; must match the auditor owning the API key
    #[serde(default, alias = "auditor_id")]
    pub auditor_id: Option<String>,
    #[serde(default = "default_kind")]
    pub kind: RecordKind,
    pub score: u16,
    #[serde(default)]
    pub threats: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

fn default_kind() -> RecordKind {
    RecordKind::Assessment
}

#[derive(Debug, Serialize)]
pub struct RecordedData {
    pub identity: String,
    pub record: AuditRecord,
    pub current_score: u8,
    pub is_flagged: bool,
    pub history_len: usize,
}

impl From<RecordedVerdict> for RecordedData {
    fn from(recorded: RecordedVerdict) -> Self {
        Self {
            identity: recorded.entry.identity().to_string(),
            current_score: recorded.entry.current_score(),
            is_flagged: recorded.entry.is_flagged(),
            history_len: recorded.entry.history().len(),
            record: recorded.record,
        }
    }
}

// ============================================
// Registry reads
// ============================================

#[derive(Debug, Serialize)]
pub struct EntryData {
    pub identity: String,
    pub current_score: u8,
    pub is_flagged: bool,
    pub recommendation: Recommendation,
    pub history_len: usize,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<AuditRecord>,
}

impl From<&ReputationEntry> for EntryData {
    fn from(entry: &ReputationEntry) -> Self {
        Self {
            identity: entry.identity().to_string(),
            current_score: entry.current_score(),
            is_flagged: entry.is_flagged(),
            recommendation: Recommendation::from_score(entry.current_score()),
            history_len: entry.history().len(),
            updated_at: entry.updated_at(),
            latest: entry.history().last().cloned(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryData {
    pub identity: String,
    pub source: String,
    pub reports: Vec<AuditReport>,
}

#[derive(Debug, Serialize)]
pub struct ScoreData {
    pub identity: String,
    pub source: String,
    /// "scored" | "unscored"
    pub status: &'static str,
    /// `getScore` semantics: 0 when unscored
    pub score: u8,
}

impl ScoreData {
    pub fn new(identity: String, source: String, lookup: ScoreLookup) -> Self {
        let (status, score) = match lookup {
            ScoreLookup::Scored(s) => ("scored", s),
            ScoreLookup::Unscored => ("unscored", 0),
        };
        Self {
            identity,
            source,
            status,
            score,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FlaggedQuery {
    pub mode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FlagData {
    pub identity: String,
    pub source: String,
    pub mode: GatewayMode,
    pub status: FlagStatus,
    pub is_flagged: bool,
}

// ============================================
// Stats / Telemetry
// ============================================

#[derive(Debug, Serialize)]
pub struct StatsData {
    pub telemetry: TelemetryStats,
    pub cache: CacheStats,
    pub registry_entries: usize,
    pub flagged_entries: usize,
    pub uptime_seconds: u64,
    pub api_version: String,
}

// ============================================
// Health Check
// ============================================

#[derive(Debug, Serialize)]
pub struct HealthData {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub query_source: String,
}
