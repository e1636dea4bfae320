//! API Request Handlers

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    Extension,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use super::middleware::AuditorId;
use super::types::*;
use crate::core::gateway::{GatewayMode, QueryGateway};
use crate::core::service::{auditor_verdict, GuardService};
use crate::models::{AppError, AuditorKeys, ContractIdentity, ErrorCode};
use crate::utils::telemetry::GuardTelemetry;

/// Shared application state
pub struct AppState {
    pub service: Arc<GuardService>,
    /// Read path for consuming protocols (local registry or on-chain ledger)
    pub gateway: Arc<QueryGateway>,
    pub telemetry: Arc<GuardTelemetry>,
    /// Keys allowed to write human audit records (none by default)
    pub auditor_keys: AuditorKeys,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(service: Arc<GuardService>, gateway: Arc<QueryGateway>) -> Self {
        let telemetry = service.telemetry().clone();

        // Background task: cleanup expired verdict cache entries every 60 seconds
        let cache = service.cache().clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                cache.cleanup_expired();
            }
        });

        Self {
            service,
            gateway,
            telemetry,
            auditor_keys: AuditorKeys::default(),
            start_time: Instant::now(),
        }
    }

    pub fn with_auditor_keys(mut self, keys: AuditorKeys) -> Self {
        self.auditor_keys = keys;
        self
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<()>>)>;

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Map an AppError onto the error envelope
fn error_response(err: AppError, start: Instant) -> (StatusCode, Json<ApiResponse<()>>) {
    let status =
        StatusCode::from_u16(err.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!("❌ {}", err);
    }

    let body = if err.is_analysis_incomplete() {
        ApiResponse::incomplete(ApiError::from(&err), elapsed_ms(start))
    } else {
        ApiResponse::error(ApiError::from(&err), elapsed_ms(start))
    };
    (status, Json(body))
}

fn parse_identity(raw: &str, start: Instant) -> Result<ContractIdentity, (StatusCode, Json<ApiResponse<()>>)> {
    raw.parse::<ContractIdentity>()
        .map_err(|e| error_response(e, start))
}

// ============================================
// Health Check
// ============================================

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<ApiResponse<HealthData>> {
    let start = Instant::now();

    let data = HealthData {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        query_source: state.gateway.source_name().to_string(),
    };

    Json(ApiResponse::success(data, elapsed_ms(start)))
}

// ============================================
// Stats
// ============================================

pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<ApiResponse<StatsData>> {
    let start = Instant::now();
    let registry = state.service.registry();

    let data = StatsData {
        telemetry: state.telemetry.get_stats(),
        cache: state.service.cache().stats(),
        registry_entries: registry.len(),
        flagged_entries: registry.flagged_count(),
        uptime_seconds: state.uptime_seconds(),
        api_version: env!("CARGO_PKG_VERSION").to_string(),
    };

    Json(ApiResponse::success(data, elapsed_ms(start)))
}

// ============================================
// Analysis
// ============================================

/// Analyze without recording
pub async fn analyze_contract(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalyzeRequest>,
) -> ApiResult<AnalysisData> {
    let start = Instant::now();

    let verdict = state
        .service
        .analyze(&req.contract_code)
        .await
        .map_err(|e| error_response(e, start))?;

    info!(
        "🔍 Analyzed {} bytes -> {} {}",
        req.contract_code.len(),
        verdict.score(),
        verdict.recommendation().as_str()
    );

    Ok(Json(ApiResponse::success(
        AnalysisData::from(&verdict),
        elapsed_ms(start),
    )))
}

/// Analyze and record with `ai` provenance
pub async fn analyze_and_record(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AnalyzeRequest>,
) -> ApiResult<RecordedData> {
    let start = Instant::now();
    let identity = parse_identity(&id, start)?;

    let recorded = state
        .service
        .analyze_and_record(&identity, &req.contract_code)
        .await
        .map_err(|e| error_response(e, start))?;

    Ok(Json(ApiResponse::success(
        RecordedData::from(recorded),
        elapsed_ms(start),
    )))
}

// ============================================
// Human audits
// ============================================

/// Record a human audit. Provenance comes from the authenticated key;
/// a body `auditorId` must name the same auditor.
pub async fn record_audit(
    State(state): State<Arc<AppState>>,
    auditor: Option<Extension<AuditorId>>,
    Path(id): Path<String>,
    Json(req): Json<AuditRequest>,
) -> ApiResult<RecordedData> {
    let start = Instant::now();
    let Some(Extension(AuditorId(auditor))) = auditor else {
        return Err(error_response(
            AppError::new(ErrorCode::ApiUnauthorized, "Audit writes require an auditor API key"),
            start,
        ));
    };
    let identity = parse_identity(&id, start)?;

    if let Some(claimed) = req.auditor_id.as_deref() {
        if claimed.trim() != auditor {
            return Err(error_response(
                AppError::bad_request(format!(
                    "auditorId '{}' does not match the authenticated auditor",
                    claimed
                )),
                start,
            ));
        }
    }

    let verdict = auditor_verdict(req.score, &req.threats, &req.notes)
        .map_err(|e| error_response(e, start))?;

    let recorded = state
        .service
        .record_audit(&identity, req.kind, verdict, &auditor)
        .map_err(|e| {
            warn!("⚠️ Audit for {} rejected: {}", identity, e);
            error_response(e, start)
        })?;

    Ok(Json(ApiResponse::success(
        RecordedData::from(recorded),
        elapsed_ms(start),
    )))
}

// ============================================
// Registry reads
// ============================================

pub async fn get_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<EntryData> {
    let start = Instant::now();
    let identity = parse_identity(&id, start)?;

    let entry = state
        .service
        .registry()
        .require(&identity)
        .map_err(|e| error_response(e, start))?;

    Ok(Json(ApiResponse::success(
        EntryData::from(entry.as_ref()),
        elapsed_ms(start),
    )))
}

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<HistoryData> {
    let start = Instant::now();
    let identity = parse_identity(&id, start)?;

    let reports = state
        .gateway
        .audit_history(&identity)
        .await
        .map_err(|e| error_response(e, start))?;

    Ok(Json(ApiResponse::success(
        HistoryData {
            identity: identity.to_string(),
            source: state.gateway.source_name().to_string(),
            reports,
        },
        elapsed_ms(start),
    )))
}

pub async fn get_score(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<ScoreData> {
    let start = Instant::now();
    let identity = parse_identity(&id, start)?;

    let lookup = state
        .gateway
        .score(&identity)
        .await
        .map_err(|e| error_response(e, start))?;

    Ok(Json(ApiResponse::success(
        ScoreData::new(
            identity.to_string(),
            state.gateway.source_name().to_string(),
            lookup,
        ),
        elapsed_ms(start),
    )))
}

pub async fn get_flagged(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<FlaggedQuery>,
) -> ApiResult<FlagData> {
    let start = Instant::now();
    let identity = parse_identity(&id, start)?;

    let mode = match query.mode.as_deref() {
        Some(raw) => raw
            .parse::<GatewayMode>()
            .map_err(|e| error_response(e, start))?,
        None => GatewayMode::default(),
    };

    let status = state.gateway.flag_status(&identity).await;

    Ok(Json(ApiResponse::success(
        FlagData {
            identity: identity.to_string(),
            source: state.gateway.source_name().to_string(),
            mode,
            status,
            is_flagged: mode.blocks(status),
        },
        elapsed_ms(start),
    )))
}
