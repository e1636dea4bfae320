//! Guard Service - analyze → record orchestration
//!
//! Glue between the analyzer, verdict cache, registry and telemetry. A failed
//! analysis never touches the registry.

use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::aggregator::ScoreAggregator;
use super::analyzer::PatternAnalyzer;
use super::gateway::QueryGateway;
use super::registry::ReputationRegistry;
use super::scanner::classify_threat;
use crate::models::{
    AnalysisVerdict, AppError, AppResult, AuditRecord, ContractIdentity, ErrorCode, FindingSource,
    GuardConfig, Provenance, RecordKind, ReputationEntry, Threat,
};
use crate::utils::cache::VerdictCache;
use crate::utils::constants::MAX_SCORE;
use crate::utils::telemetry::GuardTelemetry;

/// A committed record together with the entry it produced
#[derive(Debug, Clone)]
pub struct RecordedVerdict {
    pub record: AuditRecord,
    pub entry: Arc<ReputationEntry>,
}

pub struct GuardService {
    analyzer: PatternAnalyzer,
    registry: Arc<ReputationRegistry>,
    cache: VerdictCache,
    telemetry: Arc<GuardTelemetry>,
}

impl GuardService {
    pub fn new(
        analyzer: PatternAnalyzer,
        registry: Arc<ReputationRegistry>,
        cache: VerdictCache,
        telemetry: Arc<GuardTelemetry>,
    ) -> Self {
        Self {
            analyzer,
            registry,
            cache,
            telemetry,
        }
    }

    /// Wire everything from configuration
    pub fn from_config(config: &GuardConfig, telemetry: Arc<GuardTelemetry>) -> AppResult<Self> {
        let analyzer = PatternAnalyzer::from_config(config)?;
        let registry = Arc::new(ReputationRegistry::new(ScoreAggregator::new(config.ratchet_window)));
        Ok(Self::new(
            analyzer,
            registry,
            VerdictCache::with_ttl(config.cache_ttl_secs),
            telemetry,
        ))
    }

    pub fn registry(&self) -> &Arc<ReputationRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &VerdictCache {
        &self.cache
    }

    pub fn telemetry(&self) -> &Arc<GuardTelemetry> {
        &self.telemetry
    }

    /// Gateway reading through the local registry
    pub fn local_gateway(&self) -> QueryGateway {
        QueryGateway::new(self.registry.clone())
    }

    /// Analyze without recording. Cached verdicts are served when fresh.
    pub async fn analyze(&self, source: &str) -> AppResult<AnalysisVerdict> {
        if let Some(verdict) = self.cache.get(source) {
            return Ok(verdict);
        }

        let start = Instant::now();
        let result = self.analyzer.analyze(source).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(verdict) => {
                self.telemetry.record_verdict(verdict, latency_ms);
                self.cache.set(source, verdict.clone());
            }
            Err(e) => match e.code {
                ErrorCode::AnalysisEmptyInput => self.telemetry.record_empty_input(),
                ErrorCode::AnalysisUnavailable => self.telemetry.record_unavailable(latency_ms),
                ErrorCode::AnalysisMalformedVerdict => self.telemetry.record_malformed(latency_ms),
                _ => {}
            },
        }

        result
    }

    /// Analyze and append the verdict with `ai` provenance
    pub async fn analyze_and_record(
        &self,
        identity: &ContractIdentity,
        source: &str,
    ) -> AppResult<RecordedVerdict> {
        let verdict = match self.analyze(source).await {
            Ok(v) => v,
            Err(e) => {
                warn!("⚠️ {} not recorded: {}", identity, e);
                return Err(e);
            }
        };
        self.commit(identity, RecordKind::Assessment, verdict, Provenance::Ai)
    }

    /// Append a human auditor record
    pub fn record_audit(
        &self,
        identity: &ContractIdentity,
        kind: RecordKind,
        verdict: AnalysisVerdict,
        auditor: &str,
    ) -> AppResult<RecordedVerdict> {
        if auditor.trim().is_empty() {
            return Err(AppError::bad_request("Auditor id is required"));
        }
        let provenance = Provenance::HumanAuditor(auditor.trim().to_string());
        self.commit(identity, kind, verdict, provenance)
    }

    fn commit(
        &self,
        identity: &ContractIdentity,
        kind: RecordKind,
        verdict: AnalysisVerdict,
        provenance: Provenance,
    ) -> AppResult<RecordedVerdict> {
        let human = provenance.is_human();
        let (record, entry) = self.registry.append_with_entry(identity, kind, verdict, provenance)?;
        self.telemetry.record_write(kind, human, record.verdict.score());

        info!(
            "📝 Recorded {:?} #{} for {} -> score {} {}",
            kind,
            record.sequence,
            identity,
            entry.current_score(),
            if entry.is_flagged() { "🚩" } else { "" }
        );
        Ok(RecordedVerdict { record, entry })
    }
}

/// Build the verdict a human auditor submits. Threat names are classified
/// onto the catalog where possible.
pub fn auditor_verdict(score: u16, threats: &[String], notes: &str) -> AppResult<AnalysisVerdict> {
    if score > MAX_SCORE as u16 {
        return Err(AppError::bad_request(format!("Score {} outside 0-100", score)));
    }
    let findings = threats
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| match classify_threat(t) {
            Some(sig) => Threat::from_signature(sig, FindingSource::Auditor),
            None => Threat::advisory(t, FindingSource::Auditor),
        })
        .collect();
    Ok(AnalysisVerdict::new(score as u8, findings, notes))
}
