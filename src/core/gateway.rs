//! Query Gateway - read path for consuming protocols
//!
//! Pure read-through proxy over a `ReputationSource` (local registry or the
//! on-chain ledger client). Never writes, never analyzes.
//!
//! Fail closed: in Conservative mode anything other than a definite
//! "not flagged" answers `is_flagged = true`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::registry::ReputationRegistry;
use crate::models::{AppError, AppResult, AuditReport, ContractIdentity, ErrorCode};
use crate::utils::constants::DEFAULT_LEDGER_TIMEOUT_SECS;

// ============================================
// Source trait
// ============================================

/// Anything that can answer the registry's read-only query surface
#[async_trait]
pub trait ReputationSource: Send + Sync {
    fn name(&self) -> &str;

    /// `get-token-score`: `None` when the identity was never scored
    async fn token_score(&self, identity: &ContractIdentity) -> AppResult<Option<u8>>;

    /// `is-token-flagged`: `None` when the identity was never scored
    async fn token_flagged(&self, identity: &ContractIdentity) -> AppResult<Option<bool>>;

    /// `get-audit-history`: empty when the identity was never scored
    async fn audit_history(&self, identity: &ContractIdentity) -> AppResult<Vec<AuditReport>>;
}

#[async_trait]
impl ReputationSource for ReputationRegistry {
    fn name(&self) -> &str {
        "local-registry"
    }

    async fn token_score(&self, identity: &ContractIdentity) -> AppResult<Option<u8>> {
        Ok(self.query(identity)?.map(|e| e.current_score()))
    }

    async fn token_flagged(&self, identity: &ContractIdentity) -> AppResult<Option<bool>> {
        Ok(self.query(identity)?.map(|e| e.is_flagged()))
    }

    async fn audit_history(&self, identity: &ContractIdentity) -> AppResult<Vec<AuditReport>> {
        match self.audit_reports(identity) {
            Err(e) if e.code == ErrorCode::RegistryNotFound => Ok(Vec::new()),
            other => other,
        }
    }
}

// ============================================
// Typed answers
// ============================================

/// Score lookup that keeps "never scored" apart from "scored 0"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "score", rename_all = "lowercase")]
pub enum ScoreLookup {
    Scored(u8),
    Unscored,
}

/// Flag lookup; `Unknown` means the source failed or timed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagStatus {
    Flagged,
    NotFlagged,
    Unscored,
    Unknown,
}

/// How undecided answers are folded into a boolean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayMode {
    /// Only a definite flag blocks
    #[default]
    Permissive,
    /// Unknown and unscored also block
    Conservative,
}

impl GatewayMode {
    pub fn blocks(&self, status: FlagStatus) -> bool {
        match (self, status) {
            (_, FlagStatus::Flagged) => true,
            (_, FlagStatus::NotFlagged) => false,
            (GatewayMode::Conservative, _) => true,
            (GatewayMode::Permissive, _) => false,
        }
    }
}

impl FromStr for GatewayMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "permissive" => Ok(Self::Permissive),
            "conservative" => Ok(Self::Conservative),
            other => Err(AppError::bad_request(format!("Unknown gateway mode: '{}'", other))),
        }
    }
}

// ============================================
// Gateway
// ============================================

pub struct QueryGateway {
    source: Arc<dyn ReputationSource>,
    timeout: Duration,
}

impl QueryGateway {
    pub fn new(source: Arc<dyn ReputationSource>) -> Self {
        Self {
            source,
            timeout: Duration::from_secs(DEFAULT_LEDGER_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    async fn bounded<T>(&self, fut: impl std::future::Future<Output = AppResult<T>>) -> AppResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AppError::new(
                ErrorCode::LedgerTimeout,
                format!("{} did not answer within {:?}", self.source.name(), self.timeout),
            )),
        }
    }

    /// Typed score lookup
    pub async fn score(&self, identity: &ContractIdentity) -> AppResult<ScoreLookup> {
        let score = self.bounded(self.source.token_score(identity)).await?;
        debug!("🔍 Gateway score {} -> {:?}", identity, score);
        Ok(score.map_or(ScoreLookup::Unscored, ScoreLookup::Scored))
    }

    /// `getScore`: 0 when never scored
    pub async fn get_score(&self, identity: &ContractIdentity) -> AppResult<u8> {
        Ok(match self.score(identity).await? {
            ScoreLookup::Scored(s) => s,
            ScoreLookup::Unscored => 0,
        })
    }

    /// Flag lookup; source failures become `Unknown` instead of an error
    pub async fn flag_status(&self, identity: &ContractIdentity) -> FlagStatus {
        match self.bounded(self.source.token_flagged(identity)).await {
            Ok(Some(true)) => FlagStatus::Flagged,
            Ok(Some(false)) => FlagStatus::NotFlagged,
            Ok(None) => FlagStatus::Unscored,
            Err(e) => {
                warn!("⚠️ Gateway flag lookup for {} failed: {}", identity, e);
                FlagStatus::Unknown
            }
        }
    }

    /// `isFlagged` under the given mode
    pub async fn is_flagged(&self, identity: &ContractIdentity, mode: GatewayMode) -> bool {
        mode.blocks(self.flag_status(identity).await)
    }

    /// `getAuditHistory`
    pub async fn audit_history(&self, identity: &ContractIdentity) -> AppResult<Vec<AuditReport>> {
        self.bounded(self.source.audit_history(identity)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisVerdict, Provenance};

    struct FailingSource;

    #[async_trait]
    impl ReputationSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }
        async fn token_score(&self, _: &ContractIdentity) -> AppResult<Option<u8>> {
            Err(AppError::new(ErrorCode::LedgerConnectionFailed, "down"))
        }
        async fn token_flagged(&self, _: &ContractIdentity) -> AppResult<Option<bool>> {
            Err(AppError::new(ErrorCode::LedgerConnectionFailed, "down"))
        }
        async fn audit_history(&self, _: &ContractIdentity) -> AppResult<Vec<AuditReport>> {
            Err(AppError::new(ErrorCode::LedgerConnectionFailed, "down"))
        }
    }

    struct SlowSource;

    #[async_trait]
    impl ReputationSource for SlowSource {
        fn name(&self) -> &str {
            "slow"
        }
        async fn token_score(&self, _: &ContractIdentity) -> AppResult<Option<u8>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Some(1))
        }
        async fn token_flagged(&self, _: &ContractIdentity) -> AppResult<Option<bool>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Some(false))
        }
        async fn audit_history(&self, _: &ContractIdentity) -> AppResult<Vec<AuditReport>> {
            Ok(Vec::new())
        }
    }

    fn id(s: &str) -> ContractIdentity {
        s.parse().unwrap()
    }

    fn local_gateway() -> (Arc<ReputationRegistry>, QueryGateway) {
        let registry = Arc::new(ReputationRegistry::default());
        let gateway = QueryGateway::new(registry.clone());
        (registry, gateway)
    }

    #[tokio::test]
    async fn test_unscored_identity() {
        let (_, gateway) = local_gateway();
        let token = id("SP1.new");
        assert_eq!(gateway.score(&token).await.unwrap(), ScoreLookup::Unscored);
        assert_eq!(gateway.get_score(&token).await.unwrap(), 0);
        assert_eq!(gateway.flag_status(&token).await, FlagStatus::Unscored);
        assert!(!gateway.is_flagged(&token, GatewayMode::Permissive).await);
        assert!(gateway.is_flagged(&token, GatewayMode::Conservative).await);
        assert!(gateway.audit_history(&token).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reads_through_registry() {
        let (registry, gateway) = local_gateway();
        let token = id("SP1.bad");
        registry
            .record(&token, AnalysisVerdict::new(88, vec![], ""), Provenance::Ai)
            .unwrap();

        assert_eq!(gateway.score(&token).await.unwrap(), ScoreLookup::Scored(88));
        assert_eq!(gateway.flag_status(&token).await, FlagStatus::Flagged);
        assert!(gateway.is_flagged(&token, GatewayMode::Permissive).await);
        assert_eq!(gateway.audit_history(&token).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_source_failure_fails_closed() {
        let gateway = QueryGateway::new(Arc::new(FailingSource));
        let token = id("SP1.any");
        assert_eq!(gateway.flag_status(&token).await, FlagStatus::Unknown);
        assert!(gateway.is_flagged(&token, GatewayMode::Conservative).await);
        assert!(!gateway.is_flagged(&token, GatewayMode::Permissive).await);
        assert!(gateway.get_score(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_timeout_is_unknown() {
        let gateway = QueryGateway::new(Arc::new(SlowSource)).with_timeout(Duration::from_millis(20));
        let token = id("SP1.any");
        assert_eq!(gateway.flag_status(&token).await, FlagStatus::Unknown);
        let err = gateway.score(&token).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::LedgerTimeout);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("conservative".parse::<GatewayMode>().unwrap(), GatewayMode::Conservative);
        assert_eq!("Permissive".parse::<GatewayMode>().unwrap(), GatewayMode::Permissive);
        assert!("strict".parse::<GatewayMode>().is_err());
    }

    #[test]
    fn test_score_lookup_wire_format() {
        let json = serde_json::to_value(ScoreLookup::Scored(42)).unwrap();
        assert_eq!(json, serde_json::json!({"status": "scored", "score": 42}));
        let json = serde_json::to_value(ScoreLookup::Unscored).unwrap();
        assert_eq!(json, serde_json::json!({"status": "unscored"}));
    }
}
