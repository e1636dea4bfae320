//! Type definitions for the reputation registry
//! Contract identities, verdicts, audit records and reputation entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::errors::{AppError, ErrorCode};
use crate::utils::constants::{
    HIGH_RISK_THRESHOLD, MAX_SCORE, MEDIUM_RISK_THRESHOLD, WEIGHT_CRITICAL, WEIGHT_HIGH,
    WEIGHT_LOW, WEIGHT_MEDIUM,
};

// ============================================
// Contract Identity
// ============================================

/// Stable key for a deployed contract: `ADDRESS` or `ADDRESS.contract-name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContractIdentity {
    address: String,
    name: Option<String>,
}

impl ContractIdentity {
    pub fn new(address: impl Into<String>, name: Option<String>) -> Result<Self, AppError> {
        let address = address.into();
        if address.is_empty() || !address.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AppError::invalid_identity(format!(
                "Invalid contract address: '{}'",
                address
            )));
        }
        if let Some(ref n) = name {
            let valid = !n.is_empty()
                && n.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid {
                return Err(AppError::invalid_identity(format!(
                    "Invalid contract name: '{}'",
                    n
                )));
            }
        }
        Ok(Self { address, name })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl FromStr for ContractIdentity {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('.') {
            Some((address, name)) => Self::new(address, Some(name.to_string())),
            None => Self::new(s, None),
        }
    }
}

impl fmt::Display for ContractIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}.{}", self.address, name),
            None => write!(f, "{}", self.address),
        }
    }
}

impl Serialize for ContractIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContractIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================
// Severity & Signatures
// ============================================

/// Severity class of a finding (ordered: Low < Medium < High < Critical)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Score contribution of one finding of this severity
    pub fn weight(&self) -> u8 {
        match self {
            Severity::Critical => WEIGHT_CRITICAL,
            Severity::High => WEIGHT_HIGH,
            Severity::Medium => WEIGHT_MEDIUM,
            Severity::Low => WEIGHT_LOW,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

/// Fixed catalog of vulnerability signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Signature {
    /// `as-contract` used to act with the contract's own authority
    SelfImpersonation,
    /// Mint or burn reachable without an authorization check
    UnauthorizedMintBurn,
    /// Mutating public entry point without a caller check
    MissingAccessControl,
    /// External call made before local state is updated
    Reentrancy,
    /// Subtraction/multiplication on balances without a bounds assertion
    UncheckedArithmetic,
    /// Cross-contract call result ignored or force-unwrapped
    UnhandledCallError,
}

impl Signature {
    /// Catalog order
    pub const ALL: [Signature; 6] = [
        Signature::SelfImpersonation,
        Signature::UnauthorizedMintBurn,
        Signature::MissingAccessControl,
        Signature::Reentrancy,
        Signature::UncheckedArithmetic,
        Signature::UnhandledCallError,
    ];

    pub fn severity(&self) -> Severity {
        match self {
            Signature::SelfImpersonation | Signature::UnauthorizedMintBurn => Severity::Critical,
            Signature::MissingAccessControl | Signature::Reentrancy => Severity::High,
            Signature::UncheckedArithmetic | Signature::UnhandledCallError => Severity::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Signature::SelfImpersonation => "self-impersonation",
            Signature::UnauthorizedMintBurn => "unauthorized-mint-burn",
            Signature::MissingAccessControl => "missing-access-control",
            Signature::Reentrancy => "reentrancy",
            Signature::UncheckedArithmetic => "unchecked-arithmetic",
            Signature::UnhandledCallError => "unhandled-call-error",
        }
    }

    /// Human-readable threat name
    pub fn label(&self) -> &'static str {
        match self {
            Signature::SelfImpersonation => "as-contract abuse (self-impersonation)",
            Signature::UnauthorizedMintBurn => "Unauthorized mint/burn capability",
            Signature::MissingAccessControl => "Missing access control",
            Signature::Reentrancy => "Reentrancy-shaped call ordering",
            Signature::UncheckedArithmetic => "Unchecked arithmetic",
            Signature::UnhandledCallError => "Unhandled cross-contract call error",
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which pass produced a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingSource {
    Lexical,
    Oracle,
    Both,
    Auditor,
}

/// A named finding in a verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threat {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
    pub severity: Severity,
    /// Function(s) where the pattern was found
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<String>,
    pub source: FindingSource,
}

impl Threat {
    pub fn from_signature(signature: Signature, source: FindingSource) -> Self {
        Self {
            name: signature.label().to_string(),
            signature: Some(signature),
            severity: signature.severity(),
            locations: Vec::new(),
            source,
        }
    }

    /// Finding that matched nothing in the catalog
    pub fn advisory(name: impl Into<String>, source: FindingSource) -> Self {
        Self {
            name: name.into(),
            signature: None,
            severity: Severity::Low,
            locations: Vec::new(),
            source,
        }
    }

    pub fn description(&self) -> String {
        if self.locations.is_empty() {
            format!("[{}] {}", self.severity.as_str(), self.name)
        } else {
            format!(
                "[{}] {} (in {})",
                self.severity.as_str(),
                self.name,
                self.locations.join(", ")
            )
        }
    }
}

// ============================================
// Recommendation & Verdict
// ============================================

/// Recommendation derived from a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    #[serde(rename = "SAFE")]
    Safe,
    #[serde(rename = "MEDIUM RISK")]
    MediumRisk,
    #[serde(rename = "HIGH RISK")]
    HighRisk,
}

impl Recommendation {
    /// `score<31 → SAFE`, `31≤score<71 → MEDIUM RISK`, `score≥71 → HIGH RISK`
    pub fn from_score(score: u8) -> Self {
        if score >= HIGH_RISK_THRESHOLD {
            Recommendation::HighRisk
        } else if score >= MEDIUM_RISK_THRESHOLD {
            Recommendation::MediumRisk
        } else {
            Recommendation::Safe
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Safe => "SAFE",
            Recommendation::MediumRisk => "MEDIUM RISK",
            Recommendation::HighRisk => "HIGH RISK",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Recommendation::Safe => "✅",
            Recommendation::MediumRisk => "🟠",
            Recommendation::HighRisk => "🔴",
        }
    }
}

/// Output of one analysis run. Immutable once built; the recommendation is
/// always derived from the score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisVerdict {
    score: u8,
    threats: Vec<Threat>,
    reasoning: String,
    recommendation: Recommendation,
    #[serde(skip_serializing_if = "Option::is_none")]
    oracle_score: Option<u8>,
    analyzed_at: DateTime<Utc>,
}

impl AnalysisVerdict {
    pub fn new(score: u8, threats: Vec<Threat>, reasoning: impl Into<String>) -> Self {
        let score = score.min(MAX_SCORE);
        Self {
            score,
            threats,
            reasoning: reasoning.into(),
            recommendation: Recommendation::from_score(score),
            oracle_score: None,
            analyzed_at: Utc::now(),
        }
    }

    /// Attach the score the oracle reported (informational only)
    pub fn with_oracle_score(mut self, oracle_score: Option<u8>) -> Self {
        self.oracle_score = oracle_score.map(|s| s.min(MAX_SCORE));
        self
    }

    pub fn score(&self) -> u8 {
        self.score
    }

    pub fn threats(&self) -> &[Threat] {
        &self.threats
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn recommendation(&self) -> Recommendation {
        self.recommendation
    }

    pub fn oracle_score(&self) -> Option<u8> {
        self.oracle_score
    }

    pub fn analyzed_at(&self) -> DateTime<Utc> {
        self.analyzed_at
    }

    /// Threat names in order (legacy wire shape)
    pub fn threat_names(&self) -> Vec<String> {
        self.threats.iter().map(|t| t.name.clone()).collect()
    }

    /// Pretty print the verdict
    pub fn summary(&self) -> String {
        let mut output = format!(
            "\n{} {} | Score: {}/100\n",
            self.recommendation.emoji(),
            self.recommendation.as_str(),
            self.score
        );
        if !self.threats.is_empty() {
            output.push_str("   Threats:\n");
            for threat in &self.threats {
                output.push_str(&format!("     - {}\n", threat.description()));
            }
        }
        if !self.reasoning.is_empty() {
            output.push_str(&format!("   Reasoning: {}\n", self.reasoning));
        }
        output
    }
}

/// Result of an analysis attempt as seen by callers: a verdict, or an
/// explicit "could not analyze". There is no default score.
#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    Verdict(AnalysisVerdict),
    Unavailable(String),
    Malformed(String),
}

impl AnalysisOutcome {
    /// Fold an analyzer result into the tri-state outcome. Errors that are
    /// not analysis failures (e.g. empty input) stay errors.
    pub fn from_result(result: Result<AnalysisVerdict, AppError>) -> Result<Self, AppError> {
        match result {
            Ok(verdict) => Ok(Self::Verdict(verdict)),
            Err(e) if e.code == ErrorCode::AnalysisUnavailable => Ok(Self::Unavailable(e.message)),
            Err(e) if e.code == ErrorCode::AnalysisMalformedVerdict => Ok(Self::Malformed(e.message)),
            Err(e) => Err(e),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Verdict(_))
    }

    pub fn verdict(&self) -> Option<&AnalysisVerdict> {
        match self {
            Self::Verdict(v) => Some(v),
            _ => None,
        }
    }
}

// ============================================
// Provenance & Audit Records
// ============================================

/// Who produced a record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Provenance {
    Ai,
    HumanAuditor(String),
}

impl Provenance {
    pub fn is_human(&self) -> bool {
        matches!(self, Provenance::HumanAuditor(_))
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Ai => f.write_str("ai"),
            Provenance::HumanAuditor(id) => write!(f, "human-auditor:{}", id),
        }
    }
}

impl FromStr for Provenance {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "ai" {
            return Ok(Provenance::Ai);
        }
        match s.strip_prefix("human-auditor:") {
            Some(id) if !id.is_empty() => Ok(Provenance::HumanAuditor(id.to_string())),
            _ => Err(AppError::bad_request(format!("Invalid provenance: '{}'", s))),
        }
    }
}

impl Serialize for Provenance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Provenance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// What a record asserts beyond its verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Ordinary verdict
    Assessment,
    /// Human override: floors the score at 95 until cleared
    CriticalOverride,
    /// Human clear: resets the ratchet window
    Clear,
}

impl RecordKind {
    /// Overrides and clears may only come from a human auditor
    pub fn requires_human(&self) -> bool {
        !matches!(self, RecordKind::Assessment)
    }
}

/// A verdict plus provenance, as persisted. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    /// Position in the identity's history (0-based)
    pub sequence: u64,
    pub identity: ContractIdentity,
    pub kind: RecordKind,
    pub verdict: AnalysisVerdict,
    pub provenance: Provenance,
    pub recorded_at: DateTime<Utc>,
}

/// Flattened audit entry served by the query surface (`get-audit-history`).
/// Shape shared by the local registry and the on-chain contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub auditor: String,
    pub score: u8,
    pub threat_level: String,
    /// Unix seconds (local) or block height (on-chain)
    pub timestamp: u64,
    pub notes: String,
}

impl From<&AuditRecord> for AuditReport {
    fn from(record: &AuditRecord) -> Self {
        Self {
            auditor: record.provenance.to_string(),
            score: record.verdict.score(),
            threat_level: record.verdict.recommendation().as_str().to_string(),
            timestamp: record.recorded_at.timestamp().max(0) as u64,
            notes: record.verdict.reasoning().to_string(),
        }
    }
}

// ============================================
// Reputation Entry
// ============================================

/// Current reputation for one identity. Score and flag are always the
/// aggregation of `history`; only the registry builds these.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReputationEntry {
    identity: ContractIdentity,
    current_score: u8,
    is_flagged: bool,
    history: Vec<AuditRecord>,
    updated_at: DateTime<Utc>,
}

impl ReputationEntry {
    pub(crate) fn empty(identity: ContractIdentity) -> Self {
        Self {
            identity,
            current_score: 0,
            is_flagged: false,
            history: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Append a record and store the aggregation computed over the new history.
    ///
    /// Copy-on-write: the returned entry owns a fresh history and `self` is
    /// left untouched for readers still holding it. A write therefore costs
    /// O(history) clones for that identity; other identities are unaffected.
    pub(crate) fn appended<F>(&self, record: AuditRecord, aggregate: F) -> Self
    where
        F: FnOnce(&[AuditRecord]) -> (u8, bool),
    {
        let mut history = self.history.clone();
        history.push(record);
        let (current_score, is_flagged) = aggregate(&history);
        Self {
            identity: self.identity.clone(),
            current_score,
            is_flagged,
            history,
            updated_at: Utc::now(),
        }
    }

    pub fn identity(&self) -> &ContractIdentity {
        &self.identity
    }

    pub fn current_score(&self) -> u8 {
        self.current_score
    }

    pub fn is_flagged(&self) -> bool {
        self.is_flagged
    }

    pub fn history(&self) -> &[AuditRecord] {
        &self.history
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_parsing() {
        let id: ContractIdentity = "SP2C2YFP12AJZB4MABJBAJ55XECVS7E4PMMZ89YZR.alex-token"
            .parse()
            .unwrap();
        assert_eq!(id.address(), "SP2C2YFP12AJZB4MABJBAJ55XECVS7E4PMMZ89YZR");
        assert_eq!(id.name(), Some("alex-token"));
        assert_eq!(
            id.to_string(),
            "SP2C2YFP12AJZB4MABJBAJ55XECVS7E4PMMZ89YZR.alex-token"
        );

        let bare: ContractIdentity = "SP000000000000000000002Q6VF78".parse().unwrap();
        assert_eq!(bare.name(), None);
    }

    #[test]
    fn test_identity_rejects_garbage() {
        assert!("".parse::<ContractIdentity>().is_err());
        assert!("SP1.".parse::<ContractIdentity>().is_err());
        assert!("SP1.bad name".parse::<ContractIdentity>().is_err());
        assert!("0x12-34".parse::<ContractIdentity>().is_err());
    }

    #[test]
    fn test_recommendation_boundaries() {
        assert_eq!(Recommendation::from_score(0), Recommendation::Safe);
        assert_eq!(Recommendation::from_score(30), Recommendation::Safe);
        assert_eq!(Recommendation::from_score(31), Recommendation::MediumRisk);
        assert_eq!(Recommendation::from_score(70), Recommendation::MediumRisk);
        assert_eq!(Recommendation::from_score(71), Recommendation::HighRisk);
        assert_eq!(Recommendation::from_score(95), Recommendation::HighRisk);
        assert_eq!(Recommendation::from_score(100), Recommendation::HighRisk);
    }

    #[test]
    fn test_appended_leaves_snapshot_untouched() {
        let id: ContractIdentity = "SP1.tok".parse().unwrap();
        let record = |sequence: u64, score: u8| AuditRecord {
            id: Uuid::new_v4(),
            sequence,
            identity: id.clone(),
            kind: RecordKind::Assessment,
            verdict: AnalysisVerdict::new(score, vec![], ""),
            provenance: Provenance::Ai,
            recorded_at: Utc::now(),
        };

        let empty = ReputationEntry::empty(id.clone());
        let first = empty.appended(record(0, 80), |h| (h[h.len() - 1].verdict.score(), true));
        let second = first.appended(record(1, 10), |h| (h[h.len() - 1].verdict.score(), false));

        assert!(empty.is_empty());
        assert_eq!(first.history().len(), 1);
        assert_eq!(first.current_score(), 80);
        assert!(first.is_flagged());
        assert_eq!(second.history().len(), 2);
        assert_eq!(second.history()[0], first.history()[0]);
        assert_eq!(second.current_score(), 10);
    }

    #[test]
    fn test_recommendation_wire_format() {
        let json = serde_json::to_string(&Recommendation::MediumRisk).unwrap();
        assert_eq!(json, "\"MEDIUM RISK\"");
    }

    #[test]
    fn test_verdict_clamps_and_derives() {
        let verdict = AnalysisVerdict::new(250, vec![], "");
        assert_eq!(verdict.score(), 100);
        assert_eq!(verdict.recommendation(), Recommendation::HighRisk);
    }

    #[test]
    fn test_provenance_round_trip() {
        assert_eq!("ai".parse::<Provenance>().unwrap(), Provenance::Ai);
        let human: Provenance = "human-auditor:halborn".parse().unwrap();
        assert_eq!(human, Provenance::HumanAuditor("halborn".to_string()));
        assert_eq!(human.to_string(), "human-auditor:halborn");
        assert!("human-auditor:".parse::<Provenance>().is_err());
        assert!("robot".parse::<Provenance>().is_err());
    }

    #[test]
    fn test_outcome_keeps_empty_input_as_error() {
        let outcome = AnalysisOutcome::from_result(Err(AppError::analysis_unavailable("down")));
        assert!(matches!(outcome, Ok(AnalysisOutcome::Unavailable(_))));

        let outcome = AnalysisOutcome::from_result(Err(AppError::malformed_verdict("junk")));
        assert!(matches!(outcome, Ok(AnalysisOutcome::Malformed(_))));

        let outcome = AnalysisOutcome::from_result(Err(AppError::empty_input()));
        assert!(outcome.is_err());
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Signature::SelfImpersonation.severity(), Severity::Critical);
        assert_eq!(Signature::UnhandledCallError.severity(), Severity::Medium);
    }
}
