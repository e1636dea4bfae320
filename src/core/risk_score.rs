//! Risk Scoring Module
//! Turns lexical and oracle findings into a 0-100 verdict score
//!
//! Score = sum of severity weights over DISTINCT findings, clamped to 100.
//! Findings with the same signature (or the same advisory name) are merged.

use serde::Serialize;

use crate::models::{FindingSource, Recommendation, Severity, Signature, Threat};
use crate::utils::constants::MAX_SCORE;

/// Final score with a transparent breakdown
#[derive(Debug, Clone, Serialize)]
pub struct RiskScore {
    /// Overall score (0-100)
    pub total: u8,
    pub recommendation: Recommendation,
    /// One factor per distinct finding, ordered like `threats`
    pub breakdown: Vec<ScoreFactor>,
    /// Distinct findings, severity descending then catalog order
    #[serde(skip)]
    pub threats: Vec<Threat>,
}

/// Individual factor contributing to score
#[derive(Debug, Clone, Serialize)]
pub struct ScoreFactor {
    pub name: String,
    pub severity: Severity,
    pub weight: u8,
    pub reason: String,
}

/// One factor per finding, in the order given
pub fn breakdown(threats: &[Threat]) -> Vec<ScoreFactor> {
    threats
        .iter()
        .map(|t| ScoreFactor {
            name: t.name.clone(),
            severity: t.severity,
            weight: t.severity.weight(),
            reason: match (&t.signature, t.source) {
                (Some(sig), FindingSource::Both) => format!("{} (lexical + oracle)", sig),
                (Some(sig), _) => format!("{} ({:?})", sig, t.source).to_lowercase(),
                (None, _) => "advisory (no catalog match)".to_string(),
            },
        })
        .collect()
}

/// Builder for creating risk scores from analysis passes
#[derive(Debug, Default)]
pub struct RiskScoreBuilder {
    findings: Vec<Threat>,
}

impl RiskScoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one finding, merging with an existing one of the same identity
    pub fn with_finding(mut self, finding: Threat) -> Self {
        self.push(finding);
        self
    }

    /// Add findings from one pass
    pub fn with_findings(mut self, findings: impl IntoIterator<Item = Threat>) -> Self {
        for finding in findings {
            self.push(finding);
        }
        self
    }

    fn push(&mut self, finding: Threat) {
        let existing = self.findings.iter_mut().find(|t| same_finding(t, &finding));
        match existing {
            Some(t) => {
                if t.source != finding.source {
                    t.source = FindingSource::Both;
                }
                for loc in finding.locations {
                    if !t.locations.contains(&loc) {
                        t.locations.push(loc);
                    }
                }
            }
            None => self.findings.push(finding),
        }
    }

    /// Build final risk score
    pub fn build(mut self) -> RiskScore {
        self.findings
            .sort_by(|a, b| b.severity.cmp(&a.severity).then(catalog_rank(a).cmp(&catalog_rank(b))));

        let sum: u32 = self.findings.iter().map(|t| t.severity.weight() as u32).sum();
        let total = sum.min(MAX_SCORE as u32) as u8;

        RiskScore {
            total,
            recommendation: Recommendation::from_score(total),
            breakdown: breakdown(&self.findings),
            threats: self.findings,
        }
    }
}

fn same_finding(a: &Threat, b: &Threat) -> bool {
    match (a.signature, b.signature) {
        (Some(x), Some(y)) => x == y,
        (None, None) => a.name.trim().eq_ignore_ascii_case(b.name.trim()),
        _ => false,
    }
}

/// Advisories sort after every catalog signature of the same severity
fn catalog_rank(t: &Threat) -> usize {
    t.signature
        .map(|s| s as usize)
        .unwrap_or(Signature::ALL.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_findings_is_safe() {
        let score = RiskScoreBuilder::new().build();
        assert_eq!(score.total, 0);
        assert_eq!(score.recommendation, Recommendation::Safe);
        assert!(score.breakdown.is_empty());
    }

    #[test]
    fn test_distinct_findings_sum() {
        let score = RiskScoreBuilder::new()
            .with_finding(Threat::from_signature(Signature::MissingAccessControl, FindingSource::Lexical))
            .with_finding(Threat::from_signature(Signature::UncheckedArithmetic, FindingSource::Lexical))
            .build();
        assert_eq!(score.total, 25 + 15);
        assert_eq!(score.recommendation, Recommendation::MediumRisk);
        assert_eq!(score.breakdown.len(), 2);
        assert_eq!(score.breakdown[0].weight, 25);
        assert_eq!(score.breakdown[0].reason, "missing-access-control (lexical)");
    }

    #[test]
    fn test_duplicates_merge() {
        let mut lexical = Threat::from_signature(Signature::SelfImpersonation, FindingSource::Lexical);
        lexical.locations.push("drain".to_string());
        let oracle = Threat::from_signature(Signature::SelfImpersonation, FindingSource::Oracle);

        let score = RiskScoreBuilder::new()
            .with_findings(vec![lexical])
            .with_findings(vec![oracle])
            .with_finding(Threat::advisory("Trait manipulation", FindingSource::Oracle))
            .with_finding(Threat::advisory("trait manipulation ", FindingSource::Oracle))
            .build();

        assert_eq!(score.threats.len(), 2);
        assert_eq!(score.total, 40 + 5);
        assert_eq!(score.threats[0].source, FindingSource::Both);
        assert_eq!(score.threats[0].locations, vec!["drain".to_string()]);
        assert!(score.breakdown[0].reason.contains("lexical + oracle"));
        assert_eq!(score.breakdown[1].reason, "advisory (no catalog match)");
    }

    #[test]
    fn test_clamped_to_100() {
        let score = RiskScoreBuilder::new()
            .with_findings(Signature::ALL.iter().map(|s| Threat::from_signature(*s, FindingSource::Lexical)))
            .build();
        assert_eq!(score.total, 100);
        assert_eq!(score.recommendation, Recommendation::HighRisk);
    }

    #[test]
    fn test_ordering_severity_then_catalog() {
        let score = RiskScoreBuilder::new()
            .with_finding(Threat::advisory("odd pattern", FindingSource::Oracle))
            .with_finding(Threat::from_signature(Signature::UnhandledCallError, FindingSource::Oracle))
            .with_finding(Threat::from_signature(Signature::Reentrancy, FindingSource::Oracle))
            .with_finding(Threat::from_signature(Signature::UnauthorizedMintBurn, FindingSource::Oracle))
            .with_finding(Threat::from_signature(Signature::MissingAccessControl, FindingSource::Oracle))
            .build();

        let order: Vec<Option<Signature>> = score.threats.iter().map(|t| t.signature).collect();
        assert_eq!(
            order,
            vec![
                Some(Signature::UnauthorizedMintBurn),
                Some(Signature::MissingAccessControl),
                Some(Signature::Reentrancy),
                Some(Signature::UnhandledCallError),
                None,
            ]
        );
    }
}
