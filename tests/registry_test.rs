//! Registry scenarios: ratchet, overrides, concurrent writers

use stacksguard::core::{ReputationRegistry, ScoreAggregator};
use stacksguard::models::{
    AnalysisVerdict, ContractIdentity, ErrorCode, Provenance, RecordKind, Recommendation,
};
use std::collections::HashSet;
use std::sync::Arc;

fn id(s: &str) -> ContractIdentity {
    s.parse().unwrap()
}

fn verdict(score: u8) -> AnalysisVerdict {
    AnalysisVerdict::new(score, vec![], format!("score {}", score))
}

fn auditor() -> Provenance {
    Provenance::HumanAuditor("alice".to_string())
}

#[test]
fn test_recommendation_boundaries() {
    assert_eq!(Recommendation::from_score(30), Recommendation::Safe);
    assert_eq!(Recommendation::from_score(31), Recommendation::MediumRisk);
    assert_eq!(Recommendation::from_score(70), Recommendation::MediumRisk);
    assert_eq!(Recommendation::from_score(71), Recommendation::HighRisk);
    assert_eq!(Recommendation::from_score(95), Recommendation::HighRisk);
}

#[test]
fn test_unknown_identity_not_found() {
    let registry = ReputationRegistry::default();
    let token = id("SP1.ghost");
    assert!(registry.query(&token).unwrap().is_none());
    assert_eq!(registry.require(&token).unwrap_err().code, ErrorCode::RegistryNotFound);
}

#[test]
fn test_query_is_idempotent() {
    let registry = ReputationRegistry::default();
    let token = id("SP1.tok");
    registry.record(&token, verdict(40), Provenance::Ai).unwrap();

    let a = registry.require(&token).unwrap();
    let b = registry.require(&token).unwrap();
    assert_eq!(a.current_score(), b.current_score());
    assert_eq!(a.history(), b.history());
}

#[test]
fn test_high_then_low_ratchets() {
    let registry = ReputationRegistry::default();
    let token = id("SP1.rug");
    registry.record(&token, verdict(95), Provenance::Ai).unwrap();
    registry.record(&token, verdict(10), Provenance::Ai).unwrap();

    let entry = registry.require(&token).unwrap();
    assert!(entry.current_score() >= 95);
    assert!(entry.is_flagged());
}

#[test]
fn test_ratchet_expires_after_window() {
    let registry = ReputationRegistry::new(ScoreAggregator::new(2));
    let token = id("SP1.tok");
    for score in [90, 10, 10] {
        registry.record(&token, verdict(score), Provenance::Ai).unwrap();
    }
    let entry = registry.require(&token).unwrap();
    assert_eq!(entry.current_score(), 10);
    assert!(!entry.is_flagged());
}

#[test]
fn test_override_clear_then_ai() {
    let registry = ReputationRegistry::default();
    let token = id("SP1.rescued");

    registry
        .append(&token, RecordKind::CriticalOverride, verdict(92), auditor())
        .unwrap();
    let entry = registry.require(&token).unwrap();
    assert!(entry.current_score() >= 95);
    assert!(entry.is_flagged());

    registry.append(&token, RecordKind::Clear, verdict(5), auditor()).unwrap();
    registry.record(&token, verdict(20), Provenance::Ai).unwrap();

    let entry = registry.require(&token).unwrap();
    assert_eq!(entry.current_score(), 20);
    assert!(!entry.is_flagged());
    assert_eq!(entry.history().len(), 3);
}

#[test]
fn test_override_survives_later_ai_verdicts() {
    let registry = ReputationRegistry::default();
    let token = id("SP1.bad");
    registry
        .append(&token, RecordKind::CriticalOverride, verdict(80), auditor())
        .unwrap();
    for _ in 0..5 {
        registry.record(&token, verdict(0), Provenance::Ai).unwrap();
    }
    let entry = registry.require(&token).unwrap();
    assert_eq!(entry.current_score(), 95);
    assert!(entry.is_flagged());
}

#[test]
fn test_ai_cannot_override() {
    let registry = ReputationRegistry::default();
    let token = id("SP1.tok");
    let err = registry
        .append(&token, RecordKind::CriticalOverride, verdict(99), Provenance::Ai)
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::RegistryInvalidRecord);
    assert!(registry.query(&token).unwrap().is_none());
}

#[test]
fn test_human_and_ai_share_one_stream() {
    let registry = ReputationRegistry::default();
    let token = id("SP1.tok");
    registry.record(&token, verdict(10), Provenance::Ai).unwrap();
    registry.record(&token, verdict(50), auditor()).unwrap();

    let reports = registry.audit_reports(&token).unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].auditor, "ai");
    assert_eq!(reports[1].auditor, "human-auditor:alice");
    assert_eq!(reports[1].threat_level, "MEDIUM RISK");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_writers_no_lost_update() {
    let registry = Arc::new(ReputationRegistry::default());
    let token = id("SP1.hot");
    let other = id("SP2.cold");

    let mut handles = Vec::new();
    for task in 0..32u8 {
        let registry = registry.clone();
        let token = if task % 4 == 0 { other.clone() } else { token.clone() };
        handles.push(tokio::spawn(async move {
            for i in 0..10u8 {
                registry
                    .record(&token, verdict((task + i) % 60), Provenance::Ai)
                    .unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let hot = registry.require(&token).unwrap();
    let cold = registry.require(&other).unwrap();
    assert_eq!(hot.history().len(), 240);
    assert_eq!(cold.history().len(), 80);

    let sequences: HashSet<u64> = hot.history().iter().map(|r| r.sequence).collect();
    assert_eq!(sequences.len(), 240);
    assert!(hot.history().iter().enumerate().all(|(i, r)| r.sequence == i as u64));

    // Stored score matches a fresh aggregation of the committed history
    let (score, flagged) = registry.aggregator().score_and_flag(hot.history());
    assert_eq!(hot.current_score(), score);
    assert_eq!(hot.is_flagged(), flagged);
    assert_eq!(registry.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_append_returns_its_own_entry() {
    let registry = Arc::new(ReputationRegistry::default());
    let token = id("SP1.busy");

    let mut handles = Vec::new();
    for task in 0..16u8 {
        let registry = registry.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..20u8 {
                let (record, entry) = registry
                    .append_with_entry(&token, RecordKind::Assessment, verdict(task + i), Provenance::Ai)
                    .unwrap();
                assert_eq!(entry.history().len() as u64, record.sequence + 1);
                assert_eq!(entry.history().last().map(|r| r.id), Some(record.id));
                tokio::task::yield_now().await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(registry.require(&token).unwrap().history().len(), 320);
}
