//! Reputation Registry - system of record
//!
//! Append-only. One slot per identity in a sharded DashMap:
//! - `writer` mutex serializes appends for that identity (no lost updates)
//! - `current` holds an immutable snapshot; readers clone the Arc and go
//!
//! Different identities never contend beyond the DashMap shard lookup.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::aggregator::ScoreAggregator;
use crate::models::{
    AnalysisVerdict, AppError, AppResult, AuditRecord, AuditReport, ContractIdentity, ErrorCode,
    Provenance, RecordKind, ReputationEntry,
};

struct IdentitySlot {
    writer: Mutex<()>,
    current: RwLock<Arc<ReputationEntry>>,
}

impl IdentitySlot {
    fn new(identity: ContractIdentity) -> Self {
        Self {
            writer: Mutex::new(()),
            current: RwLock::new(Arc::new(ReputationEntry::empty(identity))),
        }
    }

    fn snapshot(&self) -> AppResult<Arc<ReputationEntry>> {
        self.current
            .read()
            .map(|entry| Arc::clone(&entry))
            .map_err(|_| AppError::write_conflict("Reputation entry lock poisoned"))
    }
}

/// In-process reputation registry
pub struct ReputationRegistry {
    slots: DashMap<ContractIdentity, Arc<IdentitySlot>>,
    aggregator: ScoreAggregator,
}

impl Default for ReputationRegistry {
    fn default() -> Self {
        Self::new(ScoreAggregator::default())
    }
}

impl ReputationRegistry {
    pub fn new(aggregator: ScoreAggregator) -> Self {
        Self {
            slots: DashMap::new(),
            aggregator,
        }
    }

    pub fn aggregator(&self) -> &ScoreAggregator {
        &self.aggregator
    }

    /// Append an ordinary assessment
    pub fn record(
        &self,
        identity: &ContractIdentity,
        verdict: AnalysisVerdict,
        provenance: Provenance,
    ) -> AppResult<AuditRecord> {
        self.append(identity, RecordKind::Assessment, verdict, provenance)
    }

    /// Append a record of any kind. Overrides and clears need a human.
    pub fn append(
        &self,
        identity: &ContractIdentity,
        kind: RecordKind,
        verdict: AnalysisVerdict,
        provenance: Provenance,
    ) -> AppResult<AuditRecord> {
        self.append_with_entry(identity, kind, verdict, provenance)
            .map(|(record, _)| record)
    }

    /// Like `append`, also returning the entry this append published. Later
    /// writers never show up in it.
    pub fn append_with_entry(
        &self,
        identity: &ContractIdentity,
        kind: RecordKind,
        verdict: AnalysisVerdict,
        provenance: Provenance,
    ) -> AppResult<(AuditRecord, Arc<ReputationEntry>)> {
        if kind.requires_human() && !provenance.is_human() {
            return Err(AppError::new(
                ErrorCode::RegistryInvalidRecord,
                format!("{:?} records require a human auditor, got '{}'", kind, provenance),
            ));
        }

        // Clone the slot out so the shard lock is released before we block
        let slot = self
            .slots
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(IdentitySlot::new(identity.clone())))
            .clone();

        let _writer = slot
            .writer
            .lock()
            .map_err(|_| AppError::write_conflict(format!("Writer lock poisoned for {}", identity)))?;

        let previous = slot.snapshot()?;
        let record = AuditRecord {
            id: Uuid::new_v4(),
            sequence: previous.history().len() as u64,
            identity: identity.clone(),
            kind,
            verdict,
            provenance,
            recorded_at: Utc::now(),
        };

        let aggregator = self.aggregator;
        let next = previous.appended(record.clone(), |history| aggregator.score_and_flag(history));

        debug!(
            identity = %identity,
            sequence = record.sequence,
            score = next.current_score(),
            flagged = next.is_flagged(),
            "📝 Registry append"
        );
        if next.is_flagged() && !previous.is_flagged() {
            warn!("🚩 {} is now FLAGGED (score {})", identity, next.current_score());
        } else if !next.is_flagged() && previous.is_flagged() {
            info!("🏳️ {} is no longer flagged (score {})", identity, next.current_score());
        }

        let next = Arc::new(next);
        let mut current = slot
            .current
            .write()
            .map_err(|_| AppError::write_conflict(format!("Entry lock poisoned for {}", identity)))?;
        *current = Arc::clone(&next);

        Ok((record, next))
    }

    /// Latest committed entry, `None` if the identity has no history
    pub fn query(&self, identity: &ContractIdentity) -> AppResult<Option<Arc<ReputationEntry>>> {
        let Some(slot) = self.slots.get(identity).map(|s| Arc::clone(s.value())) else {
            return Ok(None);
        };
        let entry = slot.snapshot()?;
        Ok((!entry.is_empty()).then_some(entry))
    }

    /// Like `query`, but a missing identity is an error
    pub fn require(&self, identity: &ContractIdentity) -> AppResult<Arc<ReputationEntry>> {
        self.query(identity)?.ok_or_else(|| AppError::not_found(identity))
    }

    /// Full audit trail in insertion order
    pub fn history(&self, identity: &ContractIdentity) -> AppResult<Vec<AuditRecord>> {
        Ok(self.require(identity)?.history().to_vec())
    }

    /// Flattened audit trail (query surface shape)
    pub fn audit_reports(&self, identity: &ContractIdentity) -> AppResult<Vec<AuditReport>> {
        Ok(self
            .require(identity)?
            .history()
            .iter()
            .map(AuditReport::from)
            .collect())
    }

    /// Identities with at least one record
    pub fn identities(&self) -> Vec<ContractIdentity> {
        let mut ids: Vec<ContractIdentity> = self
            .slots
            .iter()
            .filter(|s| s.value().snapshot().map(|e| !e.is_empty()).unwrap_or(false))
            .map(|s| s.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.identities().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of identities currently flagged
    pub fn flagged_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.value().snapshot().map(|e| e.is_flagged()).unwrap_or(false))
            .count()
    }
}
