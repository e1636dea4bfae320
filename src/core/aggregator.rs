//! Score Aggregator
//!
//! Ordered history in, `(current_score, is_flagged)` out. Most-severe-wins
//! with a recency tiebreak:
//!
//! - The active window is every record after the most recent `Clear`
//! - A `CriticalOverride` in the window floors the score at 95
//! - Otherwise the score is the latest verdict, never below the max of the
//!   last N verdicts in the window
//! - A history ending in a `Clear` takes the clear's own score

use serde::Serialize;

use crate::models::{AuditRecord, RecordKind};
use crate::utils::constants::{CRITICAL_OVERRIDE_FLOOR, DEFAULT_RATCHET_WINDOW, HIGH_RISK_THRESHOLD};

/// Aggregation result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Aggregate {
    pub score: u8,
    pub is_flagged: bool,
    pub override_active: bool,
}

/// Pure function of the history; holds only the ratchet width
#[derive(Debug, Clone, Copy)]
pub struct ScoreAggregator {
    window: usize,
}

impl Default for ScoreAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_RATCHET_WINDOW)
    }
}

impl ScoreAggregator {
    /// `window` is clamped to at least 1
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Aggregate a history. `None` for an empty history.
    pub fn aggregate(&self, history: &[AuditRecord]) -> Option<Aggregate> {
        let last = history.last()?;

        let start = history
            .iter()
            .rposition(|r| r.kind == RecordKind::Clear)
            .map(|i| i + 1)
            .unwrap_or(0);
        let active = &history[start..];

        if active.is_empty() {
            let score = last.verdict.score();
            return Some(Aggregate {
                score,
                is_flagged: score >= HIGH_RISK_THRESHOLD,
                override_active: false,
            });
        }

        let override_active = active.iter().any(|r| r.kind == RecordKind::CriticalOverride);

        // Includes the latest verdict, so never below it
        let ratchet = active
            .iter()
            .rev()
            .take(self.window)
            .map(|r| r.verdict.score())
            .max()
            .unwrap_or(0);

        let score = if override_active {
            ratchet.max(CRITICAL_OVERRIDE_FLOOR)
        } else {
            ratchet
        };

        Some(Aggregate {
            score,
            is_flagged: score >= HIGH_RISK_THRESHOLD || override_active,
            override_active,
        })
    }

    /// `(score, flagged)` pair, `(0, false)` for an empty history
    pub fn score_and_flag(&self, history: &[AuditRecord]) -> (u8, bool) {
        self.aggregate(history)
            .map(|a| (a.score, a.is_flagged))
            .unwrap_or((0, false))
    }
}
