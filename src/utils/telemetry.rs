//! Telemetry Module for StacksGuard
//!
//! Counts analyses and their outcomes for monitoring and reporting:
//! - analyzed / flagged verdicts / unavailable / malformed / empty input
//! - findings per signature
//! - average analysis latency
//!
//! Privacy-first: no contract identities or source text are stored, only
//! scores, signature names and timings.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::models::{AnalysisVerdict, RecordKind};
use crate::utils::constants::{APP_VERSION, HIGH_RISK_THRESHOLD};

/// What happened
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Verdict,
    Unavailable,
    Malformed,
    EmptyInput,
    Recorded,
}

/// Single telemetry event (anonymized)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub timestamp: u64,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<String>,
}

impl TelemetryEvent {
    fn new(kind: EventKind, score: Option<u8>, latency_ms: u64, signatures: Vec<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            kind,
            score,
            latency_ms,
            signatures,
        }
    }
}

/// Aggregated statistics for reporting
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelemetryStats {
    /// Analysis attempts that reached the oracle
    pub total_analyzed: u64,
    /// Complete verdicts
    pub verdicts: u64,
    /// Verdicts at or above the flag threshold
    pub high_risk_verdicts: u64,
    pub unavailable: u64,
    pub malformed: u64,
    pub empty_input: u64,
    /// Registry appends
    pub records_written: u64,
    pub human_records: u64,
    pub findings_by_signature: HashMap<String, u64>,
    pub avg_latency_ms: f64,
    pub period_start: u64,
    pub period_end: u64,
}

impl TelemetryStats {
    /// Share of attempts that ended in a verdict (0-100)
    pub fn completion_rate(&self) -> f64 {
        if self.total_analyzed == 0 {
            return 0.0;
        }
        (self.verdicts as f64 / self.total_analyzed as f64) * 100.0
    }

    /// Console summary printed on shutdown
    pub fn summary_report(&self) -> String {
        let period_mins = self.period_end.saturating_sub(self.period_start) / 60;
        let mut top: Vec<(&String, &u64)> = self.findings_by_signature.iter().collect();
        top.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        let top_line = top
            .iter()
            .take(3)
            .map(|(name, count)| format!("{} ({})", name, count))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            r#"
╔══════════════════════════════════════════════════════════════════╗
║           🛡️ STACKSGUARD v{} - SESSION REPORT
╠══════════════════════════════════════════════════════════════════╣
║   📊 Period: {} minutes
║   🔍 Contracts analyzed:      {:>10}
║   ✅ Complete verdicts:       {:>10} ({:.1}%)
║   🚨 High-risk verdicts:      {:>10}
║   ⏳ Oracle unavailable:      {:>10}
║   🧩 Malformed replies:       {:>10}
║   📝 Registry records:        {:>10} ({} human)
║   ⚡ Avg analysis latency:    {:>10.2}ms
║   🔝 Top findings: {}
╚══════════════════════════════════════════════════════════════════╝
"#,
            APP_VERSION,
            period_mins,
            self.total_analyzed,
            self.verdicts,
            self.completion_rate(),
            self.high_risk_verdicts,
            self.unavailable,
            self.malformed,
            self.records_written,
            self.human_records,
            self.avg_latency_ms,
            if top_line.is_empty() { "none".to_string() } else { top_line },
        )
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Main telemetry collector
pub struct GuardTelemetry {
    events: RwLock<Vec<TelemetryEvent>>,
    total_analyzed: AtomicU64,
    verdicts: AtomicU64,
    high_risk_verdicts: AtomicU64,
    unavailable: AtomicU64,
    malformed: AtomicU64,
    empty_input: AtomicU64,
    records_written: AtomicU64,
    human_records: AtomicU64,
    total_latency_ms: AtomicU64,
    signature_counts: RwLock<HashMap<String, u64>>,
    session_start: u64,
    /// `None` keeps everything in memory
    export_dir: Option<PathBuf>,
    max_buffer_size: usize,
}

impl Default for GuardTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardTelemetry {
    /// In-memory collector (no files)
    pub fn new() -> Self {
        Self::build(None, 1000)
    }

    /// Collector that flushes events to JSONL files under `export_dir`
    pub fn with_export_dir(export_dir: PathBuf, max_buffer_size: usize) -> Self {
        if let Err(e) = fs::create_dir_all(&export_dir) {
            warn!("⚠️ Telemetry dir {} unavailable: {}", export_dir.display(), e);
        }
        Self::build(Some(export_dir), max_buffer_size.max(1))
    }

    fn build(export_dir: Option<PathBuf>, max_buffer_size: usize) -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            total_analyzed: AtomicU64::new(0),
            verdicts: AtomicU64::new(0),
            high_risk_verdicts: AtomicU64::new(0),
            unavailable: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            empty_input: AtomicU64::new(0),
            records_written: AtomicU64::new(0),
            human_records: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            signature_counts: RwLock::new(HashMap::new()),
            session_start: current_timestamp(),
            export_dir,
            max_buffer_size,
        }
    }

    /// Record a complete verdict
    pub fn record_verdict(&self, verdict: &AnalysisVerdict, latency_ms: u64) {
        self.total_analyzed.fetch_add(1, Ordering::Relaxed);
        self.verdicts.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        if verdict.score() >= HIGH_RISK_THRESHOLD {
            self.high_risk_verdicts.fetch_add(1, Ordering::Relaxed);
        }

        let signatures: Vec<String> = verdict
            .threats()
            .iter()
            .filter_map(|t| t.signature.map(|s| s.as_str().to_string()))
            .collect();
        if let Ok(mut counts) = self.signature_counts.write() {
            for sig in &signatures {
                *counts.entry(sig.clone()).or_insert(0) += 1;
            }
        }

        self.push(TelemetryEvent::new(
            EventKind::Verdict,
            Some(verdict.score()),
            latency_ms,
            signatures,
        ));
    }

    /// Record an oracle timeout/transport failure
    pub fn record_unavailable(&self, latency_ms: u64) {
        self.total_analyzed.fetch_add(1, Ordering::Relaxed);
        self.unavailable.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.push(TelemetryEvent::new(EventKind::Unavailable, None, latency_ms, Vec::new()));
    }

    /// Record an unparseable oracle reply
    pub fn record_malformed(&self, latency_ms: u64) {
        self.total_analyzed.fetch_add(1, Ordering::Relaxed);
        self.malformed.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.push(TelemetryEvent::new(EventKind::Malformed, None, latency_ms, Vec::new()));
    }

    /// Record a rejected empty submission (never reaches the oracle)
    pub fn record_empty_input(&self) {
        self.empty_input.fetch_add(1, Ordering::Relaxed);
        self.push(TelemetryEvent::new(EventKind::EmptyInput, None, 0, Vec::new()));
    }

    /// Record a registry append
    pub fn record_write(&self, kind: RecordKind, human: bool, score: u8) {
        self.records_written.fetch_add(1, Ordering::Relaxed);
        if human {
            self.human_records.fetch_add(1, Ordering::Relaxed);
        }
        let signatures = match kind {
            RecordKind::Assessment => Vec::new(),
            other => vec![format!("{:?}", other).to_lowercase()],
        };
        self.push(TelemetryEvent::new(EventKind::Recorded, Some(score), 0, signatures));
    }

    fn push(&self, event: TelemetryEvent) {
        let Ok(mut events) = self.events.write() else {
            return;
        };
        events.push(event);

        if events.len() >= self.max_buffer_size {
            let to_flush = std::mem::take(&mut *events);
            drop(events);
            if self.export_dir.is_some() {
                if let Err(e) = self.flush_events(&to_flush) {
                    warn!("⚠️ Telemetry flush failed: {}", e);
                }
            }
        }
    }

    /// Events still buffered in memory
    pub fn buffered_events(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn get_stats(&self) -> TelemetryStats {
        let total_analyzed = self.total_analyzed.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);
        let avg_latency_ms = if total_analyzed > 0 {
            total_latency as f64 / total_analyzed as f64
        } else {
            0.0
        };

        TelemetryStats {
            total_analyzed,
            verdicts: self.verdicts.load(Ordering::Relaxed),
            high_risk_verdicts: self.high_risk_verdicts.load(Ordering::Relaxed),
            unavailable: self.unavailable.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            empty_input: self.empty_input.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            human_records: self.human_records.load(Ordering::Relaxed),
            findings_by_signature: self
                .signature_counts
                .read()
                .map(|c| c.clone())
                .unwrap_or_default(),
            avg_latency_ms,
            period_start: self.session_start,
            period_end: current_timestamp(),
        }
    }

    /// Write current stats (and any buffered events) to the export dir
    pub fn export_stats_json(&self) -> Result<PathBuf, std::io::Error> {
        let dir = self.export_dir.clone().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "telemetry export disabled")
        })?;

        let pending = self
            .events
            .write()
            .map(|mut e| std::mem::take(&mut *e))
            .unwrap_or_default();
        self.flush_events(&pending)?;

        let path = dir.join(format!("stats_{}.json", current_timestamp()));
        fs::write(&path, serde_json::to_string_pretty(&self.get_stats())?)?;
        Ok(path)
    }

    fn flush_events(&self, events: &[TelemetryEvent]) -> Result<(), std::io::Error> {
        let Some(dir) = &self.export_dir else {
            return Ok(());
        };
        if events.is_empty() {
            return Ok(());
        }

        let path = dir.join(format!("events_{}.jsonl", current_timestamp()));
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        for event in events {
            if let Ok(json) = serde_json::to_string(event) {
                writeln!(file, "{}", json)?;
            }
        }
        Ok(())
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FindingSource, Signature, Threat};

    #[test]
    fn test_counters() {
        let telemetry = GuardTelemetry::new();
        let verdict = AnalysisVerdict::new(
            80,
            vec![Threat::from_signature(Signature::SelfImpersonation, FindingSource::Lexical)],
            "",
        );
        telemetry.record_verdict(&verdict, 30);
        telemetry.record_unavailable(10);
        telemetry.record_malformed(20);
        telemetry.record_empty_input();
        telemetry.record_write(RecordKind::CriticalOverride, true, 95);

        let stats = telemetry.get_stats();
        assert_eq!(stats.total_analyzed, 3);
        assert_eq!(stats.verdicts, 1);
        assert_eq!(stats.high_risk_verdicts, 1);
        assert_eq!(stats.unavailable, 1);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.empty_input, 1);
        assert_eq!(stats.human_records, 1);
        assert_eq!(stats.findings_by_signature.get("self-impersonation"), Some(&1));
        assert!((stats.avg_latency_ms - 20.0).abs() < f64::EPSILON);
        assert_eq!(telemetry.buffered_events(), 5);
    }

    #[test]
    fn test_in_memory_buffer_rolls_over() {
        let telemetry = GuardTelemetry::build(None, 2);
        telemetry.record_empty_input();
        telemetry.record_empty_input();
        assert_eq!(telemetry.buffered_events(), 0);
        assert!(telemetry.export_stats_json().is_err());
    }

    #[test]
    fn test_summary_report() {
        let mut stats = TelemetryStats {
            total_analyzed: 10,
            verdicts: 8,
            ..Default::default()
        };
        stats.findings_by_signature.insert("reentrancy".to_string(), 4);
        let report = stats.summary_report();
        assert!(report.contains("80.0%"));
        assert!(report.contains("reentrancy (4)"));
        assert!(stats.to_json().contains("findings_by_signature"));
    }
}
