//! Pattern Analyzer
//!
//! Source text in, `AnalysisVerdict` out. Two passes feed one score:
//! 1. Lexical scan of the signature catalog (core/scanner.rs)
//! 2. Semantic pass by the scoring oracle, classified onto the same catalog
//!
//! The oracle is mandatory: if it times out, fails or answers garbage the
//! analysis is incomplete and no score is produced. No retries here.

use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::risk_score::RiskScoreBuilder;
use super::scanner::{classify_threat, scan};
use crate::models::{
    AnalysisOutcome, AnalysisVerdict, AppError, AppResult, ErrorCode, FindingSource, GuardConfig,
    Threat,
};
use crate::providers::oracle::{GeminiOracle, ScoringOracle};
use crate::utils::constants::{DEFAULT_ORACLE_TIMEOUT_SECS, MAX_SCORE, MAX_SOURCE_BYTES};

/// Validated oracle reply
#[derive(Debug, Clone, PartialEq)]
pub struct OracleVerdict {
    pub score: u8,
    pub threats: Vec<String>,
    pub reasoning: String,
}

/// Contract analyzer
pub struct PatternAnalyzer {
    oracle: Arc<dyn ScoringOracle>,
    timeout: Duration,
    max_source_bytes: usize,
}

impl PatternAnalyzer {
    pub fn new(oracle: Arc<dyn ScoringOracle>) -> Self {
        Self {
            oracle,
            timeout: Duration::from_secs(DEFAULT_ORACLE_TIMEOUT_SECS),
            max_source_bytes: MAX_SOURCE_BYTES,
        }
    }

    /// Build with the Gemini oracle described by `config`
    pub fn from_config(config: &GuardConfig) -> AppResult<Self> {
        let oracle = GeminiOracle::new(&config.oracle)?;
        Ok(Self::new(Arc::new(oracle))
            .with_timeout(config.oracle.timeout)
            .with_max_source_bytes(config.max_source_bytes))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_source_bytes(mut self, max: usize) -> Self {
        self.max_source_bytes = max;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Analyze contract source
    pub async fn analyze(&self, source: &str) -> AppResult<AnalysisVerdict> {
        if source.trim().is_empty() {
            return Err(AppError::empty_input());
        }
        if source.len() > self.max_source_bytes {
            return Err(AppError::new(
                ErrorCode::AnalysisInputTooLarge,
                format!(
                    "Contract source is {} bytes (max {})",
                    source.len(),
                    self.max_source_bytes
                ),
            ));
        }

        let start = Instant::now();

        // Phase 1: lexical scan (synchronous, cheap)
        let lexical = scan(source);

        // Phase 2: oracle, bounded by the timeout
        let prompt = build_prompt(source);
        let reply = match tokio::time::timeout(self.timeout, self.oracle.complete(&prompt)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!("⚠️ Oracle {} failed: {}", self.oracle.name(), e);
                return Err(AppError::analysis_unavailable(format!(
                    "Scoring oracle unavailable: {}",
                    e
                )));
            }
            Err(_) => {
                warn!(
                    "⏱️ Oracle {} timed out after {:?}",
                    self.oracle.name(),
                    self.timeout
                );
                return Err(AppError::analysis_unavailable(format!(
                    "Scoring oracle timed out after {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        let oracle_verdict = match parse_oracle_reply(&reply) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    target: "stacksguard::quality",
                    oracle = self.oracle.name(),
                    reply_len = reply.len(),
                    "Malformed oracle verdict: {}",
                    e.message
                );
                return Err(e);
            }
        };

        // Phase 3: merge onto the catalog and score
        let oracle_findings = oracle_verdict.threats.iter().map(|name| match classify_threat(name) {
            Some(sig) => {
                let mut t = Threat::from_signature(sig, FindingSource::Oracle);
                t.name = name.clone();
                t
            }
            None => Threat::advisory(name.clone(), FindingSource::Oracle),
        });

        let lexical_count = lexical.findings.len();
        let lexical_summary = lexical
            .findings
            .iter()
            .map(|t| t.description())
            .collect::<Vec<_>>()
            .join("; ");

        let score = RiskScoreBuilder::new()
            .with_findings(lexical.findings)
            .with_findings(oracle_findings)
            .build();

        let mut reasoning = oracle_verdict.reasoning.trim().to_string();
        if lexical_count > 0 {
            if !reasoning.is_empty() {
                reasoning.push_str("\n\n");
            }
            reasoning.push_str(&format!(
                "Lexical scan matched {} signature(s): {}",
                lexical_count, lexical_summary
            ));
        }

        let verdict = AnalysisVerdict::new(score.total, score.threats, reasoning)
            .with_oracle_score(Some(oracle_verdict.score));

        info!(
            "{} Analysis complete: {} ({}/100, oracle {}/100) in {}ms",
            verdict.recommendation().emoji(),
            verdict.recommendation().as_str(),
            verdict.score(),
            oracle_verdict.score,
            start.elapsed().as_millis()
        );

        Ok(verdict)
    }

    /// Analyze and fold analysis failures into the tri-state outcome
    pub async fn analyze_outcome(&self, source: &str) -> AppResult<AnalysisOutcome> {
        AnalysisOutcome::from_result(self.analyze(source).await)
    }
}

/// Prompt sent to the oracle
pub fn build_prompt(source: &str) -> String {
    format!(
        r#"You are a Clarity smart contract security expert specializing in Stacks blockchain vulnerabilities.

Analyze this Clarity smart contract for security vulnerabilities. Focus on:
- as-contract abuse patterns (CRITICAL - can impersonate contracts)
- Unauthorized mint or burn capabilities
- Access control vulnerabilities (missing or weak checks)
- Reentrancy attack vectors (external calls before state updates)
- Unchecked arithmetic operations
- Missing error handling on cross-contract calls
- Trait manipulation
- Principal validation issues

Contract code:
```clarity
{}
```

Return ONLY a valid JSON object with this exact structure (no markdown, no extra text):
{{
  "score": <number 0-100, where 0 is safe and 100 is critical>,
  "threats": ["threat1", "threat2"],
  "reasoning": "detailed explanation of findings"
}}"#,
        source
    )
}

/// Remove Markdown code fences and surrounding prose around a JSON object
pub fn strip_code_fences(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        // Drop the language tag line
        body = match rest.find('\n') {
            Some(i) => &rest[i + 1..],
            None => rest,
        };
        body = body.trim_end();
        body = body.strip_suffix("```").unwrap_or(body).trim();
    }
    match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => body,
    }
}

/// Parse and validate the oracle's reply
pub fn parse_oracle_reply(text: &str) -> AppResult<OracleVerdict> {
    let cleaned = strip_code_fences(text);
    if cleaned.is_empty() {
        return Err(AppError::malformed_verdict("Oracle reply was empty"));
    }

    let value: Value = serde_json::from_str(cleaned)
        .map_err(|e| AppError::malformed_verdict(format!("Oracle reply is not JSON: {}", e)))?;

    let score = value
        .get("score")
        .and_then(Value::as_f64)
        .ok_or_else(|| AppError::malformed_verdict("Missing numeric 'score'"))?;
    if !(0.0..=MAX_SCORE as f64).contains(&score) {
        return Err(AppError::malformed_verdict(format!(
            "Score {} outside 0-100",
            score
        )));
    }

    let threats = value
        .get("threats")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::malformed_verdict("Missing 'threats' array"))?
        .iter()
        .map(|t| {
            t.as_str()
                .map(|s| s.trim().to_string())
                .ok_or_else(|| AppError::malformed_verdict("Non-string entry in 'threats'"))
        })
        .collect::<AppResult<Vec<String>>>()?
        .into_iter()
        .filter(|t| !t.is_empty())
        .collect();

    let reasoning = value
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    debug!("Oracle verdict parsed: score={}", score);

    Ok(OracleVerdict {
        score: score.round() as u8,
        threats,
        reasoning,
    })
}
