//! Ledger Client - read-only access to the on-chain registry contract
//!
//! Calls the registry's read-only functions through the Stacks node API:
//!   POST {api}/v2/contracts/call-read/{address}/{name}/{function}
//!   body: {"sender": "<address>", "arguments": ["0x<clarity hex>"]}
//!   reply: {"okay": true, "result": "0x..."} | {"okay": false, "cause": "..."}
//!
//! Transient failures (connect, timeout, 429, 5xx) retry with exponential
//! backoff and ±20% jitter. Failures surface as errors, never as 0/false.

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::clarity::{ClarityValue, PrincipalData};
use crate::core::gateway::ReputationSource;
use crate::models::{AppError, AppResult, AuditReport, ContractIdentity, ErrorCode, LedgerConfig, Recommendation};
use crate::utils::constants::{
    FN_GET_AUDIT_HISTORY, FN_GET_TOKEN_SCORE, FN_IS_TOKEN_FLAGGED, MAX_SCORE, USER_AGENT as USER_AGENT_CONST,
};

// ============================================
// RETRY CONSTANTS
// ============================================

/// Base retry delay in milliseconds
pub const LEDGER_BASE_RETRY_MS: u64 = 250;

/// Maximum retry delay in milliseconds
pub const LEDGER_MAX_RETRY_MS: u64 = 4000;

/// Maximum attempts (first try included)
pub const LEDGER_MAX_ATTEMPTS: u32 = 4;

/// Jitter percentage for retry delay
pub const RETRY_JITTER_PERCENT: u64 = 20;

/// Floor for the per-attempt request timeout
pub const LEDGER_MIN_ATTEMPT_TIMEOUT_MS: u64 = 250;

/// Not-found error code the registry contract uses
const ERR_NOT_FOUND: u128 = 404;

#[derive(Debug, Serialize)]
struct CallReadRequest<'a> {
    sender: &'a str,
    arguments: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CallReadResponse {
    okay: bool,
    result: Option<String>,
    cause: Option<String>,
}

fn capped_delay_ms(attempt: u32) -> u64 {
    let base = LEDGER_BASE_RETRY_MS.saturating_mul(2_u64.saturating_pow(attempt.saturating_sub(1)));
    base.min(LEDGER_MAX_RETRY_MS)
}

/// Longest total backoff a call can sleep through, jitter included
pub fn max_backoff_ms() -> u64 {
    (1..LEDGER_MAX_ATTEMPTS)
        .map(|attempt| {
            let capped = capped_delay_ms(attempt);
            capped + (capped * RETRY_JITTER_PERCENT) / 100
        })
        .sum()
}

/// Per-attempt request timeout so that every attempt plus the backoff
/// between them fits inside `budget` (the gateway's bound on one read)
pub fn attempt_timeout(budget: Duration) -> Duration {
    let per_attempt = budget.saturating_sub(Duration::from_millis(max_backoff_ms())) / LEDGER_MAX_ATTEMPTS;
    per_attempt.max(Duration::from_millis(LEDGER_MIN_ATTEMPT_TIMEOUT_MS))
}

/// Delay before retry `attempt` (1-based)
pub fn retry_delay_ms(attempt: u32) -> u64 {
    let capped = capped_delay_ms(attempt);
    let jitter_range = (capped * RETRY_JITTER_PERCENT) / 100;
    let jitter: i64 = rand::thread_rng().gen_range(-(jitter_range as i64)..=(jitter_range as i64));
    (capped as i64 + jitter).max(50) as u64
}

/// Read-only registry client
pub struct LedgerClient {
    client: reqwest::Client,
    api_url: String,
    contract_address: String,
    contract_name: String,
}

impl LedgerClient {
    pub fn new(config: &LedgerConfig) -> AppResult<Self> {
        let contract = config.registry_contract.as_deref().ok_or_else(|| {
            AppError::new(ErrorCode::ConfigMissingEnv, "GUARD_REGISTRY_CONTRACT not set")
        })?;
        let (address, name) = contract
            .split_once('.')
            .ok_or_else(|| AppError::invalid_config(format!("Bad registry contract '{}'", contract)))?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_CONST));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));

        // `config.timeout` bounds the whole read, retries included
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(attempt_timeout(config.timeout))
            .gzip(true)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        info!(
            "⛓️ Ledger client: {}.{} on {} ({})",
            address,
            name,
            config.network.name(),
            config.api_url
        );

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            contract_address: address.to_string(),
            contract_name: name.to_string(),
        })
    }

    pub fn contract_id(&self) -> String {
        format!("{}.{}", self.contract_address, self.contract_name)
    }

    fn endpoint(&self, function: &str) -> String {
        format!(
            "{}/v2/contracts/call-read/{}/{}/{}",
            self.api_url, self.contract_address, self.contract_name, function
        )
    }

    /// Call a read-only function with retry
    pub async fn call_read(&self, function: &str, args: &[ClarityValue]) -> AppResult<ClarityValue> {
        let arguments = args.iter().map(|a| a.to_hex()).collect::<AppResult<Vec<_>>>()?;
        let body = CallReadRequest {
            sender: &self.contract_address,
            arguments,
        };

        let mut last_error = None;
        for attempt in 0..LEDGER_MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = retry_delay_ms(attempt);
                debug!("⏳ Ledger retry {}/{} after {}ms", attempt + 1, LEDGER_MAX_ATTEMPTS, delay);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            match self.execute(function, &body).await {
                Ok(value) => return Ok(value),
                Err(e) if e.code.is_retryable() => {
                    warn!("⚠️ Ledger {} failed (attempt {}): {}", function, attempt + 1, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AppError::new(ErrorCode::LedgerConnectionFailed, "Ledger call failed after retries")
        }))
    }

    async fn execute(&self, function: &str, body: &CallReadRequest<'_>) -> AppResult<ClarityValue> {
        let response = self.client.post(self.endpoint(function)).json(body).send().await?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(AppError::new(
                ErrorCode::LedgerConnectionFailed,
                format!("Ledger node returned HTTP {}", status),
            ));
        }
        if !status.is_success() {
            return Err(AppError::ledger_invalid(format!("Ledger node returned HTTP {}", status)));
        }

        let reply: CallReadResponse = response
            .json()
            .await
            .map_err(|e| AppError::ledger_invalid(format!("Bad call-read envelope: {}", e)))?;

        if !reply.okay {
            return Err(AppError::ledger_invalid(format!(
                "{} rejected: {}",
                function,
                reply.cause.unwrap_or_else(|| "unknown cause".to_string())
            )));
        }
        let result = reply
            .result
            .ok_or_else(|| AppError::ledger_invalid("call-read reply has no result"))?;
        ClarityValue::from_hex(&result)
    }

    fn principal_arg(identity: &ContractIdentity) -> AppResult<ClarityValue> {
        Ok(ClarityValue::Principal(PrincipalData::from_identity(identity)?))
    }
}

// ============================================
// Response decoding
// ============================================

/// Strip the response/optional wrappers; `None` means "never scored"
fn unwrap_lookup(value: ClarityValue) -> AppResult<Option<ClarityValue>> {
    match value {
        ClarityValue::ResponseErr(inner) if *inner == ClarityValue::UInt(ERR_NOT_FOUND) => Ok(None),
        other => Ok(other.expect_ok()?.into_optional()),
    }
}

pub fn decode_score(value: ClarityValue) -> AppResult<Option<u8>> {
    let Some(inner) = unwrap_lookup(value)? else {
        return Ok(None);
    };
    let score = inner.as_uint()?;
    if score > MAX_SCORE as u128 {
        return Err(AppError::ledger_invalid(format!("Score {} out of range", score)));
    }
    Ok(Some(score as u8))
}

pub fn decode_flag(value: ClarityValue) -> AppResult<Option<bool>> {
    unwrap_lookup(value)?.map(|v| v.as_bool()).transpose()
}

pub fn decode_history(value: ClarityValue) -> AppResult<Vec<AuditReport>> {
    let Some(inner) = unwrap_lookup(value)? else {
        return Ok(Vec::new());
    };
    inner.as_list()?.iter().map(decode_report).collect()
}

fn decode_report(entry: &ClarityValue) -> AppResult<AuditReport> {
    let score = entry.field("score")?.as_uint()?;
    if score > MAX_SCORE as u128 {
        return Err(AppError::ledger_invalid(format!("Score {} out of range", score)));
    }
    let score = score as u8;

    let threat_level = match entry.field("threat-level") {
        Ok(v) => v.as_text()?,
        Err(_) => Recommendation::from_score(score).as_str().to_string(),
    };
    let notes = match entry.field("notes") {
        Ok(v) => v.as_text()?,
        Err(_) => String::new(),
    };
    let timestamp = entry.field("timestamp")?.as_uint()?;

    Ok(AuditReport {
        auditor: entry.field("auditor")?.as_text()?,
        score,
        threat_level,
        timestamp: u64::try_from(timestamp).map_err(|_| AppError::ledger_invalid("Timestamp overflow"))?,
        notes,
    })
}

#[async_trait]
impl ReputationSource for LedgerClient {
    fn name(&self) -> &str {
        "stacks-ledger"
    }

    async fn token_score(&self, identity: &ContractIdentity) -> AppResult<Option<u8>> {
        let arg = Self::principal_arg(identity)?;
        decode_score(self.call_read(FN_GET_TOKEN_SCORE, &[arg]).await?)
    }

    async fn token_flagged(&self, identity: &ContractIdentity) -> AppResult<Option<bool>> {
        let arg = Self::principal_arg(identity)?;
        decode_flag(self.call_read(FN_IS_TOKEN_FLAGGED, &[arg]).await?)
    }

    async fn audit_history(&self, identity: &ContractIdentity) -> AppResult<Vec<AuditReport>> {
        let arg = Self::principal_arg(identity)?;
        decode_history(self.call_read(FN_GET_AUDIT_HISTORY, &[arg]).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::DEFAULT_LEDGER_TIMEOUT_SECS;
    use std::collections::BTreeMap;

    fn ok(v: ClarityValue) -> ClarityValue {
        ClarityValue::ResponseOk(Box::new(v))
    }

    #[test]
    fn test_retry_delay_backoff() {
        for _ in 0..50 {
            let first = retry_delay_ms(1);
            assert!((200..=300).contains(&first), "first delay {}", first);
            let capped = retry_delay_ms(10);
            assert!((3200..=4800).contains(&capped), "capped delay {}", capped);
        }
    }

    #[test]
    fn test_attempts_fit_read_budget() {
        let budget = Duration::from_secs(DEFAULT_LEDGER_TIMEOUT_SECS);
        let per_attempt = attempt_timeout(budget);
        let worst_case = per_attempt * LEDGER_MAX_ATTEMPTS + Duration::from_millis(max_backoff_ms());
        assert!(worst_case <= budget, "worst case {:?} exceeds {:?}", worst_case, budget);
        assert!(per_attempt >= Duration::from_secs(1));

        // A budget too small for the backoff still leaves each attempt a floor
        assert_eq!(
            attempt_timeout(Duration::from_millis(100)),
            Duration::from_millis(LEDGER_MIN_ATTEMPT_TIMEOUT_MS)
        );
    }

    #[test]
    fn test_decode_score() {
        assert_eq!(decode_score(ok(ClarityValue::UInt(73))).unwrap(), Some(73));
        assert_eq!(
            decode_score(ok(ClarityValue::OptionalSome(Box::new(ClarityValue::UInt(5))))).unwrap(),
            Some(5)
        );
        assert_eq!(decode_score(ok(ClarityValue::OptionalNone)).unwrap(), None);
        assert_eq!(
            decode_score(ClarityValue::ResponseErr(Box::new(ClarityValue::UInt(404)))).unwrap(),
            None
        );
        assert!(decode_score(ClarityValue::ResponseErr(Box::new(ClarityValue::UInt(500)))).is_err());
        assert!(decode_score(ok(ClarityValue::UInt(101))).is_err());
        assert!(decode_score(ok(ClarityValue::Bool(true))).is_err());
    }

    #[test]
    fn test_decode_flag() {
        assert_eq!(decode_flag(ok(ClarityValue::Bool(true))).unwrap(), Some(true));
        assert_eq!(decode_flag(ok(ClarityValue::Bool(false))).unwrap(), Some(false));
        assert_eq!(decode_flag(ok(ClarityValue::OptionalNone)).unwrap(), None);
        assert!(decode_flag(ok(ClarityValue::UInt(1))).is_err());
    }

    #[test]
    fn test_decode_history() {
        let mut fields = BTreeMap::new();
        fields.insert("auditor".to_string(), ClarityValue::StringAscii("human-auditor:halborn".to_string()));
        fields.insert("score".to_string(), ClarityValue::UInt(95));
        fields.insert("timestamp".to_string(), ClarityValue::UInt(171_000));
        let history = decode_history(ok(ClarityValue::List(vec![ClarityValue::Tuple(fields)]))).unwrap();

        assert_eq!(history.len(), 1);
        assert_eq!(history[0].auditor, "human-auditor:halborn");
        assert_eq!(history[0].threat_level, "HIGH RISK");
        assert_eq!(history[0].notes, "");
        assert_eq!(history[0].timestamp, 171_000);

        assert!(decode_history(ok(ClarityValue::List(vec![]))).unwrap().is_empty());
        assert!(decode_history(ok(ClarityValue::OptionalNone)).unwrap().is_empty());
    }

    #[test]
    fn test_new_requires_contract() {
        let err = LedgerClient::new(&LedgerConfig::default()).err().unwrap();
        assert_eq!(err.code, ErrorCode::ConfigMissingEnv);
    }

    #[test]
    fn test_endpoint_format() {
        let config = LedgerConfig {
            registry_contract: Some("SP000000000000000000002Q6VF78.stacksguard-registry".to_string()),
            api_url: "http://localhost:3999/".to_string(),
            ..LedgerConfig::default()
        };
        let client = LedgerClient::new(&config).unwrap();
        assert_eq!(
            client.endpoint(FN_GET_TOKEN_SCORE),
            "http://localhost:3999/v2/contracts/call-read/SP000000000000000000002Q6VF78/stacksguard-registry/get-token-score"
        );
        assert_eq!(client.contract_id(), "SP000000000000000000002Q6VF78.stacksguard-registry");
    }
}
