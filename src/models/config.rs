//! Configuration module for StacksGuard
//!
//! Values come from the environment with defaults from utils/constants.rs.
//! Secrets (oracle API key) are never logged.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use super::errors::{AppError, AppResult};
use crate::utils::constants::{
    stacks_api_url, DEFAULT_CACHE_TTL_SECS, DEFAULT_HOST, DEFAULT_LEDGER_TIMEOUT_SECS,
    DEFAULT_ORACLE_MODEL, DEFAULT_ORACLE_TIMEOUT_SECS, DEFAULT_ORACLE_URL, DEFAULT_PORT,
    DEFAULT_RATCHET_WINDOW, MAX_SOURCE_BYTES, MIN_AUDITOR_KEY_LEN,
};

/// Stacks network the on-chain registry lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StacksNetwork {
    Mainnet,
    Testnet,
}

impl StacksNetwork {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
        }
    }

    /// Hiro API base URL (delegates to constants)
    pub fn api_url(&self) -> &'static str {
        stacks_api_url(self.name())
    }
}

impl FromStr for StacksNetwork {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            other => Err(AppError::invalid_config(format!(
                "Unsupported network: '{}' (expected mainnet or testnet)",
                other
            ))),
        }
    }
}

/// Scoring oracle settings
#[derive(Clone)]
pub struct OracleConfig {
    /// API key; `None` means every analysis reports the oracle unavailable
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_ORACLE_MODEL.to_string(),
            base_url: DEFAULT_ORACLE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_ORACLE_TIMEOUT_SECS),
        }
    }
}

impl fmt::Debug for OracleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OracleConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<hidden>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// On-chain registry settings
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub network: StacksNetwork,
    pub api_url: String,
    /// `ADDRESS.contract-name` of the registry contract, if deployed
    pub registry_contract: Option<String>,
    pub timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let network = StacksNetwork::Testnet;
        Self {
            network,
            api_url: network.api_url().to_string(),
            registry_contract: None,
            timeout: Duration::from_secs(DEFAULT_LEDGER_TIMEOUT_SECS),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// API keys of the human auditors allowed to write records. Each key maps
/// to the auditor id recorded as provenance.
#[derive(Clone, Default)]
pub struct AuditorKeys {
    by_key: HashMap<String, String>,
}

impl AuditorKeys {
    /// Build from `(auditor_id, key)` pairs
    pub fn from_pairs<I, A, K>(pairs: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = (A, K)>,
        A: Into<String>,
        K: Into<String>,
    {
        let mut by_key = HashMap::new();
        for (auditor, key) in pairs {
            let (auditor, key) = (auditor.into(), key.into());
            if auditor.trim().is_empty() {
                return Err(AppError::invalid_config("Auditor id must not be empty"));
            }
            if key.len() < MIN_AUDITOR_KEY_LEN {
                return Err(AppError::invalid_config(format!(
                    "API key for auditor '{}' is shorter than {} characters",
                    auditor, MIN_AUDITOR_KEY_LEN
                )));
            }
            if by_key.insert(key, auditor.trim().to_string()).is_some() {
                return Err(AppError::invalid_config(format!(
                    "API key for auditor '{}' is already assigned",
                    auditor
                )));
            }
        }
        Ok(Self { by_key })
    }

    /// Parse `alice=KEY,bob=KEY`
    pub fn parse(raw: &str) -> AppResult<Self> {
        let mut pairs = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (auditor, key) = entry.split_once('=').ok_or_else(|| {
                AppError::invalid_config("GUARD_AUDITOR_KEYS entries must be auditor=key")
            })?;
            pairs.push((auditor.trim().to_string(), key.trim().to_string()));
        }
        Self::from_pairs(pairs)
    }

    /// Auditor id owning `key`
    pub fn resolve(&self, key: &str) -> Option<&str> {
        self.by_key.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

// Keys stay out of Debug output
impl fmt::Debug for AuditorKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut auditors: Vec<&str> = self.by_key.values().map(String::as_str).collect();
        auditors.sort_unstable();
        f.debug_struct("AuditorKeys").field("auditors", &auditors).finish()
    }
}

/// Top-level configuration
#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub oracle: OracleConfig,
    pub ledger: LedgerConfig,
    pub server: ServerConfig,
    /// How many recent verdicts the aggregator's ratchet considers
    pub ratchet_window: usize,
    /// Verdict cache TTL in seconds (0 disables caching)
    pub cache_ttl_secs: u64,
    /// Maximum accepted source size in bytes
    pub max_source_bytes: usize,
    /// Keys allowed to write human audit records
    pub auditor_keys: AuditorKeys,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            oracle: OracleConfig::default(),
            ledger: LedgerConfig::default(),
            server: ServerConfig::default(),
            ratchet_window: DEFAULT_RATCHET_WINDOW,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            max_source_bytes: MAX_SOURCE_BYTES,
            auditor_keys: AuditorKeys::default(),
        }
    }
}

impl GuardConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // Oracle
        config.oracle.api_key = get("GEMINI_API_KEY").filter(|k| k != "YOUR_API_KEY");
        if config.oracle.api_key.is_some() {
            info!("🔑 GEMINI_API_KEY configured (key hidden for security)");
        } else {
            warn!("⚠️ GEMINI_API_KEY not set - analyses will report the oracle unavailable");
        }
        if let Some(model) = get("GUARD_ORACLE_MODEL") {
            config.oracle.model = model;
        }
        if let Some(url) = get("GUARD_ORACLE_URL") {
            config.oracle.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = get("GUARD_ORACLE_TIMEOUT_SECS") {
            let secs: u64 = parse_value("GUARD_ORACLE_TIMEOUT_SECS", &secs)?;
            if secs == 0 {
                return Err(AppError::invalid_config("GUARD_ORACLE_TIMEOUT_SECS must be > 0"));
            }
            config.oracle.timeout = Duration::from_secs(secs);
        }

        // Aggregation / cache
        if let Some(window) = get("GUARD_RATCHET_WINDOW") {
            let window: usize = parse_value("GUARD_RATCHET_WINDOW", &window)?;
            if window == 0 {
                return Err(AppError::invalid_config("GUARD_RATCHET_WINDOW must be >= 1"));
            }
            config.ratchet_window = window;
        }
        if let Some(ttl) = get("GUARD_CACHE_TTL_SECS") {
            config.cache_ttl_secs = parse_value("GUARD_CACHE_TTL_SECS", &ttl)?;
        }

        // Ledger
        if let Some(network) = get("GUARD_NETWORK") {
            config.ledger.network = network.parse()?;
            config.ledger.api_url = config.ledger.network.api_url().to_string();
        }
        if let Some(url) = get("GUARD_STACKS_API_URL") {
            config.ledger.api_url = url.trim_end_matches('/').to_string();
        }
        if let Some(contract) = get("GUARD_REGISTRY_CONTRACT") {
            if !contract.contains('.') {
                return Err(AppError::invalid_config(format!(
                    "GUARD_REGISTRY_CONTRACT must be ADDRESS.contract-name, got '{}'",
                    contract
                )));
            }
            config.ledger.registry_contract = Some(contract);
        }

        // Human auditors
        if let Some(raw) = get("GUARD_AUDITOR_KEYS") {
            config.auditor_keys = AuditorKeys::parse(&raw)?;
        }
        if config.auditor_keys.is_empty() {
            warn!("⚠️ GUARD_AUDITOR_KEYS not set - human audit writes are disabled");
        } else {
            info!("🔑 {} auditor key(s) configured (keys hidden)", config.auditor_keys.len());
        }

        // Server (PORT wins for hosted deployments)
        if let Some(host) = get("GUARD_HOST") {
            config.server.host = host;
        }
        if let Some(port) = get("PORT").or_else(|| get("GUARD_PORT")) {
            config.server.port = parse_value("PORT", &port)?;
        }

        Ok(config)
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> AppResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::invalid_config(format!("Invalid value for {}: '{}'", key, raw)))
}
