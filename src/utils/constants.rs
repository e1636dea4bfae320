//! Constants Module - Single Source of Truth
//!
//! Thresholds, severity weights, network endpoints and defaults used across
//! the registry. Other modules import from here instead of hardcoding values.

// ============================================
// APPLICATION CONSTANTS
// ============================================

/// Application name
pub const APP_NAME: &str = "StacksGuard";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent for outbound HTTP requests
pub const USER_AGENT: &str = "StacksGuard/0.1.0";

// ============================================
// SCORE THRESHOLDS
// ============================================

/// Lowest score classified as MEDIUM RISK (scores below are SAFE)
pub const MEDIUM_RISK_THRESHOLD: u8 = 31;

/// Lowest score classified as HIGH RISK; also the flagging threshold
pub const HIGH_RISK_THRESHOLD: u8 = 71;

/// Score floor applied while a human critical override is active
pub const CRITICAL_OVERRIDE_FLOOR: u8 = 95;

/// Number of recent verdicts the ratchet looks back over
pub const DEFAULT_RATCHET_WINDOW: usize = 3;

/// Maximum score
pub const MAX_SCORE: u8 = 100;

// ============================================
// SEVERITY WEIGHTS
// ============================================

pub const WEIGHT_CRITICAL: u8 = 40;
pub const WEIGHT_HIGH: u8 = 25;
pub const WEIGHT_MEDIUM: u8 = 15;
pub const WEIGHT_LOW: u8 = 5;

// ============================================
// ORACLE / ANALYSIS
// ============================================

/// Default oracle timeout (seconds). Single-digit on purpose.
pub const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 8;

/// Default generative model
pub const DEFAULT_ORACLE_MODEL: &str = "gemini-pro";

/// Default generative API base URL
pub const DEFAULT_ORACLE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default verdict cache TTL (seconds)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Maximum accepted contract source size (bytes)
pub const MAX_SOURCE_BYTES: usize = 256 * 1024;

// ============================================
// STACKS NETWORK
// ============================================

/// Default timeout for ledger read calls (seconds)
pub const DEFAULT_LEDGER_TIMEOUT_SECS: u64 = 10;

pub const STACKS_MAINNET_API: &str = "https://api.mainnet.hiro.so";
pub const STACKS_TESTNET_API: &str = "https://api.testnet.hiro.so";

/// c32check address versions
pub const C32_VERSION_MAINNET_SINGLESIG: u8 = 22;
pub const C32_VERSION_MAINNET_MULTISIG: u8 = 20;
pub const C32_VERSION_TESTNET_SINGLESIG: u8 = 26;
pub const C32_VERSION_TESTNET_MULTISIG: u8 = 21;

/// Read-only functions exposed by the on-chain registry contract
pub const FN_GET_TOKEN_SCORE: &str = "get-token-score";
pub const FN_IS_TOKEN_FLAGGED: &str = "is-token-flagged";
pub const FN_GET_AUDIT_HISTORY: &str = "get-audit-history";

// ============================================
// SERVER
// ============================================

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

/// Shortest accepted auditor API key
pub const MIN_AUDITOR_KEY_LEN: usize = 16;

/// Get the Hiro API base URL for a network name
pub fn stacks_api_url(network: &str) -> &'static str {
    match network.to_lowercase().as_str() {
        "mainnet" => STACKS_MAINNET_API,
        _ => STACKS_TESTNET_API,
    }
}

/// Check whether a c32 version byte is known
#[inline]
pub fn is_known_c32_version(version: u8) -> bool {
    matches!(
        version,
        C32_VERSION_MAINNET_SINGLESIG
            | C32_VERSION_MAINNET_MULTISIG
            | C32_VERSION_TESTNET_SINGLESIG
            | C32_VERSION_TESTNET_MULTISIG
    )
}
