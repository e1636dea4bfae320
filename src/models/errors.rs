//! Centralized Error Handling Module
//!
//! Every failure carries a unique error code so logs and API responses can be
//! correlated.
//!
//! Error codes follow pattern: CATEGORY_SPECIFIC_ERROR
//! - ANALYSIS_xxx: Pattern analyzer / scoring oracle
//! - REGISTRY_xxx: Reputation registry
//! - LEDGER_xxx: On-chain registry reads
//! - API_xxx: API errors
//! - CFG_xxx: Configuration errors

use std::fmt;

/// Application-wide error type
#[derive(Debug)]
pub struct AppError {
    /// Unique error code for logging/monitoring
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Optional underlying error
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new AppError
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create AppError with source error
    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get error code as string (for logging)
    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    /// True when the analysis could not be completed. Callers must render
    /// this as "analysis incomplete", never as a score.
    pub fn is_analysis_incomplete(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::AnalysisUnavailable | ErrorCode::AnalysisMalformedVerdict
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Unique error codes for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // ============================================
    // Analysis Errors (1xx)
    // ============================================
    /// Contract source was empty or whitespace
    AnalysisEmptyInput,
    /// Contract source exceeds the accepted size
    AnalysisInputTooLarge,
    /// Scoring oracle unreachable, timed out or not configured
    AnalysisUnavailable,
    /// Scoring oracle replied with text that is not a verdict
    AnalysisMalformedVerdict,

    // ============================================
    // Registry Errors (2xx)
    // ============================================
    /// No history for the identity
    RegistryNotFound,
    /// Per-identity serialization was violated (lock poisoned)
    RegistryWriteConflict,
    /// Record kind not allowed for the given provenance
    RegistryInvalidRecord,

    // ============================================
    // API Errors (3xx)
    // ============================================
    /// Invalid request format
    ApiBadRequest,
    /// Unauthorized (invalid API key)
    ApiUnauthorized,
    /// Rate limit exceeded
    ApiRateLimited,
    /// Internal server error
    ApiInternalError,

    // ============================================
    // Configuration Errors (4xx)
    // ============================================
    /// Missing environment variable
    ConfigMissingEnv,
    /// Invalid configuration value
    ConfigInvalidValue,

    // ============================================
    // Identity Errors (5xx)
    // ============================================
    /// Malformed contract identity
    IdentityInvalid,

    // ============================================
    // Ledger Errors (6xx)
    // ============================================
    /// Ledger node unreachable
    LedgerConnectionFailed,
    /// Ledger request timeout
    LedgerTimeout,
    /// Ledger returned an error or a value of the wrong shape
    LedgerInvalidResponse,
    /// Value could not be encoded/decoded as a Clarity value
    LedgerCodec,

    // ============================================
    // Session Errors (7xx)
    // ============================================
    /// Transition not allowed from the current session state
    SessionInvalidTransition,

    // ============================================
    // Generic Errors (9xx)
    // ============================================
    /// Unknown error
    Unknown,
}

impl ErrorCode {
    /// Get string representation of error code
    pub fn as_str(&self) -> &'static str {
        match self {
            // Analysis Errors
            Self::AnalysisEmptyInput => "ANALYSIS_EMPTY_INPUT",
            Self::AnalysisInputTooLarge => "ANALYSIS_INPUT_TOO_LARGE",
            Self::AnalysisUnavailable => "ANALYSIS_UNAVAILABLE",
            Self::AnalysisMalformedVerdict => "ANALYSIS_MALFORMED_VERDICT",

            // Registry Errors
            Self::RegistryNotFound => "REGISTRY_NOT_FOUND",
            Self::RegistryWriteConflict => "REGISTRY_WRITE_CONFLICT",
            Self::RegistryInvalidRecord => "REGISTRY_INVALID_RECORD",

            // API Errors
            Self::ApiBadRequest => "API_BAD_REQUEST",
            Self::ApiUnauthorized => "API_UNAUTHORIZED",
            Self::ApiRateLimited => "API_RATE_LIMITED",
            Self::ApiInternalError => "API_INTERNAL_ERROR",

            // Configuration Errors
            Self::ConfigMissingEnv => "CFG_MISSING_ENV",
            Self::ConfigInvalidValue => "CFG_INVALID_VALUE",

            // Identity Errors
            Self::IdentityInvalid => "IDENTITY_INVALID",

            // Ledger Errors
            Self::LedgerConnectionFailed => "LEDGER_CONNECTION_FAILED",
            Self::LedgerTimeout => "LEDGER_TIMEOUT",
            Self::LedgerInvalidResponse => "LEDGER_INVALID_RESPONSE",
            Self::LedgerCodec => "LEDGER_CODEC",

            // Session Errors
            Self::SessionInvalidTransition => "SESSION_INVALID_TRANSITION",

            // Generic
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// Get HTTP status code for API responses
    pub fn http_status(&self) -> u16 {
        match self {
            Self::AnalysisEmptyInput
            | Self::ApiBadRequest
            | Self::IdentityInvalid
            | Self::RegistryInvalidRecord
            | Self::ConfigInvalidValue => 400,
            Self::ApiUnauthorized => 401,
            Self::RegistryNotFound => 404,
            Self::SessionInvalidTransition => 409,
            Self::AnalysisInputTooLarge => 413,
            Self::ApiRateLimited => 429,
            Self::LedgerInvalidResponse | Self::LedgerCodec => 502,
            Self::AnalysisUnavailable
            | Self::AnalysisMalformedVerdict
            | Self::LedgerConnectionFailed => 503,
            Self::LedgerTimeout => 504,
            _ => 500,
        }
    }

    /// Check if error is retryable (by the caller; nothing retries internally
    /// except ledger reads)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AnalysisUnavailable
                | Self::AnalysisMalformedVerdict
                | Self::ApiRateLimited
                | Self::LedgerConnectionFailed
                | Self::LedgerTimeout
        )
    }
}

// ============================================
// Convenience constructors
// ============================================

impl AppError {
    /// Empty contract source
    pub fn empty_input() -> Self {
        Self::new(ErrorCode::AnalysisEmptyInput, "Contract code is required")
    }

    /// Scoring oracle unavailable
    pub fn analysis_unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::AnalysisUnavailable, msg)
    }

    /// Scoring oracle reply did not parse
    pub fn malformed_verdict(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::AnalysisMalformedVerdict, msg)
    }

    /// Identity has no history
    pub fn not_found(identity: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::RegistryNotFound,
            format!("No reputation entry for {}", identity),
        )
    }

    /// Per-identity write serialization violated
    pub fn write_conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::RegistryWriteConflict, msg)
    }

    /// Invalid contract identity
    pub fn invalid_identity(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::IdentityInvalid, msg)
    }

    /// Ledger returned something unexpected
    pub fn ledger_invalid(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::LedgerInvalidResponse, msg)
    }

    /// Clarity encode/decode failure
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::LedgerCodec, msg)
    }

    /// Invalid configuration
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigInvalidValue, msg)
    }

    /// API bad request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ApiBadRequest, msg)
    }

    /// API internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ApiInternalError, msg)
    }
}

// ============================================
// Result type alias
// ============================================

/// Application Result type
pub type AppResult<T> = Result<T, AppError>;

// ============================================
// Conversion from common error types
// ============================================

impl From<eyre::Report> for AppError {
    fn from(err: eyre::Report) -> Self {
        Self::new(ErrorCode::Unknown, err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(ErrorCode::Unknown, "IO error", err)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::new(ErrorCode::LedgerTimeout, "Request timeout")
        } else if err.is_connect() {
            Self::new(ErrorCode::LedgerConnectionFailed, "Connection failed")
        } else {
            Self::new(ErrorCode::Unknown, err.without_url().to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(ErrorCode::LedgerInvalidResponse, "JSON parse error", err)
    }
}
