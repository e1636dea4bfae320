//! API Middleware (Auth, Rate Limiting, Logging)

use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::handlers::AppState;
use super::types::{ApiError, ApiResponse};

/// Rate limiter configuration
pub struct RateLimitConfig {
    /// Requests per window
    pub requests_per_window: u32,
    /// Window duration
    pub window_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 100,
            window_duration: Duration::from_secs(60),
        }
    }
}

/// In-memory fixed-window rate limiter
pub struct RateLimiter {
    /// Request counts per API key / client IP
    requests: DashMap<String, (u32, Instant)>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            requests: DashMap::new(),
            config,
        }
    }

    /// Check if request is allowed, returns (allowed, remaining, reset_seconds)
    pub fn check(&self, key: &str) -> (bool, u32, u64) {
        let now = Instant::now();

        let mut entry = self.requests.entry(key.to_string()).or_insert((0, now));

        if now.duration_since(entry.1) > self.config.window_duration {
            entry.0 = 0;
            entry.1 = now;
        }

        let remaining = self.config.requests_per_window.saturating_sub(entry.0);
        let reset_secs = self
            .config
            .window_duration
            .saturating_sub(now.duration_since(entry.1))
            .as_secs();

        if entry.0 >= self.config.requests_per_window {
            return (false, 0, reset_secs);
        }

        entry.0 += 1;
        (true, remaining.saturating_sub(1), reset_secs)
    }

    /// Drop windows that ended long ago
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.requests.len();
        self.requests.retain(|_, (_, started)| {
            now.duration_since(*started) < self.config.window_duration * 2
        });
        before.saturating_sub(self.requests.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.requests.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

// Global rate limiter instance
lazy_static::lazy_static! {
    pub static ref RATE_LIMITER: Arc<RateLimiter> = Arc::new(RateLimiter::default());
}

/// Periodically prune the global rate limiter
pub fn start_cleanup_task() -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(120));
        loop {
            interval.tick().await;
            let removed = RATE_LIMITER.cleanup();
            if removed > 0 {
                debug!("🧹 Rate limiter cleanup: {} stale keys removed", removed);
            }
        }
    })
}

fn is_health(path: &str) -> bool {
    path == "/health" || path == "/v1/health"
}

fn api_key(headers: &HeaderMap) -> Option<&str> {
    headers.get("x-api-key").and_then(|v| v.to_str().ok())
}

/// Human audit writes need a key; other routes accept anonymous callers
fn requires_key(method: &Method, path: &str) -> bool {
    method == Method::POST && path.ends_with("/audits")
}

/// Auditor authenticated by the request's API key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditorId(pub String);

/// Error envelope for requests stopped before reaching a handler
fn reject(status: StatusCode, error: ApiError) -> Response {
    (status, Json(ApiResponse::error(error, 0.0))).into_response()
}

/// API key authentication middleware. A presented key must belong to a
/// configured auditor; the auditor id rides along as an `AuditorId`
/// extension.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, Response> {
    let path = request.uri().path().to_string();
    if is_health(&path) {
        return Ok(next.run(request).await);
    }

    match api_key(&headers) {
        Some(key) => match state.auditor_keys.resolve(key) {
            Some(auditor) => {
                debug!(path = %path, auditor = %auditor, "Authenticated auditor");
                request.extensions_mut().insert(AuditorId(auditor.to_string()));
                Ok(next.run(request).await)
            }
            None => {
                warn!(path = %path, "Invalid API key attempted");
                Err(reject(StatusCode::UNAUTHORIZED, ApiError::unauthorized()))
            }
        },
        None if requires_key(request.method(), &path) => {
            warn!(path = %path, "Audit write without API key");
            Err(reject(StatusCode::UNAUTHORIZED, ApiError::unauthorized()))
        }
        None => Ok(next.run(request).await),
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    if is_health(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    // API key, else client IP
    let rate_key = api_key(&headers)
        .map(|s| s.to_string())
        .unwrap_or_else(|| {
            headers
                .get("x-forwarded-for")
                .or_else(|| headers.get("x-real-ip"))
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown")
                .to_string()
        });

    let (allowed, remaining, reset) = RATE_LIMITER.check(&rate_key);

    if !allowed {
        warn!("Rate limit exceeded");
        let mut response = reject(StatusCode::TOO_MANY_REQUESTS, ApiError::rate_limited(reset));
        response.headers_mut().insert("Retry-After", reset.into());
        return Err(response);
    }

    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Remaining", remaining.into());
    headers.insert("X-RateLimit-Reset", reset.into());

    Ok(response)
}

/// Request logging middleware
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    info!(
        method = %method,
        uri = %uri,
        status = %status.as_u16(),
        latency_ms = %latency.as_millis(),
        "Request completed"
    );

    response
}
