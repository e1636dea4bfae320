//! Scoring Oracle Client
//!
//! The external generative model behind the pattern analyzer. The analyzer
//! only needs "prompt in, text out"; parsing and validation happen there.
//!
//! API: POST {base}/models/{model}:generateContent
//! The key travels in the `x-goog-api-key` header, never in the URL.
//! Response text lives at candidates[0].content.parts[0].text

use async_trait::async_trait;
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

use crate::models::OracleConfig;
use crate::utils::constants::USER_AGENT;

/// Anything that can turn a prompt into raw model text
#[async_trait]
pub trait ScoringOracle: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Send the prompt and return the raw reply text
    async fn complete(&self, prompt: &str) -> Result<String>;
}

// ============================================
// Gemini-compatible HTTP oracle
// ============================================

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini `generateContent` client
pub struct GeminiOracle {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiOracle {
    pub fn new(config: &OracleConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            // The analyzer enforces its own deadline; this is a backstop
            .timeout(config.timeout + Duration::from_secs(2))
            .build()
            .map_err(|e| eyre!("Failed to build oracle HTTP client: {}", e))?;

        info!("🤖 Scoring oracle: {} @ {}", config.model, config.base_url);

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl ScoringOracle for GeminiOracle {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| eyre!("GEMINI_API_KEY not configured"))?;

        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        };

        debug!("📤 Oracle request: {} ({} prompt bytes)", self.model, prompt.len());

        let response = self
            .client
            .post(self.endpoint())
            .header(API_KEY_HEADER, key)
            .json(&body)
            .send()
            .await
            .map_err(|e| eyre!("Oracle request failed: {}", e.without_url()))?;

        if !response.status().is_success() {
            return Err(eyre!("Oracle API error: {}", response.status()));
        }

        let data: GenerateResponse = response
            .json()
            .await
            .map_err(|e| eyre!("Failed to decode oracle envelope: {}", e.without_url()))?;

        let text = data
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| eyre!("Oracle returned no candidates"))?;

        debug!("📥 Oracle reply: {} bytes", text.len());
        Ok(text)
    }
}

// ============================================
// Scripted oracle (tests, offline demos)
// ============================================

/// One scripted reaction
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Reply with this text
    Text(String),
    /// Fail as if the transport broke
    Fail(String),
    /// Sleep, then reply with the text
    Delayed(Duration, String),
}

/// In-process oracle that replays scripted replies in order. The last
/// reply repeats once the script is exhausted.
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<ScriptedReply>>,
    last: Mutex<Option<ScriptedReply>>,
    calls: AtomicU64,
}

impl ScriptedOracle {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicU64::new(0),
        }
    }

    /// Always reply with the same text
    pub fn always(text: impl Into<String>) -> Self {
        Self::new([ScriptedReply::Text(text.into())])
    }

    /// Reply with a well-formed verdict JSON
    pub fn verdict(score: u8, threats: &[&str], reasoning: &str) -> Self {
        let body = serde_json::json!({
            "score": score,
            "threats": threats,
            "reasoning": reasoning,
        });
        Self::always(body.to_string())
    }

    /// How many prompts were received
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn next_reply(&self) -> Option<ScriptedReply> {
        let next = self.replies.lock().ok()?.pop_front();
        let mut last = self.last.lock().ok()?;
        match next {
            Some(reply) => {
                *last = Some(reply.clone());
                Some(reply)
            }
            None => last.clone(),
        }
    }
}

#[async_trait]
impl ScoringOracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match self.next_reply() {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Fail(msg)) => Err(eyre!(msg)),
            Some(ScriptedReply::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            None => Err(eyre!("Scripted oracle has no replies")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_sequence_repeats_last() {
        let oracle = ScriptedOracle::new([
            ScriptedReply::Text("one".to_string()),
            ScriptedReply::Fail("boom".to_string()),
        ]);
        assert_eq!(oracle.complete("p").await.unwrap(), "one");
        assert!(oracle.complete("p").await.is_err());
        assert!(oracle.complete("p").await.is_err());
        assert_eq!(oracle.calls(), 3);
    }

    #[tokio::test]
    async fn test_gemini_without_key_fails() {
        let oracle = GeminiOracle::new(&OracleConfig::default()).unwrap();
        let err = oracle.complete("prompt").await.unwrap_err();
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    const SECRET: &str = "AIzaSy-test-secret-0042";

    fn keyed_config(base_url: String) -> OracleConfig {
        OracleConfig {
            api_key: Some(SECRET.to_string()),
            base_url,
            timeout: Duration::from_secs(2),
            ..OracleConfig::default()
        }
    }

    #[tokio::test]
    async fn test_transport_error_hides_key() {
        let oracle = GeminiOracle::new(&keyed_config("http://127.0.0.1:1/v1beta".to_string())).unwrap();
        let err = oracle.complete("prompt").await.unwrap_err();
        let text = format!("{} {:?}", err, err);
        assert!(text.contains("Oracle request failed"));
        assert!(!text.contains(SECRET));
    }

    #[tokio::test]
    async fn test_key_sent_in_header() {
        use axum::{http::{HeaderMap, Uri}, routing::post, Json, Router};

        async fn generate(headers: HeaderMap, uri: Uri) -> Json<serde_json::Value> {
            let header_ok = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) == Some(SECRET);
            let in_query = uri.query().is_some_and(|q| q.contains(SECRET));
            let text = if header_ok && !in_query { "ok" } else { "rejected" };
            Json(serde_json::json!({"candidates": [{"content": {"parts": [{"text": text}]}}]}))
        }

        let app = Router::new().route("/v1beta/models/:call", post(generate));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let oracle = GeminiOracle::new(&keyed_config(format!("http://{}/v1beta", addr))).unwrap();
        assert_eq!(oracle.complete("prompt").await.unwrap(), "ok");
    }

    #[test]
    fn test_endpoint_format() {
        let config = OracleConfig {
            base_url: "http://localhost:9999/v1beta/".to_string(),
            ..OracleConfig::default()
        };
        let oracle = GeminiOracle::new(&config).unwrap();
        assert_eq!(
            oracle.endpoint(),
            "http://localhost:9999/v1beta/models/gemini-pro:generateContent"
        );
    }

    #[test]
    fn test_response_envelope() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"{\"score\":10}"}]}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        let text = &parsed.candidates[0].content.as_ref().unwrap().parts[0].text;
        assert_eq!(text, "{\"score\":10}");
    }
}
