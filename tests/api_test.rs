//! REST API tests through the full router (middleware included)

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use stacksguard::api::{create_router, AppState};
use stacksguard::core::{GuardService, PatternAnalyzer, QueryGateway, ReputationRegistry};
use stacksguard::models::AuditorKeys;
use stacksguard::providers::{ScriptedOracle, ScriptedReply};
use stacksguard::{GuardTelemetry, VerdictCache};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const MALICIOUS: &str = r#"
(define-fungible-token malicious-token)

(define-public (transfer-from (sender principal) (recipient principal) (amount uint))
  (begin
    (as-contract (stx-transfer? u1000000 'ST1VAULT tx-sender))
    (ok true)))

(define-public (mint (amount uint) (recipient principal))
  (ft-mint? malicious-token amount recipient))
"#;

const ALICE_KEY: &str = "sk_alice_0123456789abcdef";
const BOB_KEY: &str = "sk_bob_0123456789abcdef";

const SAFE: &str = r#"
(define-read-only (get-name) (ok "Safe Token"))
"#;

fn app(oracle: ScriptedOracle) -> Router {
    let analyzer = PatternAnalyzer::new(Arc::new(oracle)).with_timeout(Duration::from_millis(300));
    let registry = Arc::new(ReputationRegistry::default());
    let service = Arc::new(GuardService::new(
        analyzer,
        registry.clone(),
        VerdictCache::new(),
        Arc::new(GuardTelemetry::new()),
    ));
    let gateway = Arc::new(QueryGateway::new(registry));
    let keys = AuditorKeys::from_pairs([("alice", ALICE_KEY), ("bob", BOB_KEY)]).unwrap();
    create_router(Arc::new(AppState::new(service, gateway).with_auditor_keys(keys)))
}

struct Client {
    app: Router,
    ip: &'static str,
}

impl Client {
    fn new(oracle: ScriptedOracle, ip: &'static str) -> Self {
        Self { app: app(oracle), ip }
    }

    async fn send(&self, method: &str, uri: &str, body: Option<Value>, key: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-real-ip", self.ip)
            .header("content-type", "application/json");
        if let Some(key) = key {
            builder = builder.header("x-api-key", key);
        }
        let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
        let response = self.app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();

        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send("GET", uri, None, None).await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send("POST", uri, Some(body), None).await
    }
}

#[tokio::test]
async fn test_health() {
    let client = Client::new(ScriptedOracle::verdict(0, &[], ""), "10.0.0.1");
    for path in ["/health", "/v1/health"] {
        let (status, body) = client.get(path).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "healthy");
        assert_eq!(body["data"]["query_source"], "local-registry");
    }
}

#[tokio::test]
async fn test_analyze_malicious_contract() {
    let oracle = ScriptedOracle::verdict(97, &["as-contract abuse", "Hidden fee switch"], "Drains the vault");
    let client = Client::new(oracle, "10.0.0.2");

    let (status, body) = client.post("/v1/analyze", json!({"contractCode": MALICIOUS})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let data = &body["data"];
    assert_eq!(data["score"], 100);
    assert_eq!(data["recommendation"], "HIGH RISK");
    assert_eq!(data["oracle_score"], 97);
    assert_eq!(data["findings"][0]["signature"], "self-impersonation");
    assert_eq!(data["findings"][0]["severity"], "critical");
    assert_eq!(data["breakdown"][0]["name"], data["findings"][0]["name"]);
    assert_eq!(data["breakdown"][0]["weight"], 40);

    let threats: Vec<&str> = data["threats"].as_array().unwrap().iter().filter_map(|t| t.as_str()).collect();
    assert!(threats.contains(&"Hidden fee switch"));
    assert!(data["reasoning"].as_str().unwrap().contains("Drains the vault"));
}

#[tokio::test]
async fn test_analyze_empty_input() {
    let client = Client::new(ScriptedOracle::verdict(0, &[], ""), "10.0.0.3");
    let (status, body) = client.post("/v1/analyze", json!({"contractCode": "  \n "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "ANALYSIS_EMPTY_INPUT");
    assert!(body.get("status").is_none());
}

#[tokio::test]
async fn test_oracle_outage_is_incomplete_not_scored() {
    let oracle = ScriptedOracle::new([ScriptedReply::Fail("connection refused".to_string())]);
    let client = Client::new(oracle, "10.0.0.4");

    let (status, body) = client
        .post("/v1/contracts/SP1.victim/analyze", json!({"contractCode": SAFE}))
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "analysis_incomplete");
    assert_eq!(body["error"]["code"], "ANALYSIS_UNAVAILABLE");
    assert_eq!(body["error"]["retryable"], true);
    assert!(body.get("data").is_none());

    // Nothing was recorded
    let (status, body) = client.get("/v1/contracts/SP1.victim").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "REGISTRY_NOT_FOUND");
}

#[tokio::test]
async fn test_malformed_reply_is_incomplete() {
    let client = Client::new(ScriptedOracle::always("I think it is probably fine"), "10.0.0.5");
    let (status, body) = client.post("/v1/analyze", json!({"contract_code": SAFE})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "analysis_incomplete");
    assert_eq!(body["error"]["code"], "ANALYSIS_MALFORMED_VERDICT");
}

#[tokio::test]
async fn test_record_and_query() {
    let client = Client::new(ScriptedOracle::verdict(90, &[], "bad"), "10.0.0.6");
    let uri = "/v1/contracts/SP1.malicious-token";

    let (status, body) = client
        .post(&format!("{}/analyze", uri), json!({"contractCode": MALICIOUS}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["record"]["provenance"], "ai");
    assert_eq!(body["data"]["record"]["sequence"], 0);
    assert_eq!(body["data"]["is_flagged"], true);

    let (status, body) = client.get(uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["current_score"], 100);
    assert_eq!(body["data"]["history_len"], 1);

    let (_, body) = client.get(&format!("{}/score", uri)).await;
    assert_eq!(body["data"]["status"], "scored");
    assert_eq!(body["data"]["score"], 100);

    let (_, body) = client.get(&format!("{}/flagged", uri)).await;
    assert_eq!(body["data"]["status"], "flagged");
    assert_eq!(body["data"]["is_flagged"], true);

    let (_, body) = client.get(&format!("{}/history", uri)).await;
    assert_eq!(body["data"]["reports"][0]["auditor"], "ai");
    assert_eq!(body["data"]["reports"][0]["threatLevel"], "HIGH RISK");

    let (_, body) = client.get("/v1/stats").await;
    assert_eq!(body["data"]["registry_entries"], 1);
    assert_eq!(body["data"]["flagged_entries"], 1);
    assert_eq!(body["data"]["telemetry"]["verdicts"], 1);
}

#[tokio::test]
async fn test_unscored_identity_modes() {
    let client = Client::new(ScriptedOracle::verdict(0, &[], ""), "10.0.0.7");

    let (_, body) = client.get("/v1/contracts/SP1.fresh/score").await;
    assert_eq!(body["data"]["status"], "unscored");
    assert_eq!(body["data"]["score"], 0);

    let (_, body) = client.get("/v1/contracts/SP1.fresh/flagged").await;
    assert_eq!(body["data"]["status"], "unscored");
    assert_eq!(body["data"]["is_flagged"], false);

    let (_, body) = client.get("/v1/contracts/SP1.fresh/flagged?mode=conservative").await;
    assert_eq!(body["data"]["mode"], "conservative");
    assert_eq!(body["data"]["is_flagged"], true);

    let (status, body) = client.get("/v1/contracts/SP1.fresh/flagged?mode=strict").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "API_BAD_REQUEST");

    let (_, body) = client.get("/v1/contracts/SP1.fresh/history").await;
    assert_eq!(body["data"]["reports"], json!([]));
}

#[tokio::test]
async fn test_human_audits() {
    let client = Client::new(ScriptedOracle::verdict(0, &[], ""), "10.0.0.8");
    let uri = "/v1/contracts/SP1.rescued/audits";
    let override_body = json!({
        "auditorId": "alice",
        "kind": "critical_override",
        "score": 92,
        "threats": ["unauthorized mint"],
        "notes": "rug in progress"
    });

    // Audit writes need a key
    let (status, body) = client.post(uri, override_body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "API_UNAUTHORIZED");

    let (status, body) = client.send("POST", uri, Some(override_body), Some(ALICE_KEY)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["record"]["provenance"], "human-auditor:alice");
    assert_eq!(body["data"]["record"]["kind"], "critical_override");
    assert_eq!(body["data"]["current_score"], 95);
    assert_eq!(body["data"]["is_flagged"], true);

    // Provenance follows the key when the body names no auditor
    let clear = json!({"kind": "clear", "score": 5});
    let (_, body) = client.send("POST", uri, Some(clear), Some(BOB_KEY)).await;
    assert_eq!(body["data"]["record"]["provenance"], "human-auditor:bob");
    assert_eq!(body["data"]["current_score"], 5);
    assert_eq!(body["data"]["is_flagged"], false);

    let bad = json!({"score": 150});
    let (status, _) = client.send("POST", uri, Some(bad), Some(ALICE_KEY)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_keys_cannot_clear() {
    let client = Client::new(ScriptedOracle::verdict(0, &[], ""), "10.0.0.10");
    let uri = "/v1/contracts/SP1.flagged";
    let override_body = json!({"kind": "critical_override", "score": 90});
    let (status, _) = client
        .send("POST", &format!("{}/audits", uri), Some(override_body), Some(ALICE_KEY))
        .await;
    assert_eq!(status, StatusCode::OK);

    let clear = json!({"auditorId": "x", "kind": "clear", "score": 0});
    for key in ["demo", "pk_live_0123456789abcdef", "sk_unknown_0123456789abcdef", "sk_"] {
        let (status, body) = client
            .send("POST", &format!("{}/audits", uri), Some(clear.clone()), Some(key))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "key {} accepted", key);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "API_UNAUTHORIZED");
    }

    // Still flagged, and only the override was recorded
    let (_, body) = client.get(uri).await;
    assert_eq!(body["data"]["current_score"], 95);
    assert_eq!(body["data"]["is_flagged"], true);
    assert_eq!(body["data"]["history_len"], 1);
}

#[tokio::test]
async fn test_auditor_id_must_match_key() {
    let client = Client::new(ScriptedOracle::verdict(0, &[], ""), "10.0.0.11");
    let uri = "/v1/contracts/SP1.tok/audits";
    let spoofed = json!({"auditorId": "bob", "kind": "clear", "score": 0});
    let (status, body) = client.send("POST", uri, Some(spoofed), Some(ALICE_KEY)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "API_BAD_REQUEST");

    let (status, _) = client.get("/v1/contracts/SP1.tok").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_key_on_read_route() {
    let client = Client::new(ScriptedOracle::verdict(0, &[], ""), "10.0.0.12");
    let (status, body) = client.send("GET", "/v1/stats", None, Some("demo")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "API_UNAUTHORIZED");

    let (status, _) = client.send("GET", "/v1/stats", None, Some(ALICE_KEY)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_envelope() {
    let client = Client::new(ScriptedOracle::verdict(0, &[], ""), "10.0.0.13");
    let mut last = (StatusCode::OK, Value::Null);
    for _ in 0..101 {
        last = client.get("/v1/stats").await;
    }
    assert_eq!(last.0, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(last.1["error"]["code"], "API_RATE_LIMITED");
    assert_eq!(last.1["error"]["retryable"], true);
}

#[tokio::test]
async fn test_deeply_nested_source_is_analyzed() {
    let client = Client::new(ScriptedOracle::verdict(10, &[], "odd but harmless"), "10.0.0.14");
    let depth = 100_000;
    let source = format!("(define-public (f) {}(ok true){})", "(".repeat(depth), ")".repeat(depth));

    let (status, body) = client.post("/v1/analyze", json!({"contractCode": source})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn test_invalid_identity() {
    let client = Client::new(ScriptedOracle::verdict(0, &[], ""), "10.0.0.9");
    let (status, body) = client.get("/v1/contracts/SP1.na$me/score").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "IDENTITY_INVALID");
}
