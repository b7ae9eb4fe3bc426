use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use ed25519_dalek::SigningKey;
use http_body_util::BodyExt;
use rand::rngs::OsRng;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

use lottery::auth::{new_claims, ADMIN_SCOPE, PARTICIPANT_SCOPE};
use lottery::{create_jwt, router, Authenticator, Database, LotteryApi, LotteryConfig};

const AUDIENCE: &str = "loto-645-api";

struct TestApp {
    app: Router,
    key: SigningKey,
}

impl TestApp {
    async fn new() -> Self {
        Self::with_rate_limit(100).await
    }

    async fn with_rate_limit(max_requests: u32) -> Self {
        let key = SigningKey::generate(&mut OsRng);
        let config = LotteryConfig {
            database_url: "sqlite::memory:".to_string(),
            base_url: "https://loto.example.com".to_string(),
            issuer_public_key: hex::encode(key.verifying_key().to_bytes()),
            rate_limit_max_requests: max_requests,
            ..Default::default()
        };
        let auth = Authenticator::new(&config.issuer_public_key, AUDIENCE).unwrap();
        let db = Arc::new(Database::in_memory().await.unwrap());
        let app = router(Arc::new(LotteryApi::new(db, config, auth)));
        Self { app, key }
    }

    fn token(&self, subject: &str, scope: &str) -> String {
        let mut claims = new_claims(subject, AUDIENCE, scope, 3600).unwrap();
        claims.name = Some("Test User".to_string());
        create_jwt(&self.key.to_bytes(), &claims).unwrap()
    }

    fn participant(&self) -> String {
        self.token("auth0|alice", PARTICIPANT_SCOPE)
    }

    fn machine(&self) -> String {
        self.token("draw-machine", ADMIN_SCOPE)
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, _, body) = self.send_raw(method, uri, token, body, None).await;
        (status, body)
    }

    async fn get_from(&self, uri: &str, peer: SocketAddr) -> (StatusCode, HeaderMap) {
        let (status, headers, _) = self.send_raw("GET", uri, None, None, Some(peer)).await;
        (status, headers)
    }

    async fn send_raw(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
        peer: Option<SocketAddr>,
    ) -> (StatusCode, HeaderMap, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(peer) = peer {
            builder = builder.extension(ConnectInfo(peer));
        }
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, value)
    }
}

#[tokio::test]
async fn test_status_without_rounds() {
    let app = TestApp::new().await;
    let (status, body) = app.send("GET", "/api/round/status", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"hasRound": false, "isActive": false, "ticketCount": 0, "drawnNumbers": null})
    );
}

#[tokio::test]
async fn test_admin_routes_require_machine_scope() {
    let app = TestApp::new().await;

    let (status, _) = app.send("POST", "/api/new-round", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let participant = app.participant();
    let (status, _) = app
        .send("POST", "/api/new-round", Some(&participant), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send("POST", "/api/close", Some("not-a-jwt"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_ticket_submission_over_http() {
    let app = TestApp::new().await;
    let machine = app.machine();
    let participant = app.participant();
    let ticket = json!({"idNumber": "X123", "numbers": [3, 7, 12, 19, 22, 31]});

    let (status, _) = app
        .send("POST", "/api/tickets", None, Some(ticket.clone()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .send("POST", "/api/tickets", Some(&participant), Some(ticket.clone()))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());

    for _ in 0..2 {
        let (status, _) = app.send("POST", "/api/new-round", Some(&machine), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    let (status, body) = app
        .send("POST", "/api/tickets", Some(&participant), Some(ticket.clone()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    let code = body["ticketCode"].as_str().unwrap().to_string();
    assert_eq!(
        body["receiptUrl"],
        json!(format!("https://loto.example.com/public/ticket/{}", code))
    );

    let (status, _) = app
        .send("POST", "/api/tickets", Some(&participant), Some(ticket))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .send(
            "POST",
            "/api/tickets",
            Some(&participant),
            Some(json!({"idNumber": "Y1", "numbers": [1, 2, 3, 4, 5, 46]})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(
            "POST",
            "/api/tickets",
            Some(&participant),
            Some(json!({"numbers": [1, 2, 3, 4, 5, 6]})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = app.send("GET", "/api/round/status", None, None).await;
    assert_eq!(body["isActive"], json!(true));
    assert_eq!(body["ticketCount"], json!(1));
}

#[tokio::test]
async fn test_results_over_http() {
    let app = TestApp::new().await;
    let machine = app.machine();
    let participant = app.participant();

    app.send("POST", "/api/new-round", Some(&machine), None).await;
    let (_, body) = app
        .send(
            "POST",
            "/api/tickets",
            Some(&participant),
            Some(json!({"idNumber": "X123", "numbers": [1, 2, 3, 4, 5, 6, 7]})),
        )
        .await;
    let code = body["ticketCode"].as_str().unwrap().to_string();
    let ticket_uri = format!("/public/ticket/{}", code);

    let draw = json!({"numbers": [1, 2, 3, 4, 5, 6, 40]});
    let (status, _) = app
        .send("POST", "/api/store-results", Some(&machine), Some(draw.clone()))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app.send("GET", &ticket_uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("pending"));
    assert_eq!(body["ticket"]["roundActive"], json!(true));

    let (status, _) = app.send("POST", "/api/close", Some(&machine), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .send(
            "POST",
            "/api/store-results",
            Some(&machine),
            Some(json!({"numbers": [5, 5]})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send("POST", "/api/store-results", Some(&machine), Some(draw.clone()))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .send("POST", "/api/store-results", Some(&machine), Some(draw))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app.send("GET", &ticket_uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("drawn"));
    assert_eq!(body["matches"], json!(6));
    assert_eq!(body["jackpot"], json!(false));
    assert_eq!(body["drawnNumbers"], json!([1, 2, 3, 4, 5, 6, 40]));

    let (status, body) = app.send("GET", "/public/ticket/unknown", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "notFound", "code": "unknown"}));
}

#[tokio::test]
async fn test_auth_user_and_health() {
    let app = TestApp::new().await;

    let (status, body) = app.send("GET", "/auth/user", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"authenticated": false}));

    let participant = app.participant();
    let (_, body) = app.send("GET", "/auth/user", Some(&participant), None).await;
    assert_eq!(body["authenticated"], json!(true));
    assert_eq!(body["user"]["id"], json!("auth0|alice"));
    assert_eq!(body["user"]["name"], json!("Test User"));

    let (status, body) = app.send("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
}

#[tokio::test]
async fn test_rate_limit_per_client() {
    let app = TestApp::with_rate_limit(3).await;
    let alice: SocketAddr = "203.0.113.7:50000".parse().unwrap();
    let bob: SocketAddr = "203.0.113.8:50000".parse().unwrap();

    for remaining in (0..3).rev() {
        let (status, headers) = app.get_from("/api/round/status", alice).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["ratelimit-limit"], "3");
        assert_eq!(headers["ratelimit-remaining"], remaining.to_string().as_str());
    }

    let (status, headers) = app.get_from("/public/ticket/abc", alice).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = headers[header::RETRY_AFTER].to_str().unwrap().parse().unwrap();
    assert!(retry_after > 0 && retry_after <= 900);
    assert_eq!(headers["x-content-type-options"], "nosniff");

    // another address still has its own budget
    let (status, _) = app.get_from("/api/round/status", bob).await;
    assert_eq!(status, StatusCode::OK);

    // health and metrics are not counted
    let (status, _) = app.get_from("/health", alice).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_security_headers() {
    let app = TestApp::new().await;
    for uri in ["/api/round/status", "/health", "/public/ticket/abc"] {
        let (_, headers, _) = app.send_raw("GET", uri, None, None, None).await;
        assert_eq!(headers["x-frame-options"], "SAMEORIGIN");
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["referrer-policy"], "no-referrer");
        assert!(headers
            .get("strict-transport-security")
            .is_some_and(|v| v.to_str().unwrap().starts_with("max-age=")));
        assert!(headers.contains_key("content-security-policy"));
    }
}
