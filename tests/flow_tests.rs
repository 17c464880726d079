//! End-to-end tests: router + signer + key manager against a mocked
//! authorization server.

use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;
use uma_resource_server::config::{Config, StoreConfig};
use uma_resource_server::keys::SigningAlgorithm;
use uma_resource_server::server::{RegistrationOutcome, ResourceServer};
use uma_resource_server::signing::parse_signature_input;
use wiremock::matchers::{body_string, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BASE_URL: &str = "http://rs.test";

// ============================================================================
// Helpers
// ============================================================================

/// Mock authorization server advertising all three endpoints.
async fn auth_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/uma2-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": server.uri(),
            "permission_endpoint": format!("{}/ticket", server.uri()),
            "introspection_endpoint": format!("{}/introspect", server.uri()),
            "resource_registration_endpoint": format!("{}/resources", server.uri()),
        })))
        .mount(&server)
        .await;
    server
}

async fn mount_registration(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/resources"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "_id": "res-1" })))
        .mount(server)
        .await;
}

async fn mount_ticket(server: &MockServer, ticket: &str) {
    Mock::given(method("POST"))
        .and(path("/ticket"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "ticket": ticket })))
        .mount(server)
        .await;
}

async fn mount_introspection(server: &MockServer, token: &str, active: bool) {
    Mock::given(method("POST"))
        .and(path("/introspect"))
        .and(body_string(format!("token_type_hint=access_token&token={token}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "active": active })))
        .mount(server)
        .await;
}

fn config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.server.base_url = Some(BASE_URL.to_string());
    config.uma.auth_server = server.uri();
    config.uma.timeout = Duration::from_secs(5);
    config
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, String::from_utf8(body.to_vec()).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn get_with_token(uri: &str, token: &str) -> Request<Body> {
    Request::get(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri).body(Body::from(body.to_string())).unwrap()
}

// ============================================================================
// Read / write contract
// ============================================================================

#[tokio::test]
async fn write_challenge_then_authorized_read() {
    // GIVEN: an authorization server issuing ticket T and accepting token X
    let server = auth_server().await;
    mount_registration(&server).await;
    mount_ticket(&server, "T").await;
    mount_introspection(&server, "X", true).await;
    let rs = ResourceServer::new(config(&server)).unwrap();
    let app = rs.router();

    // WHEN: "hello" is written to /r1
    let (status, _, body) = send(&app, post("/r1", "hello")).await;

    // THEN: 204 with no body
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_empty());

    // WHEN: /r1 is read without a token
    let (status, headers, body) = send(&app, get("/r1")).await;

    // THEN: 401 with a challenge carrying the ticket
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, "401 Unauthenticated");
    assert_eq!(
        headers[header::WWW_AUTHENTICATE].to_str().unwrap(),
        format!("UMA realm=\"solid\",as_uri=\"{}\",ticket=\"T\"", server.uri())
    );

    // WHEN: /r1 is read with an active token
    let (status, _, body) = send(&app, get_with_token("/r1", "X")).await;

    // THEN: the stored content comes back
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hello");
}

#[tokio::test]
async fn ticket_is_requested_for_full_resource_uri() {
    let server = auth_server().await;
    Mock::given(method("POST"))
        .and(path("/ticket"))
        .and(wiremock::matchers::body_json(json!([{
            "resource_id": "http://rs.test/notes/2024/a.txt",
            "resource_scopes": ["urn:example:css:modes:read"]
        }])))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "ticket": "T2" })))
        .expect(1)
        .mount(&server)
        .await;
    let app = ResourceServer::new(config(&server)).unwrap().router();

    let (status, headers, _) = send(&app, get("/notes/2024/a.txt")).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(
        headers[header::WWW_AUTHENTICATE]
            .to_str()
            .unwrap()
            .ends_with("ticket=\"T2\"")
    );
}

#[tokio::test]
async fn inactive_token_is_forbidden() {
    let server = auth_server().await;
    mount_registration(&server).await;
    mount_introspection(&server, "expired", false).await;
    let app = ResourceServer::new(config(&server)).unwrap().router();

    send(&app, post("/r1", "hello")).await;
    let (status, _, body) = send(&app, get_with_token("/r1", "expired")).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(!body.contains("hello"));
}

#[tokio::test]
async fn valid_token_for_unknown_resource_is_not_found() {
    let server = auth_server().await;
    mount_introspection(&server, "X", true).await;
    let app = ResourceServer::new(config(&server)).unwrap().router();

    let (status, _, _) = send(&app, get_with_token("/nothing-here", "X")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_write_keeps_first_content() {
    let server = auth_server().await;
    mount_registration(&server).await;
    mount_introspection(&server, "X", true).await;
    let app = ResourceServer::new(config(&server)).unwrap().router();

    let (first, _, _) = send(&app, post("/r1", "hello")).await;
    let (second, _, body) = send(&app, post("/r1", "overwrite")).await;

    assert_eq!(first, StatusCode::NO_CONTENT);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(body, "Resource already exists at http://rs.test/r1");

    let (_, _, content) = send(&app, get_with_token("/r1", "X")).await;
    assert_eq!(content, "hello");
}

#[tokio::test]
async fn concurrent_writes_have_one_winner() {
    let server = auth_server().await;
    mount_registration(&server).await;
    let app = ResourceServer::new(config(&server)).unwrap().router();

    let mut handles = Vec::new();
    for i in 0..8 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            send(&app, post("/contended", &format!("writer-{i}"))).await.0
        }));
    }
    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap() == StatusCode::NO_CONTENT {
            created += 1;
        }
    }
    assert_eq!(created, 1);
}

#[tokio::test]
async fn introspection_outage_is_bad_gateway() {
    let server = auth_server().await;
    Mock::given(method("POST"))
        .and(path("/introspect"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;
    let app = ResourceServer::new(config(&server)).unwrap().router();

    let (status, _, _) = send(&app, get_with_token("/r1", "X")).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn missing_permission_endpoint_is_bad_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/uma2-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "introspection_endpoint": format!("{}/introspect", server.uri())
        })))
        .mount(&server)
        .await;
    let app = ResourceServer::new(config(&server)).unwrap().router();

    let (status, headers, _) = send(&app, get("/r1")).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(headers.get(header::WWW_AUTHENTICATE).is_none());
}

#[tokio::test]
async fn introspection_timeout_is_bad_gateway() {
    let server = auth_server().await;
    Mock::given(method("POST"))
        .and(path("/introspect"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "active": true }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    let mut config = config(&server);
    config.uma.timeout = Duration::from_millis(300);
    let app = ResourceServer::new(config).unwrap().router();

    let (status, _, _) = send(&app, get_with_token("/r1", "X")).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn registration_failure_does_not_affect_writer() {
    let server = auth_server().await;
    Mock::given(method("POST"))
        .and(path("/resources"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;
    mount_introspection(&server, "X", true).await;
    let rs = ResourceServer::new(config(&server)).unwrap();
    let mut outcomes = rs.flow().subscribe_registrations();
    let app = rs.router();

    let (status, _, _) = send(&app, post("/r1", "hello")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let outcome = tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, RegistrationOutcome::Failed { .. }));

    let (_, _, body) = send(&app, get_with_token("/r1", "X")).await;
    assert_eq!(body, "hello");
}

#[tokio::test]
async fn registration_timeout_is_reported_as_failure() {
    let server = auth_server().await;
    Mock::given(method("POST"))
        .and(path("/resources"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({ "_id": "res-1" }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    let mut config = config(&server);
    config.uma.timeout = Duration::from_millis(300);
    let rs = ResourceServer::new(config).unwrap();
    let mut outcomes = rs.flow().subscribe_registrations();

    let (status, _, _) = send(&rs.router(), post("/r1", "hello")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let outcome = tokio::time::timeout(Duration::from_secs(2), outcomes.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        outcome,
        RegistrationOutcome::Failed { ref resource, .. } if resource == "http://rs.test/r1"
    ));
}

#[tokio::test]
async fn registration_is_signed_and_reports_id() {
    let server = auth_server().await;
    mount_registration(&server).await;
    let rs = ResourceServer::new(config(&server)).unwrap();
    let mut outcomes = rs.flow().subscribe_registrations();

    send(&rs.router(), post("/r1", "hello")).await;

    let outcome = tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        outcome,
        RegistrationOutcome::Registered {
            resource: "http://rs.test/r1".to_string(),
            id: "res-1".to_string(),
        }
    );

    let requests = server.received_requests().await.unwrap();
    let registration = requests
        .iter()
        .find(|r| r.url.path() == "/resources")
        .unwrap();
    assert_eq!(
        registration.headers["authorization"].to_str().unwrap(),
        "HttpSig cred=\"http://rs.test\""
    );
    assert!(registration.headers.contains_key("content-digest"));
}

// ============================================================================
// Keys
// ============================================================================

#[tokio::test]
async fn signature_keyid_matches_published_kid() {
    let server = auth_server().await;
    mount_ticket(&server, "T").await;
    let app = ResourceServer::new(config(&server)).unwrap().router();

    send(&app, get("/r1")).await;
    let (status, _, jwks) = send(&app, get("/.well-known/jwks.json")).await;
    assert_eq!(status, StatusCode::OK);
    let jwks: Value = serde_json::from_str(&jwks).unwrap();

    let requests = server.received_requests().await.unwrap();
    let ticket_request = requests.iter().find(|r| r.url.path() == "/ticket").unwrap();
    let input = ticket_request.headers["signature-input"].to_str().unwrap();
    let (_, params) = parse_signature_input(input).unwrap();

    assert_eq!(params.keyid, jwks["keys"][0]["kid"].as_str().unwrap());
    assert_eq!(params.alg, "ecdsa-p256-sha256");
    assert!(ticket_request.headers.contains_key("signature"));
}

#[tokio::test]
async fn unsupported_algorithm_fails_ticket_request() {
    let server = auth_server().await;
    mount_ticket(&server, "T").await;
    let mut config = config(&server);
    config.keys.algorithm = SigningAlgorithm::EdDsa;
    let app = ResourceServer::new(config).unwrap().router();

    let (status, _, _) = send(&app, get("/r1")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.url.path() != "/ticket"));

    // The key is still published
    let (status, _, jwks) = send(&app, get("/.well-known/jwks.json")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(jwks.contains("\"EdDSA\""));
}

#[tokio::test]
async fn restart_with_file_store_keeps_public_key() {
    let server = auth_server().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&server);
    config.keys.store = StoreConfig::File {
        path: dir.path().to_path_buf(),
    };

    let first = {
        let app = ResourceServer::new(config.clone()).unwrap().router();
        send(&app, get("/.well-known/jwks.json")).await.2
    };
    let rs = ResourceServer::new(config).unwrap();
    let second = send(&rs.router(), get("/.well-known/jwks.json")).await.2;

    assert_eq!(first, second);
    assert_eq!(rs.keys().generated_keys(), 0);
}

#[tokio::test]
async fn concurrent_first_jwks_requests_see_one_key() {
    let server = auth_server().await;
    let app = ResourceServer::new(config(&server)).unwrap().router();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            send(&app, get("/.well-known/jwks.json")).await.2
        }));
    }
    let mut bodies = Vec::new();
    for handle in handles {
        bodies.push(handle.await.unwrap());
    }
    assert!(bodies.iter().all(|b| b == &bodies[0]));
}
