//! HTTP-level tests for the relay endpoints.

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use mediamesh_core::relay::{Fact, FactId, FactMetadata, PullResponse, RelayLog};
use mediamesh_relay::{RelayState, relay_router};
use serde_json::{Value, json};
use tower::ServiceExt;

fn fact(namespace: &str, key: &str, sequence: u64) -> Fact {
    Fact {
        namespace: namespace.to_string(),
        key: key.to_string(),
        value: json!({ "id": key, "title": format!("Title {sequence}") }),
        metadata: FactMetadata {
            fact_id: FactId {
                origin: "peer-a".to_string(),
                sequence,
            },
            published_at: 1_700_000_000_000,
        },
    }
}

fn push_request(fact: &Fact) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/gun/facts")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(fact).unwrap()))
        .unwrap()
}

fn pull_request(query: &str) -> Request<Body> {
    Request::builder()
        .uri(format!("/gun/facts?{query}"))
        .body(Body::empty())
        .unwrap()
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_reports_ok() {
    let app = relay_router(RelayState::new(Arc::new(RelayLog::new())));

    for path in ["/", "/health", "/gun/health"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: Value = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "Mediamesh Relay");
        assert!(body["uptime"].is_number());
    }
}

#[tokio::test]
async fn test_pushed_fact_is_pulled_back() {
    let log = Arc::new(RelayLog::new());
    let app = relay_router(RelayState::new(log.clone()));

    let response = app
        .clone()
        .oneshot(push_request(&fact("catalog", "m1", 1)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = body_json(response).await;
    assert_eq!(body["cursor"], 1);

    let response = app
        .oneshot(pull_request("namespace=catalog&after=0"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let pulled: PullResponse = body_json(response).await;
    assert_eq!(pulled.facts.len(), 1);
    assert_eq!(pulled.facts[0].fact, fact("catalog", "m1", 1));
    assert_eq!(pulled.epoch, log.epoch());
    assert_eq!(log.key_count("catalog"), 1);
}

#[tokio::test]
async fn test_pull_is_scoped_to_namespace_and_cursor() {
    let app = relay_router(RelayState::new(Arc::new(RelayLog::new())));

    for (namespace, key, sequence) in [("catalog", "m1", 1), ("other", "x", 2), ("catalog", "m2", 3)] {
        app.clone()
            .oneshot(push_request(&fact(namespace, key, sequence)))
            .await
            .unwrap();
    }

    let response = app
        .clone()
        .oneshot(pull_request("namespace=catalog"))
        .await
        .unwrap();
    let pulled: PullResponse = body_json(response).await;
    let keys: Vec<_> = pulled.facts.iter().map(|f| f.fact.key.as_str()).collect();
    assert_eq!(keys, vec!["m1", "m2"]);

    let first_cursor = pulled.facts[0].cursor;
    let response = app
        .oneshot(pull_request(&format!("namespace=catalog&after={first_cursor}")))
        .await
        .unwrap();
    let pulled: PullResponse = body_json(response).await;
    assert_eq!(pulled.facts.len(), 1);
    assert_eq!(pulled.facts[0].fact.key, "m2");
}

#[tokio::test]
async fn test_long_poll_returns_empty_after_wait() {
    let app = relay_router(RelayState::new(Arc::new(RelayLog::new())));

    let response = app
        .oneshot(pull_request("namespace=catalog&after=0&wait_ms=20"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let pulled: PullResponse = body_json(response).await;
    assert!(pulled.facts.is_empty());
}

#[tokio::test]
async fn test_long_poll_wakes_on_push() {
    let log = Arc::new(RelayLog::new());
    let app = relay_router(RelayState::new(log.clone()));

    let waiter = tokio::spawn(
        app.clone()
            .oneshot(pull_request("namespace=catalog&after=0&wait_ms=5000")),
    );
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    log.append(fact("catalog", "m1", 1));

    let response = waiter.await.unwrap().unwrap();
    let pulled: PullResponse = body_json(response).await;
    assert_eq!(pulled.facts.len(), 1);
}

#[tokio::test]
async fn test_fact_without_key_is_rejected() {
    let log = Arc::new(RelayLog::new());
    let app = relay_router(RelayState::new(log.clone()));

    let response = app
        .oneshot(push_request(&fact("catalog", "", 1)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(log.last_cursor(), 0);
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let app = relay_router(RelayState::new(Arc::new(RelayLog::new())));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/gun/facts")
                .header("content-type", "application/json")
                .body(Body::from("{\"namespace\":\"catalog\"}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}
