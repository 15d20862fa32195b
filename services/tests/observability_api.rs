//! Component upserts and their effect on `/health`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::Harness;
use serde_json::json;
use service_spine_testing::{TestRequest, error_code};

fn upsert(name: &str, idempotency_key: &str, body: &serde_json::Value) -> TestRequest {
    TestRequest::put(format!("/api/v1/observability/components/{name}"))
        .bearer("ops")
        .role("admin")
        .idempotency_key(idempotency_key)
        .json(body)
}

#[tokio::test]
async fn test_degraded_critical_component_makes_service_unhealthy() {
    let app = Harness::new();

    let reply = app
        .send(
            upsert(
                "database",
                "idem-comp-2",
                &json!({"status": "degraded", "latency_ms": 5000}),
            )
            .build(),
        )
        .await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.data()["name"], "database");
    assert_eq!(reply.data()["critical"], true);
    assert_eq!(reply.data()["updated_by"], "ops");

    let health = app.send(TestRequest::get("/health").build()).await;
    assert_eq!(health.status, 503);
    let report = health.json();
    assert_eq!(report["status"], "unhealthy");
    assert_eq!(report["checks"]["database"]["status"], "degraded");
    assert_eq!(report["checks"]["database"]["latency_ms"], 5000);
}

#[tokio::test]
async fn test_non_critical_failure_keeps_service_healthy() {
    let app = Harness::new();
    app.send(
        upsert(
            "search",
            "idem-1",
            &json!({"status": "unhealthy", "latency_ms": 10, "critical": false, "message": "reindexing"}),
        )
        .build(),
    )
    .await;

    let health = app.send(TestRequest::get("/health").build()).await;
    assert_eq!(health.status, 200);
    assert_eq!(health.json()["checks"]["search"]["message"], "reindexing");
}

#[tokio::test]
async fn test_upsert_validation() {
    let app = Harness::new();

    let bad_status = app
        .send(upsert("db", "idem-a", &json!({"status": "sideways"})).build())
        .await;
    assert_eq!(bad_status.status, 400);
    assert_eq!(error_code(&bad_status.json()), Some("invalid_input"));

    let negative_latency = app
        .send(upsert("db", "idem-b", &json!({"status": "healthy", "latency_ms": -1})).build())
        .await;
    assert_eq!(error_code(&negative_latency.json()), Some("invalid_input"));

    let long_message = app
        .send(
            upsert("db", "idem-c", &json!({"status": "healthy", "message": "m".repeat(513)}))
                .build(),
        )
        .await;
    assert_eq!(error_code(&long_message.json()), Some("invalid_input"));
}

#[tokio::test]
async fn test_only_admin_may_write() {
    let app = Harness::new();
    let reply = app
        .send(
            TestRequest::put("/api/v1/observability/components/db")
                .bearer("someone")
                .idempotency_key("idem-1")
                .json(&json!({"status": "healthy"}))
                .build(),
        )
        .await;
    assert_eq!(reply.status, 403);

    let delete = app
        .send(
            TestRequest::delete("/api/v1/observability/components/db")
                .bearer("someone")
                .build(),
        )
        .await;
    assert_eq!(delete.status, 403);
}

#[tokio::test]
async fn test_names_are_normalized_and_listed_in_order() {
    let app = Harness::new();
    app.send(upsert("Queue", "idem-1", &json!({"status": "healthy"})).build()).await;
    app.send(upsert("cache", "idem-2", &json!({"status": "healthy"})).build()).await;

    let list = app
        .send(
            TestRequest::get("/api/v1/observability/components")
                .bearer("viewer")
                .build(),
        )
        .await;
    let names: Vec<String> = list
        .data()
        .as_array()
        .unwrap()
        .iter()
        .map(|component| component["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["cache", "queue"]);

    let removed = app
        .send(
            TestRequest::delete("/api/v1/observability/components/QUEUE")
                .bearer("ops")
                .role("admin")
                .build(),
        )
        .await;
    assert_eq!(removed.status, 200);

    let again = app
        .send(
            TestRequest::delete("/api/v1/observability/components/queue")
                .bearer("ops")
                .role("admin")
                .build(),
        )
        .await;
    assert_eq!(again.status, 404);
}
