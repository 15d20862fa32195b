//! Migration plans and runs.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::Harness;
use serde_json::json;
use service_spine_testing::{TestRequest, error_code};

fn create_plan(idempotency_key: &str) -> TestRequest {
    TestRequest::post("/plans")
        .bearer("operator")
        .role("migration_operator")
        .idempotency_key(idempotency_key)
        .json(&json!({
            "name": "orders backfill",
            "source": "pg://legacy",
            "target": "pg://orders",
            "steps": ["copy", "verify"],
        }))
}

fn create_run(plan_id: &str, key: &str) -> TestRequest {
    TestRequest::post("/runs")
        .bearer("operator")
        .role("migration_operator")
        .idempotency_key(key)
        .json(&json!({"plan_id": plan_id}))
}

async fn plan_id(app: &Harness) -> String {
    let reply = app.send(create_plan("idem-plan").build()).await;
    assert_eq!(reply.status, 201);
    reply.data()["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_run_requires_mfa() {
    let app = Harness::new();
    let plan_id = plan_id(&app).await;

    let without_mfa = app.send(create_run(&plan_id, "idem-run").build()).await;
    assert_eq!(without_mfa.status, 403);
    assert_eq!(error_code(&without_mfa.json()), Some("forbidden"));

    let with_mfa = app.send(create_run(&plan_id, "idem-run").mfa().build()).await;
    assert_eq!(with_mfa.status, 201);
    assert_eq!(with_mfa.data()["status"], "queued");
    assert_eq!(with_mfa.data()["plan_id"], plan_id.as_str());

    let run_id = with_mfa.data()["id"].as_str().unwrap().to_string();
    let fetched = app
        .send(TestRequest::get(format!("/runs/{run_id}")).bearer("viewer").build())
        .await;
    assert_eq!(fetched.status, 200);
    assert_eq!(fetched.data(), with_mfa.data());
}

#[tokio::test]
async fn test_admin_cannot_run_but_can_plan() {
    let app = Harness::new();
    let admin_plan = app
        .send(
            TestRequest::post("/plans")
                .bearer("root")
                .role("admin")
                .idempotency_key("idem-2")
                .json(&json!({"name": "n", "source": "s", "target": "t", "steps": ["x"]}))
                .build(),
        )
        .await;
    assert_eq!(admin_plan.status, 201);

    let plan_id = admin_plan.data()["id"].as_str().unwrap().to_string();
    let admin_run = app
        .send(
            TestRequest::post("/runs")
                .bearer("root")
                .role("admin")
                .mfa()
                .idempotency_key("idem-3")
                .json(&json!({"plan_id": plan_id}))
                .build(),
        )
        .await;
    assert_eq!(admin_run.status, 403);
}

#[tokio::test]
async fn test_run_for_unknown_plan_is_not_found() {
    let app = Harness::new();
    let reply = app.send(create_run("plan_missing", "idem-run").mfa().build()).await;
    assert_eq!(reply.status, 404);
    assert_eq!(error_code(&reply.json()), Some("not_found"));

    // The key was not bound to the failed request.
    let plan_id = plan_id(&app).await;
    let retry = app.send(create_run(&plan_id, "idem-run").mfa().build()).await;
    assert_eq!(retry.status, 201);
}

#[tokio::test]
async fn test_plan_validation() {
    let app = Harness::new();
    let reply = app
        .send(
            TestRequest::post("/plans")
                .bearer("operator")
                .role("migration_operator")
                .idempotency_key("idem-1")
                .json(&json!({"name": "n", "source": "s", "target": "t", "steps": []}))
                .build(),
        )
        .await;
    assert_eq!(reply.status, 400);
    assert_eq!(error_code(&reply.json()), Some("invalid_input"));
}

#[tokio::test]
async fn test_plans_listed_in_creation_order() {
    let app = Harness::new();
    let first = plan_id(&app).await;
    let second = app.send(create_plan("idem-other").build()).await;
    let second = second.data()["id"].as_str().unwrap().to_string();

    let list = app.send(TestRequest::get("/plans").bearer("viewer").build()).await;
    let ids: Vec<String> = list
        .data()
        .as_array()
        .unwrap()
        .iter()
        .map(|plan| plan["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec![first, second]);
}

#[tokio::test]
async fn test_rollback_is_gone() {
    let app = Harness::new();
    let reply = app
        .send(
            TestRequest::post("/runs/run_1/rollback")
                .bearer("operator")
                .role("migration_operator")
                .build(),
        )
        .await;
    assert_eq!(reply.status, 410);
    assert_eq!(error_code(&reply.json()), Some("gone"));
}
