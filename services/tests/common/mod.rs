//! Shared harness: every domain service mounted on one in-process router.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use serde_json::Value;
use service_spine_runtime::Config;
use service_spine_services::{CacheService, Context, MigrationService, ObservabilityService, WebhookService};
use service_spine_testing::{MockClock, SequentialIdGenerator, init_test_tracing, read_body};
use service_spine_web::ServiceHost;
use std::sync::Arc;
use tower::ServiceExt;

/// A response split into the parts tests look at.
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub bytes: Bytes,
}

impl Reply {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.bytes).unwrap_or(Value::Null)
    }

    pub fn data(&self) -> Value {
        self.json()["data"].clone()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

pub struct Harness {
    pub router: Router,
    pub clock: MockClock,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        init_test_tracing();
        let clock = MockClock::default();
        let ctx = Context::new(
            config.clone(),
            Arc::new(clock.clone()),
            Arc::new(SequentialIdGenerator::new()),
        );
        let router = ServiceHost::new(config, Arc::new(clock.clone()))
            .mount(CacheService::in_memory(&ctx))
            .mount(ObservabilityService::in_memory(&ctx))
            .mount(WebhookService::in_memory(&ctx))
            .mount(MigrationService::in_memory(&ctx))
            .router();
        Self { router, clock }
    }

    pub async fn send(&self, request: Request<Body>) -> Reply {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = read_body(response).await;
        Reply {
            status,
            headers,
            bytes,
        }
    }
}
