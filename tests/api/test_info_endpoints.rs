// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Root, health and supported-formats endpoints

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
};
use rag_extract::{
    api::{build_router, AppState},
    config::ExtractionConfig,
    fetch::StaticResolver,
    version, ExtractionService,
};
use serde_json::Value;
use tower::util::ServiceExt; // for `oneshot`

fn app() -> axum::Router {
    let service =
        ExtractionService::with_resolver(ExtractionConfig::default(), Arc::new(StaticResolver::new()));
    build_router(AppState::new(service))
}

async fn get_json(uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_root_reports_name_and_version() {
    let (status, body) = get_json("/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["api_name"], "rag-extract");
    assert_eq!(body["version"], version::VERSION_NUMBER);
}

#[tokio::test]
async fn test_health() {
    let (status, body) = get_json("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_supported_formats_lists_groups() {
    let (status, body) = get_json("/v1/supported-formats").await;
    assert_eq!(status, StatusCode::OK);
    let groups = body.as_object().unwrap();
    for group in ["images_ocr", "documents", "spreadsheets", "archives", "source_code"] {
        assert!(groups.contains_key(group), "missing group {}", group);
    }
    assert!(body["documents"].as_array().unwrap().iter().any(|e| e == "pdf"));
    assert!(body["archives"].as_array().unwrap().iter().any(|e| e == "7z"));
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let request = Request::builder()
        .uri("/v1/nope")
        .body(Body::empty())
        .unwrap();
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
