// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Extraction endpoints: success shape and error-class status mapping

use std::io::{Cursor, Write};
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rag_extract::{
    api::{build_router, AppState},
    config::ExtractionConfig,
    fetch::StaticResolver,
    ExtractionService,
};
use serde_json::{json, Value};
use tower::util::ServiceExt; // for `oneshot`
use zip::{write::SimpleFileOptions, ZipWriter};

const BOUNDARY: &str = "----rag-extract-test-boundary";

fn app_with(config: ExtractionConfig) -> Router {
    let service = ExtractionService::with_resolver(config, Arc::new(StaticResolver::new()));
    build_router(AppState::new(service))
}

fn app() -> Router {
    app_with(ExtractionConfig::default())
}

fn multipart_body(field: &str, filename: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn upload(app: Router, filename: &str, content: &[u8]) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/extract/file")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body("file", filename, content)))
        .unwrap();
    send(app, request).await
}

async fn post_json(app: Router, uri: &str, payload: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    send(app, request).await
}

#[tokio::test]
async fn test_upload_text_file() {
    let (status, body) = upload(app(), "notes.txt", b"quarterly numbers look fine").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["filename"], "notes.txt");
    assert_eq!(body["count"], 1);
    let unit = &body["files"][0];
    assert_eq!(unit["filename"], "notes.txt");
    assert_eq!(unit["path"], "notes.txt");
    assert_eq!(unit["type"], "txt");
    assert!(unit["text"].as_str().unwrap().contains("quarterly numbers"));
}

#[tokio::test]
async fn test_upload_zip_lists_members() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.start_file("a.txt", SimpleFileOptions::default()).unwrap();
    writer.write_all(b"first").unwrap();
    writer.start_file("sub/b.csv", SimpleFileOptions::default()).unwrap();
    writer.write_all(b"x,y\n1,2\n").unwrap();
    let zip = writer.finish().unwrap().into_inner();

    let (status, body) = upload(app(), "pack.zip", &zip).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["files"][0]["path"], "pack.zip/a.txt");
    assert_eq!(body["files"][1]["path"], "pack.zip/sub/b.csv");
}

#[tokio::test]
async fn test_empty_upload_is_422() {
    let (status, body) = upload(app(), "empty.txt", b"").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["status"], "error");
    assert_eq!(body["filename"], "empty.txt");
}

#[tokio::test]
async fn test_unsupported_extension_is_415() {
    let (status, body) = upload(app(), "setup.exe", b"MZ\x90\x00\x03").await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_mismatched_signature_is_415() {
    // PNG bytes claiming to be a PDF
    let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01\x08\x02\0\0\0";
    let (status, _) = upload(app(), "report.pdf", png).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_oversize_upload_is_413() {
    let config = ExtractionConfig {
        max_file_size: 16,
        ..ExtractionConfig::default()
    };
    let (status, body) = upload(app_with(config), "big.txt", &[b'a'; 100]).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_missing_file_field_is_400() {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/extract/file")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body("document", "a.txt", b"hello")))
        .unwrap();
    let (status, _) = send(app(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_base64_success() {
    let payload = json!({
        "encoded_base64_file": STANDARD.encode("# Heading\n\nmarkdown body"),
        "filename": "readme.md",
    });
    let (status, body) = post_json(app(), "/v1/extract/base64", payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filename"], "readme.md");
    assert!(body["files"][0]["text"]
        .as_str()
        .unwrap()
        .contains("markdown body"));
}

#[tokio::test]
async fn test_invalid_base64_is_400() {
    let payload = json!({ "encoded_base64_file": "%%%not-base64%%%", "filename": "a.txt" });
    let (status, body) = post_json(app(), "/v1/extract/base64", payload).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert_eq!(body["filename"], "a.txt");
}

#[tokio::test]
async fn test_malformed_json_is_400() {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/extract/base64")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send(app(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_url_to_loopback_is_403() {
    let payload = json!({ "url": "http://127.0.0.1:9/", "render_js": false });
    let (status, body) = post_json(app(), "/v1/extract/url", payload).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["status"], "error");
    assert_eq!(body["filename"], "http://127.0.0.1:9/");
    assert!(!body["message"].as_str().unwrap().contains("127.0.0.1"));
}

#[tokio::test]
async fn test_url_option_out_of_range_is_400() {
    let payload = json!({ "url": "https://example.com", "max_redirects": 1000 });
    let (status, _) = post_json(app(), "/v1/extract/url", payload).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
