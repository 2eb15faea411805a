// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Endpoint handlers

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::{multipart::MultipartError, Multipart};
use serde_json::Value;
use tracing::{debug, info};

use super::errors::ApiError;
use super::http_server::AppState;
use super::request::{Base64Request, UrlRequest};
use super::response::{supported_formats, ExtractResponse, HealthResponse, RootResponse};
use crate::errors::ExtractError;
use crate::extract::safe_filename;
use crate::version;

type ApiResult<T> = Result<Json<T>, ApiError>;

/// GET /
pub async fn root_handler() -> Json<RootResponse> {
    Json(RootResponse {
        api_name: version::API_NAME.to_string(),
        version: version::VERSION_NUMBER.to_string(),
    })
}

/// GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// GET /v1/supported-formats
pub async fn supported_formats_handler() -> Json<Value> {
    Json(supported_formats())
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::new(ExtractError::PolicyViolation(e.body_text()), "")
    } else {
        ApiError::bad_request(format!("invalid multipart body: {}", e.body_text()), "")
    }
}

/// POST /v1/extract/file
///
/// Multipart upload; the part named `file` carries the payload and its
/// filename.
pub async fn extract_file_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<ExtractResponse> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("unknown_file").to_string();
        let content = field.bytes().await.map_err(multipart_error)?;
        debug!(file = %safe_filename(&filename), bytes = content.len(), "upload received");

        let units = state
            .service
            .extract_file(content.to_vec(), &filename)
            .await
            .map_err(|e| ApiError::new(e, filename.clone()))?;
        info!(file = %safe_filename(&filename), units = units.len(), "file extracted");
        return Ok(Json(ExtractResponse::success(filename, units)));
    }
    Err(ApiError::bad_request("multipart field 'file' is required", ""))
}

/// POST /v1/extract/base64
pub async fn extract_base64_handler(
    State(state): State<AppState>,
    payload: Result<Json<Base64Request>, JsonRejection>,
) -> ApiResult<ExtractResponse> {
    let Json(request) =
        payload.map_err(|e| ApiError::bad_request(format!("invalid JSON body: {}", e.body_text()), ""))?;
    request.validate()?;

    let units = state
        .service
        .extract_base64(&request.encoded_base64_file, &request.filename)
        .await
        .map_err(|e| ApiError::new(e, request.filename.clone()))?;
    info!(file = %safe_filename(&request.filename), units = units.len(), "base64 file extracted");
    Ok(Json(ExtractResponse::success(request.filename, units)))
}

/// POST /v1/extract/url
pub async fn extract_url_handler(
    State(state): State<AppState>,
    payload: Result<Json<UrlRequest>, JsonRejection>,
) -> ApiResult<ExtractResponse> {
    let Json(request) =
        payload.map_err(|e| ApiError::bad_request(format!("invalid JSON body: {}", e.body_text()), ""))?;
    request.validate()?;

    let options = request.fetch_options(state.service.fetch_options());
    let units = state
        .service
        .extract_url(&request.url, &options)
        .await
        .map_err(|e| ApiError::new(e, request.url.clone()))?;
    info!(units = units.len(), "url extracted");
    Ok(Json(ExtractResponse::success(request.url, units)))
}
