// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, warn};

use crate::errors::{ErrorClass, ExtractError};
use crate::extract::safe_filename;

/// Body of every failed request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub status: String,
    pub filename: String,
    pub message: String,
}

/// An extraction failure bound to the file or URL it was about
#[derive(Debug)]
pub struct ApiError {
    pub error: ExtractError,
    pub filename: String,
}

impl ApiError {
    pub fn new(error: ExtractError, filename: impl Into<String>) -> Self {
        Self {
            error,
            filename: filename.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>, filename: impl Into<String>) -> Self {
        Self::new(ExtractError::BadRequest(message.into()), filename)
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Client-facing body. Only request-shape errors carry their detail;
    /// everything else gets the class message so paths never leak.
    pub fn to_response(&self) -> ErrorResponse {
        let message = match &self.error {
            ExtractError::BadRequest(detail) => detail.clone(),
            other => other.public_message().to_string(),
        };
        ErrorResponse {
            status: "error".to_string(),
            filename: self.filename.clone(),
            message,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.filename, self.error)
    }
}

impl std::error::Error for ApiError {}

impl From<ExtractError> for ApiError {
    fn from(error: ExtractError) -> Self {
        Self::new(error, String::new())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let class = self.error.class();
        if class == ErrorClass::Internal {
            error!(file = %safe_filename(&self.filename), error = %self.error, "request failed");
        } else {
            warn!(
                file = %safe_filename(&self.filename),
                code = class.code(),
                status = status.as_u16(),
                error = %self.error,
                "request rejected"
            );
        }
        (status, Json(self.to_response())).into_response()
    }
}
