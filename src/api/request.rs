// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Request bodies and validation

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::errors::ApiError;
use crate::fetch::FetchOptions;

/// Upper bounds for per-request fetch overrides
const MAX_PAGE_TIMEOUT_SECS: u64 = 300;
const MAX_REDIRECTS: usize = 20;
const MAX_SCROLL_ATTEMPTS: usize = 100;
const MAX_IMAGES: usize = 100;

/// POST /v1/extract/base64
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Base64Request {
    #[serde(default)]
    pub encoded_base64_file: String,
    #[serde(default)]
    pub filename: String,
}

impl Base64Request {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.filename.trim().is_empty() {
            return Err(ApiError::bad_request("filename is required", ""));
        }
        Ok(())
    }
}

/// POST /v1/extract/url; every option falls back to configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrlRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_js: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_redirects: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_scroll_attempts: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_images: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_images: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_image_area: Option<u64>,
}

impl UrlRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.url.trim().is_empty() {
            return Err(ApiError::bad_request("url is required", ""));
        }
        let out_of_range = |field: &str, max: u64| {
            ApiError::bad_request(format!("{} must be at most {}", field, max), self.url.clone())
        };
        match self.page_timeout_secs {
            Some(0) => {
                return Err(ApiError::bad_request(
                    "page_timeout_secs must be at least 1",
                    self.url.clone(),
                ))
            }
            Some(secs) if secs > MAX_PAGE_TIMEOUT_SECS => {
                return Err(out_of_range("page_timeout_secs", MAX_PAGE_TIMEOUT_SECS))
            }
            _ => {}
        }
        if self.max_redirects.is_some_and(|n| n > MAX_REDIRECTS) {
            return Err(out_of_range("max_redirects", MAX_REDIRECTS as u64));
        }
        if self.max_scroll_attempts.is_some_and(|n| n > MAX_SCROLL_ATTEMPTS) {
            return Err(out_of_range("max_scroll_attempts", MAX_SCROLL_ATTEMPTS as u64));
        }
        if self.max_images.is_some_and(|n| n > MAX_IMAGES) {
            return Err(out_of_range("max_images", MAX_IMAGES as u64));
        }
        Ok(())
    }

    /// Overlay the request's options on the configured defaults
    pub fn fetch_options(&self, defaults: FetchOptions) -> FetchOptions {
        FetchOptions {
            render_js: self.render_js.unwrap_or(defaults.render_js),
            page_timeout: self
                .page_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.page_timeout),
            network_idle_timeout: defaults.network_idle_timeout,
            max_redirects: self.max_redirects.unwrap_or(defaults.max_redirects),
            max_scroll_attempts: self.max_scroll_attempts.unwrap_or(defaults.max_scroll_attempts),
            process_images: self.process_images.unwrap_or(defaults.process_images),
            max_images: self.max_images.unwrap_or(defaults.max_images),
            min_image_area: self.min_image_area.unwrap_or(defaults.min_image_area),
        }
    }
}
