// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Service configuration
//!
//! Every setting is read from the environment with a default, after an
//! optional `.env` file has been loaded by the binary.

pub mod limits;
pub mod web;

pub use limits::{ArchiveLimits, ResourceLimitsConfig};
pub use web::WebConfig;

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Read `key` and parse it, falling back to `default` when unset or invalid
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Comma-separated list; empty items dropped
pub(crate) fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Top-level configuration for the extraction service
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Bind address (default: 0.0.0.0)
    pub api_host: String,
    /// Bind port (default: 7555)
    pub api_port: u16,
    /// Concurrent requests in flight (default: 4)
    pub max_workers: usize,
    /// Maximum upload or download size in bytes (default: 20MB)
    pub max_file_size: u64,
    /// Outer timeout for a whole request tree (default: 300)
    pub processing_timeout_secs: u64,
    /// Tesseract language list (default: rus+eng)
    pub ocr_languages: String,
    /// Parent for per-request scratch directories; system temp when unset
    pub temp_dir: Option<PathBuf>,
    pub archive: ArchiveLimits,
    pub resources: ResourceLimitsConfig,
    pub web: WebConfig,
}

impl ExtractionConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: env_or("API_PORT", 7555),
            max_workers: env_or("MAX_WORKERS", 4),
            max_file_size: env_or("MAX_FILE_SIZE", 20 * 1024 * 1024),
            processing_timeout_secs: env_or("PROCESSING_TIMEOUT_SECONDS", 300),
            ocr_languages: env::var("OCR_LANGUAGES").unwrap_or_else(|_| "rus+eng".to_string()),
            temp_dir: env::var("TEMP_DIR").ok().map(PathBuf::from),
            archive: ArchiveLimits::from_env(),
            resources: ResourceLimitsConfig::from_env(),
            web: WebConfig::from_env(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.max_workers == 0 {
            return Err("max_workers must be at least 1".to_string());
        }
        if self.max_file_size == 0 {
            return Err("max_file_size must be greater than 0".to_string());
        }
        if self.processing_timeout_secs == 0 {
            return Err("processing_timeout_secs must be at least 1".to_string());
        }
        if self.archive.max_nesting == 0 {
            return Err("max_archive_nesting must be at least 1".to_string());
        }
        if self.archive.max_archive_size == 0 || self.archive.max_extracted_size == 0 {
            return Err("archive size limits must be greater than 0".to_string());
        }
        if self.web.page_timeout_secs == 0 {
            return Err("web page timeout must be at least 1".to_string());
        }
        if self.ocr_languages.trim().is_empty() {
            return Err("ocr_languages must not be empty".to_string());
        }
        for cidr in &self.web.blocked_networks {
            if crate::fetch::network::Cidr::parse(cidr).is_none() {
                return Err(format!("invalid CIDR in SSRF_BLOCKED_NETWORKS: {}", cidr));
            }
        }
        Ok(())
    }

    pub fn processing_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.processing_timeout_secs)
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            api_host: "0.0.0.0".to_string(),
            api_port: 7555,
            max_workers: 4,
            max_file_size: 20 * 1024 * 1024,
            processing_timeout_secs: 300,
            ocr_languages: "rus+eng".to_string(),
            temp_dir: None,
            archive: ArchiveLimits::default(),
            resources: ResourceLimitsConfig::default(),
            web: WebConfig::default(),
        }
    }
}
