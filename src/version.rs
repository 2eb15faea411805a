// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Version information for the extraction service

/// Name reported by `GET /`
pub const API_NAME: &str = "rag-extract";

/// Semantic version number
pub const VERSION_NUMBER: &str = env!("CARGO_PKG_VERSION");

/// Supported features in this version
pub const FEATURES: &[&str] = &[
    "archive-bomb-defense",
    "nested-archives",
    "sandboxed-converters",
    "ssrf-guard",
    "redirect-revalidation",
    "headless-rendering",
    "embedded-image-ocr",
];

/// Get formatted version string for logging
pub fn get_version_string() -> String {
    format!("{} {}", API_NAME, VERSION_NUMBER)
}
