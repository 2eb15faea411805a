// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Remote fetch settings

use std::path::PathBuf;

use super::{env_list, env_or};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; RagExtract/0.1; +https://example.invalid/bot)";

/// Configuration for URL extraction
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// Page load timeout in seconds (default: 30)
    pub page_timeout_secs: u64,
    /// Bounded wait for network idle in the browser (default: 10)
    pub network_idle_timeout_secs: u64,
    /// Redirect hops followed manually (default: 5)
    pub max_redirects: usize,
    /// Scroll iterations for script-rendered pages (default: 10)
    pub max_scroll_attempts: usize,
    /// Embedded images processed per page (default: 20)
    pub max_images: usize,
    /// Images with fewer pixels than this are skipped (default: 10000)
    pub min_image_area: u64,
    pub user_agent: String,
    /// Chromium binary; looked up on PATH when unset
    pub chromium_path: Option<PathBuf>,
    /// Extra hostnames refused by the SSRF guard
    pub blocked_hosts: Vec<String>,
    /// Extra CIDR ranges refused by the SSRF guard
    pub blocked_networks: Vec<String>,
}

impl WebConfig {
    pub fn from_env() -> Self {
        Self {
            page_timeout_secs: env_or("WEB_PAGE_TIMEOUT_SECONDS", 30),
            network_idle_timeout_secs: env_or("WEB_NETWORK_IDLE_TIMEOUT_SECONDS", 10),
            max_redirects: env_or("WEB_MAX_REDIRECTS", 5),
            max_scroll_attempts: env_or("WEB_MAX_SCROLL_ATTEMPTS", 10),
            max_images: env_or("WEB_MAX_IMAGES", 20),
            min_image_area: env_or("WEB_MIN_IMAGE_AREA", 10_000),
            user_agent: std::env::var("WEB_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            chromium_path: std::env::var("CHROMIUM_PATH").ok().map(PathBuf::from),
            blocked_hosts: env_list("SSRF_BLOCKED_HOSTS"),
            blocked_networks: env_list("SSRF_BLOCKED_NETWORKS"),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            page_timeout_secs: 30,
            network_idle_timeout_secs: 10,
            max_redirects: 5,
            max_scroll_attempts: 10,
            max_images: 20,
            min_image_area: 10_000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            chromium_path: None,
            blocked_hosts: Vec::new(),
            blocked_networks: Vec::new(),
        }
    }
}
