// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Request orchestration
//!
//! Each request holds one worker permit for its whole lifetime, runs under the
//! outer processing timeout, and owns a private [`RequestScope`]. When the
//! timeout fires the request future is dropped: sandboxed children die with
//! their process group, the scope's cancellation token stops blocking
//! workers, and the scratch tree is removed. No partial result is returned.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{info, warn};

use crate::config::ExtractionConfig;
use crate::errors::{ExtractError, Result};
use crate::extract::{safe_filename, ContentExtractor, ExtractionUnit};
use crate::fetch::{FetchOptions, HickoryResolver, HostResolver, RemoteFetcher};
use crate::sandbox::Sandbox;
use crate::scope::RequestScope;

#[derive(Debug)]
pub struct ExtractionService {
    config: Arc<ExtractionConfig>,
    extractor: ContentExtractor,
    fetcher: RemoteFetcher,
    workers: Semaphore,
}

impl ExtractionService {
    /// Service using the system DNS configuration for the SSRF guard
    pub fn new(config: ExtractionConfig) -> Self {
        Self::with_resolver(config, Arc::new(HickoryResolver::from_system()))
    }

    pub fn with_resolver(config: ExtractionConfig, resolver: Arc<dyn HostResolver>) -> Self {
        let sandbox = Sandbox::new(config.resources.clone());
        let extractor = ContentExtractor::new(&config, sandbox);
        let fetcher = RemoteFetcher::new(&config, resolver);
        let workers = Semaphore::new(config.max_workers.max(1));
        Self {
            config: Arc::new(config),
            extractor,
            fetcher,
            workers,
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Worker permits currently free
    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }

    /// Extract an uploaded file
    pub async fn extract_file(&self, content: Vec<u8>, filename: &str) -> Result<Vec<ExtractionUnit>> {
        self.check_size(content.len() as u64)?;
        let _permit = self.acquire().await?;
        let scope = self.open_scope()?;
        info!(request = %scope.id, file = %safe_filename(filename), "file request");
        let work = self.extractor.extract_units(content, filename, &scope);
        self.within_deadline(&scope, work).await
    }

    /// Extract a base64-encoded file
    pub async fn extract_base64(&self, encoded: &str, filename: &str) -> Result<Vec<ExtractionUnit>> {
        // Encoded form is 4/3 of the payload
        let encoded_limit = self.config.max_file_size.saturating_mul(4) / 3 + 4;
        if encoded.len() as u64 > encoded_limit {
            return Err(ExtractError::PolicyViolation(format!(
                "encoded payload is {} bytes, limit is {}",
                encoded.len(),
                encoded_limit
            )));
        }
        let content = decode_base64(encoded)?;
        self.extract_file(content, filename).await
    }

    /// Fetch a remote resource and extract it
    pub async fn extract_url(&self, url: &str, options: &FetchOptions) -> Result<Vec<ExtractionUnit>> {
        let _permit = self.acquire().await?;
        let scope = self.open_scope()?;
        info!(request = %scope.id, render_js = options.render_js, "url request");
        let work = self.fetcher.fetch(url, options, &self.extractor, &scope);
        self.within_deadline(&scope, work).await
    }

    /// Default fetch options from configuration
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions::from_config(&self.config.web)
    }

    fn check_size(&self, size: u64) -> Result<()> {
        if size > self.config.max_file_size {
            return Err(ExtractError::PolicyViolation(format!(
                "file is {} bytes, limit is {}",
                size, self.config.max_file_size
            )));
        }
        Ok(())
    }

    async fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        self.workers
            .acquire()
            .await
            .map_err(|_| ExtractError::Internal("worker pool closed".to_string()))
    }

    fn open_scope(&self) -> Result<RequestScope> {
        RequestScope::new(self.config.temp_dir.as_deref())
    }

    async fn within_deadline<F>(&self, scope: &RequestScope, work: F) -> Result<Vec<ExtractionUnit>>
    where
        F: Future<Output = Result<Vec<ExtractionUnit>>>,
    {
        // Cancels blocking workers however this function exits.
        let _cancel_on_exit = scope.cancel_token().drop_guard();
        let started = Instant::now();
        let limit = self.config.processing_timeout();

        match tokio::time::timeout(limit, work).await {
            Ok(Ok(units)) => {
                info!(
                    request = %scope.id,
                    units = units.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "request complete"
                );
                Ok(units)
            }
            Ok(Err(e)) => {
                warn!(
                    request = %scope.id,
                    class = e.class().code(),
                    error = %e,
                    "request failed"
                );
                Err(e)
            }
            Err(_) => {
                warn!(request = %scope.id, limit_secs = limit.as_secs(), "request timed out");
                Err(ExtractError::Timeout(format!(
                    "processing exceeded {} seconds",
                    limit.as_secs()
                )))
            }
        }
    }
}

/// Decode standard base64, tolerating a `data:` URL prefix and line breaks
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    let trimmed = encoded.trim();
    let payload = match trimmed.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| ExtractError::BadRequest("malformed data URL".to_string()))?,
        None => trimmed,
    };
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| ExtractError::BadRequest(format!("invalid base64: {}", e)))
}
