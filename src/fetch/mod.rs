// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! SSRF-safe remote fetching
//!
//! `Resolve -> Validate -> ProbeContentType -> {FetchHtml | DownloadFile} -> Dispatch`.
//! Every outbound connection, including redirects, embedded images and the
//! browser's own sub-requests, goes through [`UrlGuard`] first.

pub mod browser;
pub mod guard;
pub mod http;
pub mod images;
pub mod network;
pub mod resolver;

pub use browser::{BrowserRenderer, RenderSettings};
pub use guard::{SafeUrl, UrlGuard};
pub use http::PinnedHttp;
pub use resolver::{HickoryResolver, HostResolver, StaticResolver};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use crate::config::{ExtractionConfig, WebConfig};
use crate::errors::{ExtractError, Result};
use crate::extract::formats::{get_file_extension, Format};
use crate::extract::text::{decode_text, html_to_text};
use crate::extract::{sanitize_filename, ContentExtractor, ExtractionUnit};
use crate::scope::RequestScope;

/// Per-request knobs, defaulted from [`WebConfig`]
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    pub render_js: bool,
    pub page_timeout: Duration,
    pub network_idle_timeout: Duration,
    pub max_redirects: usize,
    pub max_scroll_attempts: usize,
    pub process_images: bool,
    pub max_images: usize,
    pub min_image_area: u64,
}

impl FetchOptions {
    pub fn from_config(web: &WebConfig) -> Self {
        Self {
            render_js: false,
            page_timeout: Duration::from_secs(web.page_timeout_secs),
            network_idle_timeout: Duration::from_secs(web.network_idle_timeout_secs),
            max_redirects: web.max_redirects,
            max_scroll_attempts: web.max_scroll_attempts,
            process_images: true,
            max_images: web.max_images,
            min_image_area: web.min_image_area,
        }
    }
}

/// Which branch a probed URL takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Html,
    File,
}

const HTML_TYPES: &[&str] = &["text/html", "application/xhtml+xml"];
const AMBIGUOUS_TYPES: &[&str] = &["text/plain", "application/octet-stream", "binary/octet-stream"];

/// Decide the branch from the declared media type and the URL's extension.
///
/// HTML types go to the page path. A missing or generic type counts as HTML
/// unless the URL names a supported non-HTML file.
pub fn route_for(mime: Option<&str>, url: &Url) -> Route {
    let url_format = url_extension(url).and_then(|ext| Format::from_extension(&ext));
    match mime {
        Some(m) if HTML_TYPES.contains(&m) => Route::Html,
        None => match url_format {
            Some(Format::Html) | None => Route::Html,
            Some(_) => Route::File,
        },
        Some(m) if AMBIGUOUS_TYPES.contains(&m) => match url_format {
            Some(Format::Html) => Route::Html,
            Some(_) => Route::File,
            None if m == "text/plain" => Route::File,
            None => Route::Html,
        },
        Some(_) => Route::File,
    }
}

fn url_extension(url: &Url) -> Option<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| name.contains('.'))
        .and_then(get_file_extension)
}

/// Extension for a media type when the URL and headers name no file
fn extension_for_mime(mime: &str) -> Option<&'static str> {
    Some(match mime {
        "application/pdf" => "pdf",
        "application/json" => "json",
        "application/xml" | "text/xml" => "xml",
        "text/csv" => "csv",
        "text/markdown" => "md",
        "text/plain" => "txt",
        "application/x-yaml" | "application/yaml" | "text/yaml" => "yaml",
        "application/zip" => "zip",
        "application/gzip" | "application/x-gzip" => "tar.gz",
        "application/x-tar" => "tar",
        "application/x-7z-compressed" => "7z",
        "application/vnd.rar" | "application/x-rar-compressed" => "rar",
        "application/msword" => "doc",
        "application/rtf" | "text/rtf" => "rtf",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => "pptx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.oasis.opendocument.text" => "odt",
        "application/vnd.oasis.opendocument.spreadsheet" => "ods",
        "application/vnd.oasis.opendocument.presentation" => "odp",
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        "image/tiff" => "tiff",
        "image/webp" => "webp",
        _ => return None,
    })
}

/// Display name for a page: last path segment, or the host
pub fn page_file_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| url.host_str().map(str::to_string))
        .unwrap_or_else(|| "page".to_string())
}

/// Name for a downloaded file, with an extension the dispatcher understands
fn download_file_name(url: &Url, disposition: Option<&str>, mime: Option<&str>) -> String {
    let base = disposition
        .map(sanitize_filename)
        .unwrap_or_else(|| sanitize_filename(&page_file_name(url)));
    let known = get_file_extension(&base)
        .and_then(|ext| Format::from_extension(&ext))
        .is_some();
    if known {
        return base;
    }
    match mime.and_then(extension_for_mime) {
        Some(ext) => format!("{}.{}", base, ext),
        None => base,
    }
}

#[derive(Debug, Clone)]
pub struct RemoteFetcher {
    guard: UrlGuard,
    http: PinnedHttp,
    browser: BrowserRenderer,
    max_file_size: u64,
}

impl RemoteFetcher {
    pub fn new(config: &ExtractionConfig, resolver: Arc<dyn HostResolver>) -> Self {
        let page_timeout = Duration::from_secs(config.web.page_timeout_secs);
        Self {
            guard: UrlGuard::new(resolver, &config.web),
            http: PinnedHttp::new(config.web.user_agent.clone(), page_timeout),
            browser: BrowserRenderer::new(&config.web),
            max_file_size: config.max_file_size,
        }
    }

    pub fn guard(&self) -> &UrlGuard {
        &self.guard
    }

    /// Fetch `raw_url` and extract everything it leads to
    pub async fn fetch(
        &self,
        raw_url: &str,
        options: &FetchOptions,
        extractor: &ContentExtractor,
        scope: &RequestScope,
    ) -> Result<Vec<ExtractionUnit>> {
        // Resolve + Validate
        let target = self.guard.check(raw_url).await?;
        debug!(url = %target.url, addrs = ?target.resolved, "url validated");
        scope.check_cancelled()?;

        // ProbeContentType
        let http = self.http.with_timeout(options.page_timeout);
        let probe = http
            .probe(&self.guard, target.clone(), options.max_redirects)
            .await?;
        let mime = probe.mime();
        let route = route_for(mime.as_deref(), &probe.final_url.url);
        info!(url = %probe.final_url.url, mime = ?mime, ?route, "probed");
        scope.check_cancelled()?;

        match route {
            Route::Html => self.fetch_page(&http, target, options, extractor, scope).await,
            Route::File => {
                let downloaded = http
                    .download(&self.guard, target, options.max_redirects, self.max_file_size)
                    .await?;
                let mime = downloaded
                    .content_type
                    .as_deref()
                    .and_then(|ct| ct.split(';').next())
                    .map(|ct| ct.trim().to_ascii_lowercase());
                let filename = download_file_name(
                    &downloaded.final_url.url,
                    downloaded.disposition_name.as_deref(),
                    mime.as_deref(),
                );
                extractor
                    .extract_units(downloaded.bytes, &filename, scope)
                    .await
            }
        }
    }

    async fn fetch_page(
        &self,
        http: &PinnedHttp,
        target: SafeUrl,
        options: &FetchOptions,
        extractor: &ContentExtractor,
        scope: &RequestScope,
    ) -> Result<Vec<ExtractionUnit>> {
        let (final_url, html) = if options.render_js && self.browser.is_available() {
            let settings = RenderSettings {
                page_timeout: options.page_timeout,
                network_idle_timeout: options.network_idle_timeout,
                max_redirects: options.max_redirects,
                max_scroll_attempts: options.max_scroll_attempts,
                max_html_bytes: self.max_file_size,
            };
            let page = self.browser.render(&self.guard, &target, &settings, scope).await?;
            (page.final_url, page.html)
        } else {
            if options.render_js {
                warn!("headless browser unavailable, fetching without rendering");
            }
            let downloaded = http
                .download(&self.guard, target, options.max_redirects, self.max_file_size)
                .await?;
            (downloaded.final_url.url, decode_text(&downloaded.bytes))
        };

        let text = tokio::task::spawn_blocking({
            let html = html.clone();
            move || html_to_text(&html)
        })
        .await?;
        if text.trim().is_empty() {
            return Err(ExtractError::EmptyInput("page has no text".to_string()));
        }

        let mut units = vec![ExtractionUnit::new(
            page_file_name(&final_url),
            final_url.to_string(),
            html.len() as u64,
            "html",
            text,
        )];
        if options.process_images && options.max_images > 0 {
            let image_units = self
                .extract_images(http, &html, &final_url, options, extractor, scope)
                .await?;
            units.extend(image_units);
        }
        Ok(units)
    }

    /// OCR embedded images; failures other than cancellation are skipped
    async fn extract_images(
        &self,
        http: &PinnedHttp,
        html: &str,
        page_url: &Url,
        options: &FetchOptions,
        extractor: &ContentExtractor,
        scope: &RequestScope,
    ) -> Result<Vec<ExtractionUnit>> {
        let candidates = images::discover_images(html, page_url, options.max_images);
        let mut units = Vec::new();
        for (index, url) in candidates.into_iter().enumerate() {
            scope.check_cancelled()?;
            match self.extract_image(http, &url, index, options, extractor, scope).await {
                Ok(Some(unit)) => units.push(unit),
                Ok(None) => {}
                Err(ExtractError::Cancelled) => return Err(ExtractError::Cancelled),
                Err(e) => warn!(image = %url, error = %e, "skipping embedded image"),
            }
        }
        Ok(units)
    }

    async fn extract_image(
        &self,
        http: &PinnedHttp,
        url: &Url,
        index: usize,
        options: &FetchOptions,
        extractor: &ContentExtractor,
        scope: &RequestScope,
    ) -> Result<Option<ExtractionUnit>> {
        let target = self.guard.check_url(url.clone()).await?;
        let downloaded = http
            .download(&self.guard, target, options.max_redirects, self.max_file_size)
            .await?;
        if !infer::is_image(&downloaded.bytes) {
            debug!(image = %url, "not an image, skipping");
            return Ok(None);
        }
        if !images::meets_min_area(&downloaded.bytes, options.min_image_area) {
            debug!(image = %url, "image below minimum area, skipping");
            return Ok(None);
        }
        let size = downloaded.bytes.len() as u64;
        let text = extractor
            .dispatch(downloaded.bytes, Format::Image, scope)
            .await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        let name = images::image_file_name(&downloaded.final_url.url, index);
        let kind = get_file_extension(&name).unwrap_or_else(|| "image".to_string());
        Ok(Some(ExtractionUnit::new(
            name,
            downloaded.final_url.url.to_string(),
            size,
            kind,
            text,
        )))
    }
}
