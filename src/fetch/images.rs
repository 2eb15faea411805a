// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Embedded image discovery for fetched pages

use std::collections::HashSet;
use std::io::Cursor;

use scraper::{Html, Selector};
use url::Url;

/// Absolute http(s) image URLs in document order, deduplicated, at most `max`
pub fn discover_images(html: &str, base: &Url, max: usize) -> Vec<Url> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("img[src]") else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    let mut found = Vec::new();

    for element in document.select(&selector) {
        if found.len() >= max {
            break;
        }
        let Some(src) = element.value().attr("src").map(str::trim) else {
            continue;
        };
        if src.is_empty() || src.starts_with("data:") {
            continue;
        }
        let Ok(mut url) = base.join(src) else {
            continue;
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            continue;
        }
        url.set_fragment(None);
        if seen.insert(url.as_str().to_string()) {
            found.push(url);
        }
    }
    found
}

/// Pixel dimensions read from the header only
pub fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Whether the image is large enough to be worth OCR
pub fn meets_min_area(bytes: &[u8], min_area: u64) -> bool {
    image_dimensions(bytes)
        .map(|(w, h)| u64::from(w) * u64::from(h) >= min_area)
        .unwrap_or(false)
}

/// Name for an image unit: last path segment, or `image-N`
pub fn image_file_name(url: &Url, index: usize) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("image-{}", index + 1))
}
