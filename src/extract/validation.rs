// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Upload hygiene: filename cleanup and magic-byte checks

use infer::MatcherType;
use tracing::warn;

use super::formats::{get_file_extension, Format};
use crate::archive::{ArchiveFormat, TarCompression};
use crate::errors::{ExtractError, Result};

const FALLBACK_NAME: &str = "unknown_file";
const MAX_FILENAME_BYTES: usize = 255;

/// Filename for processing: last path segment, no control or reserved
/// characters, bounded length. Unicode letters are kept.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*') {
                '_'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').trim();
    if cleaned.is_empty() {
        return FALLBACK_NAME.to_string();
    }
    truncate_keeping_extension(cleaned, MAX_FILENAME_BYTES)
}

fn truncate_keeping_extension(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }
    let (stem, ext) = match name.rfind('.') {
        Some(idx) if name.len() - idx <= 16 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    };
    let mut cut = max.saturating_sub(ext.len());
    while !stem.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &stem[..cut], ext)
}

/// ASCII-only rendering for log fields
pub fn safe_filename(raw: &str) -> String {
    if raw.is_empty() {
        return FALLBACK_NAME.to_string();
    }
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Sniffed extensions accepted for a binary format
fn expected_signatures(format: Format) -> &'static [&'static str] {
    const CFB: &[&str] = &["doc", "xls", "ppt", "msi"];
    match format {
        Format::Pdf => &["pdf"],
        Format::Image => &["jpg", "png", "tif", "bmp", "gif", "webp"],
        Format::Doc => CFB,
        Format::Rtf => &["rtf"],
        Format::Docx => &["docx", "zip"],
        Format::Pptx => &["pptx", "zip"],
        Format::OpenDocument => &["odt", "odp", "zip"],
        Format::Spreadsheet => &["xlsx", "ods", "zip", "doc", "xls", "ppt", "msi"],
        Format::Archive(ArchiveFormat::Zip) => &["zip", "docx", "xlsx", "pptx", "odt", "ods", "odp", "jar", "epub"],
        Format::Archive(ArchiveFormat::Tar(TarCompression::None)) => &["tar"],
        Format::Archive(ArchiveFormat::Tar(TarCompression::Gzip)) => &["gz"],
        Format::Archive(ArchiveFormat::Tar(TarCompression::Bzip2)) => &["bz2"],
        Format::Archive(ArchiveFormat::Tar(TarCompression::Xz)) => &["xz"],
        Format::Archive(ArchiveFormat::SevenZ) => &["7z"],
        Format::Archive(ArchiveFormat::Rar) => &["rar"],
        _ => &[],
    }
}

/// Check that the content agrees with the declared extension.
///
/// Binary formats must sniff as one of their expected signatures; text-like
/// formats must not sniff as a known binary type. Anything undecidable is
/// rejected.
pub fn validate_file_type(content: &[u8], filename: &str) -> Result<Format> {
    if content.is_empty() {
        return Err(ExtractError::EmptyInput("file is empty".to_string()));
    }
    let ext = get_file_extension(filename)
        .ok_or_else(|| ExtractError::UnsupportedFormat("file has no extension".to_string()))?;
    let format = Format::from_extension(&ext)
        .ok_or_else(|| ExtractError::UnsupportedFormat(format!("unsupported file type: .{}", ext)))?;

    let sniffed = infer::get(content);
    let accepted = if format.is_text_like() {
        match sniffed {
            None => true,
            Some(kind) => kind.matcher_type() == MatcherType::Text,
        }
    } else {
        sniffed
            .map(|kind| expected_signatures(format).contains(&kind.extension()))
            .unwrap_or(false)
    };

    if !accepted {
        warn!(
            file = %safe_filename(filename),
            declared = %ext,
            sniffed = sniffed.map(|k| k.extension()).unwrap_or("unknown"),
            "content does not match declared extension"
        );
        return Err(ExtractError::UnsupportedFormat(format!(
            "content does not match .{} extension",
            ext
        )));
    }
    Ok(format)
}
