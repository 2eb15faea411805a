// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Member path sanitization and metadata filtering

use std::path::{Path, PathBuf};

use crate::errors::{ExtractError, Result};

/// Basenames dropped before dispatch
const METADATA_FILES: &[&str] = &[".ds_store", "thumbs.db", "desktop.ini"];

/// Directory segments whose whole subtree is dropped
const METADATA_DIRS: &[&str] = &["__MACOSX", ".git", ".svn", ".hg"];

/// Normalize an archive member name into a relative slash path.
///
/// Backslashes become `/`; `.`/`..`/empty segments and drive prefixes are
/// removed; control characters are replaced. Returns `None` when nothing is
/// left.
pub fn sanitize_member_path(raw: &str) -> Option<String> {
    let normalized = raw.replace('\\', "/");
    let mut parts: Vec<String> = Vec::new();

    for (idx, segment) in normalized.split('/').enumerate() {
        if segment.is_empty() || segment == "." || segment == ".." {
            continue;
        }
        if idx == 0 && is_drive_prefix(segment) {
            continue;
        }
        let cleaned: String = segment
            .chars()
            .map(|c| if c.is_control() { '_' } else { c })
            .collect();
        parts.push(cleaned);
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn is_drive_prefix(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Platform and VCS clutter that never carries document text
pub fn is_metadata_entry(path: &str) -> bool {
    let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
    while let Some(segment) = segments.next() {
        let is_last = segments.peek().is_none();
        if !is_last && METADATA_DIRS.contains(&segment) {
            return true;
        }
        if is_last {
            let lower = segment.to_lowercase();
            if METADATA_FILES.contains(&lower.as_str()) || segment.starts_with("._") {
                return true;
            }
            if METADATA_DIRS.contains(&segment) {
                return true;
            }
        }
    }
    false
}

/// Last segment of a sanitized member path
pub fn file_name(relative: &str) -> &str {
    relative.rsplit('/').next().unwrap_or(relative)
}

/// Verify `target` resolves inside `root`
pub fn ensure_within(root: &Path, target: &Path) -> Result<PathBuf> {
    let root = root
        .canonicalize()
        .map_err(|e| ExtractError::Internal(format!("job dir vanished: {}", e)))?;
    let resolved = target
        .canonicalize()
        .map_err(|e| ExtractError::Internal(format!("staged member vanished: {}", e)))?;
    if resolved.starts_with(&root) {
        Ok(resolved)
    } else {
        tracing::warn!("archive member resolved outside its job directory");
        Err(ExtractError::SecurityRejection(
            "archive member escapes extraction directory".to_string(),
        ))
    }
}
