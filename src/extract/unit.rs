// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use serde::{Deserialize, Serialize};

/// Text extracted from one file, with its provenance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionUnit {
    pub filename: String,
    /// Slash-joined provenance, e.g. `archive.zip/sub/doc.txt`
    pub path: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl ExtractionUnit {
    pub fn new(
        filename: impl Into<String>,
        path: impl Into<String>,
        size: u64,
        kind: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            path: path.into(),
            size,
            kind: kind.into(),
            text: text.into(),
        }
    }
}
