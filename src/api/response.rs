// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Response bodies

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::extract::{ExtractionUnit, SUPPORTED_FORMATS};

/// Body of every successful extraction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractResponse {
    pub status: String,
    pub filename: String,
    pub count: usize,
    pub files: Vec<ExtractionUnit>,
}

impl ExtractResponse {
    pub fn success(filename: impl Into<String>, files: Vec<ExtractionUnit>) -> Self {
        Self {
            status: "success".to_string(),
            filename: filename.into(),
            count: files.len(),
            files,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootResponse {
    pub api_name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Format groups in their documented order
pub fn supported_formats() -> Value {
    let groups: Map<String, Value> = SUPPORTED_FORMATS
        .iter()
        .map(|(group, extensions)| {
            let list = extensions.iter().map(|ext| Value::from(*ext)).collect();
            (group.to_string(), Value::Array(list))
        })
        .collect();
    Value::Object(groups)
}
