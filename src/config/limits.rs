// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Size, depth and process ceilings

use super::env_or;

/// Default archive container ceiling (20MB)
pub const DEFAULT_MAX_ARCHIVE_SIZE: u64 = 20 * 1024 * 1024;
/// Default tree-wide extracted-bytes ceiling (100MB)
pub const DEFAULT_MAX_EXTRACTED_SIZE: u64 = 104_857_600;
/// Default archive nesting ceiling
pub const DEFAULT_MAX_NESTING: u32 = 3;

/// Limits applied to archive unpacking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLimits {
    /// Maximum size of a single container in bytes (default: 20MB)
    pub max_archive_size: u64,
    /// Maximum bytes extracted across a whole request tree (default: 100MB)
    pub max_extracted_size: u64,
    /// Maximum nesting depth; a container at this level is rejected (default: 3)
    pub max_nesting: u32,
}

impl ArchiveLimits {
    pub fn from_env() -> Self {
        Self {
            max_archive_size: env_or("MAX_ARCHIVE_SIZE", DEFAULT_MAX_ARCHIVE_SIZE),
            max_extracted_size: env_or("MAX_EXTRACTED_SIZE", DEFAULT_MAX_EXTRACTED_SIZE),
            max_nesting: env_or("MAX_ARCHIVE_NESTING", DEFAULT_MAX_NESTING),
        }
    }
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_archive_size: DEFAULT_MAX_ARCHIVE_SIZE,
            max_extracted_size: DEFAULT_MAX_EXTRACTED_SIZE,
            max_nesting: DEFAULT_MAX_NESTING,
        }
    }
}

/// Per-class memory ceilings for external converters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimitsConfig {
    /// Apply kernel rlimits to child processes (default: true)
    pub enabled: bool,
    pub ocr_memory_mb: u64,
    pub pdf_memory_mb: u64,
    pub office_memory_mb: u64,
    pub archive_memory_mb: u64,
}

impl ResourceLimitsConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: std::env::var("ENABLE_RESOURCE_LIMITS")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(true),
            ocr_memory_mb: env_or("MAX_MEMORY_OCR_MB", 512),
            pdf_memory_mb: env_or("MAX_MEMORY_PDF_MB", 1024),
            office_memory_mb: env_or("MAX_MEMORY_OFFICE_MB", 1024),
            archive_memory_mb: env_or("MAX_MEMORY_ARCHIVE_MB", 512),
        }
    }
}

impl Default for ResourceLimitsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ocr_memory_mb: 512,
            pdf_memory_mb: 1024,
            office_memory_mb: 1024,
            archive_memory_mb: 512,
        }
    }
}
