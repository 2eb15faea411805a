// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! ZIP containers, read in-process

use std::io::Cursor;

use tracing::{debug, warn};
use ::zip::ZipArchive;

use super::budget::{ArchiveBudget, DeclaredTally};
use super::sanitize::{is_metadata_entry, sanitize_member_path};
use super::staging::{StagedMember, Staging};
use crate::errors::{ExtractError, Result};

fn corrupt(e: ::zip::result::ZipError) -> ExtractError {
    ExtractError::CorruptInput(format!("zip: {}", e))
}

/// Sum of declared uncompressed sizes from the central directory
pub fn declared_size(content: &[u8], budget: &ArchiveBudget) -> Result<DeclaredTally> {
    let mut archive = ZipArchive::new(Cursor::new(content)).map_err(corrupt)?;
    let mut tally = DeclaredTally::default();
    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i).map_err(corrupt)?;
        if entry.is_dir() {
            continue;
        }
        tally.add(entry.size(), budget)?;
    }
    Ok(tally)
}

/// Pre-scan, then stream every surviving member into `staging`
pub fn expand(content: &[u8], staging: &Staging, budget: &ArchiveBudget) -> Result<Vec<StagedMember>> {
    let tally = declared_size(content, budget)?;
    debug!(members = tally.members, declared = tally.total, "zip pre-scan passed");

    let mut archive = ZipArchive::new(Cursor::new(content)).map_err(corrupt)?;
    let mut ledger = budget.ledger();
    let mut members = Vec::new();

    for i in 0..archive.len() {
        staging.check_cancelled()?;

        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(index = i, error = %e, "skipping unreadable zip member");
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }

        let raw_name = entry.name().to_string();
        let Some(relative) = sanitize_member_path(&raw_name) else {
            debug!(index = i, "skipping zip member with empty path");
            continue;
        };
        if is_metadata_entry(&relative) {
            debug!(member = %relative, "skipping metadata entry");
            continue;
        }

        let declared = entry.size();
        match staging.write_member(i, &relative, &mut entry, declared, &mut ledger) {
            Ok(member) => members.push(member),
            Err(e) if e.is_member_local() => {
                warn!(member = %relative, error = %e, "skipping corrupt zip member");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(members)
}
