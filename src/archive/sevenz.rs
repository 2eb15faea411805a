// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! 7z containers, read in-process

use std::io::Cursor;

use sevenz_rust::{Password, SevenZReader};
use tracing::{debug, warn};

use super::budget::{ArchiveBudget, DeclaredTally};
use super::sanitize::{is_metadata_entry, sanitize_member_path};
use super::staging::{StagedMember, Staging};
use crate::errors::{ExtractError, Result};

fn open(content: &[u8]) -> Result<SevenZReader<Cursor<&[u8]>>> {
    SevenZReader::new(Cursor::new(content), content.len() as u64, Password::empty()).map_err(|e| {
        let msg = e.to_string();
        if msg.contains("password") || msg.contains("encrypted") {
            ExtractError::CorruptInput("7z: password protected".to_string())
        } else {
            ExtractError::CorruptInput(format!("7z: {}", msg))
        }
    })
}

/// Sum of declared sizes from the archive header
pub fn declared_size(content: &[u8], budget: &ArchiveBudget) -> Result<DeclaredTally> {
    let reader = open(content)?;
    let mut tally = DeclaredTally::default();
    for entry in reader.archive().files.iter().filter(|f| !f.is_directory()) {
        tally.add(entry.size(), budget)?;
    }
    Ok(tally)
}

pub fn expand(content: &[u8], staging: &Staging, budget: &ArchiveBudget) -> Result<Vec<StagedMember>> {
    let tally = declared_size(content, budget)?;
    debug!(members = tally.members, declared = tally.total, "7z pre-scan passed");

    let mut reader = open(content)?;
    let mut ledger = budget.ledger();
    let mut members = Vec::new();
    let mut abort: Option<ExtractError> = None;
    let mut index = 0usize;

    let walk = reader.for_each_entries(|entry, data| {
        let current = index;
        index += 1;

        if let Err(e) = staging.check_cancelled() {
            abort = Some(e);
            return Ok(false);
        }
        if entry.is_directory() {
            return Ok(true);
        }
        let Some(relative) = sanitize_member_path(entry.name()) else {
            debug!(index = current, "skipping 7z member with empty path");
            return Ok(true);
        };
        if is_metadata_entry(&relative) {
            debug!(member = %relative, "skipping metadata entry");
            return Ok(true);
        }

        match staging.write_member(current, &relative, data, entry.size(), &mut ledger) {
            Ok(member) => members.push(member),
            Err(e) if e.is_member_local() => {
                warn!(member = %relative, error = %e, "skipping corrupt 7z member");
            }
            Err(e) => {
                abort = Some(e);
                return Ok(false);
            }
        }
        Ok(true)
    });

    if let Some(e) = abort {
        return Err(e);
    }
    if let Err(e) = walk {
        if members.is_empty() {
            return Err(ExtractError::CorruptInput(format!("7z: {}", e)));
        }
        warn!(error = %e, "7z stream broken, keeping earlier members");
    }

    Ok(members)
}
