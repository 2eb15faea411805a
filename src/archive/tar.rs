// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Tar family (plain, gzip, bzip2, xz), read in-process as a stream

use std::io::Read;

use bzip2::read::BzDecoder;
use flate2::read::MultiGzDecoder;
use ::tar::Archive;
use tracing::{debug, warn};
use xz2::read::XzDecoder;

use super::budget::{ArchiveBudget, DeclaredTally};
use super::sanitize::{is_metadata_entry, sanitize_member_path};
use super::staging::{StagedMember, Staging};
use crate::errors::{ExtractError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TarCompression {
    None,
    Gzip,
    Bzip2,
    Xz,
}

fn open(content: &[u8], compression: TarCompression) -> Archive<Box<dyn Read + '_>> {
    let reader: Box<dyn Read + '_> = match compression {
        TarCompression::None => Box::new(content),
        TarCompression::Gzip => Box::new(MultiGzDecoder::new(content)),
        TarCompression::Bzip2 => Box::new(BzDecoder::new(content)),
        TarCompression::Xz => Box::new(XzDecoder::new(content)),
    };
    Archive::new(reader)
}

fn corrupt(e: std::io::Error) -> ExtractError {
    ExtractError::CorruptInput(format!("tar: {}", e))
}

/// Walk the headers and sum declared sizes, stopping at the first overrun.
///
/// Skipping a member's data still decompresses it, so stopping early keeps
/// the scan itself bounded by the budget.
pub fn declared_size(
    content: &[u8],
    compression: TarCompression,
    budget: &ArchiveBudget,
) -> Result<DeclaredTally> {
    let mut archive = open(content, compression);
    let mut tally = DeclaredTally::default();
    for entry in archive.entries().map_err(corrupt)? {
        let entry = entry.map_err(corrupt)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let size = entry.header().size().map_err(corrupt)?;
        tally.add(size, budget)?;
    }
    Ok(tally)
}

pub fn expand(
    content: &[u8],
    compression: TarCompression,
    staging: &Staging,
    budget: &ArchiveBudget,
) -> Result<Vec<StagedMember>> {
    let tally = declared_size(content, compression, budget)?;
    debug!(members = tally.members, declared = tally.total, "tar pre-scan passed");

    let mut archive = open(content, compression);
    let mut ledger = budget.ledger();
    let mut members = Vec::new();

    let entries = archive.entries().map_err(corrupt)?;
    for (index, entry) in entries.enumerate() {
        staging.check_cancelled()?;

        let mut entry = entry.map_err(corrupt)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let raw_name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let Some(relative) = sanitize_member_path(&raw_name) else {
            debug!(index, "skipping tar member with empty path");
            continue;
        };
        if is_metadata_entry(&relative) {
            debug!(member = %relative, "skipping metadata entry");
            continue;
        }

        let declared = entry.header().size().map_err(corrupt)?;
        match staging.write_member(index, &relative, &mut entry, declared, &mut ledger) {
            Ok(member) => members.push(member),
            Err(e) if e.is_member_local() => {
                warn!(member = %relative, error = %e, "skipping corrupt tar member");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(members)
}
