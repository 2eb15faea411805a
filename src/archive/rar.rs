// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! RAR containers, listed with `lsar` and unpacked with `unar` in the sandbox
//!
//! The listing gives declared sizes for the pre-scan. `unar` then runs with
//! RLIMIT_FSIZE set to the remaining budget, and the written tree is walked
//! and re-measured before anything is dispatched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use super::budget::{ArchiveBudget, DeclaredTally};
use super::sanitize::{ensure_within, file_name, is_metadata_entry, sanitize_member_path};
use super::staging::{StagedMember, Staging};
use crate::errors::{ExtractError, Result};
use crate::sandbox::{ProcessClass, Sandbox};

/// One file from the `lsar -j` listing
#[derive(Debug, Clone, PartialEq)]
pub struct ListedEntry {
    pub name: String,
    pub size: u64,
    pub encrypted: bool,
}

/// Parse `lsar -j` output, skipping directories
pub fn parse_listing(json: &str) -> Result<Vec<ListedEntry>> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| ExtractError::CorruptInput(format!("rar listing: {}", e)))?;
    let entries = value["lsarContents"]
        .as_array()
        .ok_or_else(|| ExtractError::CorruptInput("rar listing has no contents".to_string()))?;

    Ok(entries
        .iter()
        .filter(|entry| {
            entry["XADFileType"].as_str() != Some("Directory")
                && !entry["XADIsDirectory"].as_bool().unwrap_or(false)
        })
        .map(|entry| ListedEntry {
            name: entry["XADFileName"].as_str().unwrap_or_default().to_string(),
            size: entry["XADFileSize"].as_u64().unwrap_or(0),
            encrypted: entry["XADIsEncrypted"].as_bool().unwrap_or(false),
        })
        .collect())
}

pub async fn expand(
    sandbox: &Sandbox,
    content: &[u8],
    staging: &Staging,
    budget: &ArchiveBudget,
    stage_timeout: Duration,
) -> Result<Vec<StagedMember>> {
    let source = staging.path().join("source.rar");
    let out_dir = staging.path().join("out");
    tokio::fs::write(&source, content).await?;
    tokio::fs::create_dir(&out_dir).await?;
    let source_arg = source.to_string_lossy().into_owned();

    let listing = sandbox
        .run(sandbox.invocation(
            ProcessClass::Archive,
            ["lsar", "-j", source_arg.as_str()],
            stage_timeout,
        ))
        .await?
        .success()?;
    let listed = parse_listing(&listing.stdout_lossy())?;

    let mut tally = DeclaredTally::default();
    for entry in &listed {
        tally.add(entry.size, budget)?;
    }
    if listed.iter().all(|e| e.encrypted) && !listed.is_empty() {
        return Err(ExtractError::CorruptInput("rar: password protected".to_string()));
    }
    debug!(members = tally.members, declared = tally.total, "rar pre-scan passed");

    staging.check_cancelled()?;
    let out_arg = out_dir.to_string_lossy().into_owned();
    sandbox
        .run(
            sandbox
                .invocation(
                    ProcessClass::Archive,
                    [
                        "unar",
                        "-q",
                        "-no-recursion",
                        "-D",
                        "-f",
                        "-o",
                        out_arg.as_str(),
                        source_arg.as_str(),
                    ],
                    stage_timeout,
                )
                .file_size_ceiling(budget.remaining_bytes.max(1)),
        )
        .await?
        .success()?;
    if let Err(e) = tokio::fs::remove_file(&source).await {
        debug!(error = %e, "rar source copy not removed");
    }

    let order: HashMap<String, usize> = listed
        .iter()
        .enumerate()
        .filter_map(|(i, e)| sanitize_member_path(&e.name).map(|n| (n, i)))
        .collect();
    let budget = *budget;
    tokio::task::spawn_blocking(move || collect_tree(&out_dir, &order, &budget)).await?
}

/// Walk what `unar` wrote, in listing order, re-checking size and location
fn collect_tree(
    out_dir: &Path,
    order: &HashMap<String, usize>,
    budget: &ArchiveBudget,
) -> Result<Vec<StagedMember>> {
    let mut found: Vec<(String, PathBuf)> = Vec::new();
    walk(out_dir, out_dir, &mut found)?;
    found.sort_by(|(a, _), (b, _)| {
        let ka = order.get(a).copied().unwrap_or(usize::MAX);
        let kb = order.get(b).copied().unwrap_or(usize::MAX);
        ka.cmp(&kb).then_with(|| a.cmp(b))
    });

    let mut ledger = budget.ledger();
    let mut members = Vec::new();
    for (relative, path) in found {
        if is_metadata_entry(&relative) {
            debug!(member = %relative, "skipping metadata entry");
            continue;
        }
        let disk_path = ensure_within(out_dir, &path)?;
        let size = std::fs::metadata(&disk_path)?.len();
        ledger.charge(size)?;
        members.push(StagedMember {
            file_name: file_name(&relative).to_string(),
            relative_path: relative,
            disk_path,
            size,
        });
    }
    Ok(members)
}

fn walk(root: &Path, dir: &Path, found: &mut Vec<(String, PathBuf)>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let meta = std::fs::symlink_metadata(&path)?;
        if meta.file_type().is_symlink() {
            warn!("skipping symlink written by unar");
            continue;
        }
        if meta.is_dir() {
            walk(root, &path, found)?;
        } else if meta.is_file() {
            let raw = path
                .strip_prefix(root)
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            if let Some(relative) = sanitize_member_path(&raw) {
                found.push((relative, path));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listing() {
        let json = r#"{
            "lsarFormatName": "RAR 5",
            "lsarContents": [
                {"XADFileName": "docs", "XADFileType": "Directory"},
                {"XADFileName": "docs/a.txt", "XADFileSize": 12},
                {"XADFileName": "b.pdf", "XADFileSize": 3400, "XADIsEncrypted": true}
            ]
        }"#;
        let listed = parse_listing(json).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "docs/a.txt");
        assert_eq!(listed[0].size, 12);
        assert!(listed[1].encrypted);
    }

    #[test]
    fn test_parse_listing_rejects_garbage() {
        assert!(matches!(
            parse_listing("not json"),
            Err(ExtractError::CorruptInput(_))
        ));
    }

    #[test]
    fn test_collect_tree_orders_by_listing_and_charges_budget() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/a.txt"), b"alpha").unwrap();
        std::fs::write(dir.path().join("z.txt"), b"zulu").unwrap();
        std::fs::write(dir.path().join(".DS_Store"), b"junk").unwrap();

        let order: HashMap<String, usize> =
            [("z.txt".to_string(), 0), ("docs/a.txt".to_string(), 1)].into();
        let budget = ArchiveBudget {
            remaining_bytes: 100,
            nesting_level: 0,
            max_nesting: 3,
        };
        let members = collect_tree(dir.path(), &order, &budget).unwrap();
        let names: Vec<_> = members.iter().map(|m| m.relative_path.as_str()).collect();
        assert_eq!(names, vec!["z.txt", "docs/a.txt"]);

        let tight = ArchiveBudget {
            remaining_bytes: 6,
            ..budget
        };
        assert!(matches!(
            collect_tree(dir.path(), &order, &tight),
            Err(ExtractError::PolicyViolation(_))
        ));
    }
}
