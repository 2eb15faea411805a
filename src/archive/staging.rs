// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Job-private directory that extracted members are written into

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::budget::ExtractionLedger;
use super::sanitize::{ensure_within, file_name};
use crate::errors::{ExtractError, Result};
use crate::scope::RequestScope;

const COPY_CHUNK: usize = 64 * 1024;

/// One member written to disk, in container order
#[derive(Debug, Clone)]
pub struct StagedMember {
    /// Sanitized path relative to the container root
    pub relative_path: String,
    pub file_name: String,
    pub disk_path: PathBuf,
    pub size: u64,
}

/// Exclusive directory for one archive job.
///
/// Holds the request's scratch root alive as well, so a blocking worker
/// that outlives a cancelled request still writes into an existing tree.
#[derive(Debug, Clone)]
pub struct Staging {
    dir: Arc<TempDir>,
    _root: Arc<TempDir>,
    cancel: CancellationToken,
}

impl Staging {
    pub fn for_job(scope: &RequestScope) -> Result<Self> {
        Ok(Self {
            dir: Arc::new(scope.job_dir("job-")?),
            _root: scope.scratch_handle(),
            cancel: scope.cancel_token(),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(ExtractError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Stream one member to disk, capped at its declared size.
    ///
    /// Members are stored under an index-derived name; the archive-supplied
    /// path only survives as the logical `relative_path`.
    pub fn write_member(
        &self,
        index: usize,
        relative_path: &str,
        reader: &mut dyn Read,
        declared_size: u64,
        ledger: &mut ExtractionLedger,
    ) -> Result<StagedMember> {
        let disk_path = self.dir.path().join(format!("m{:05}", index));
        let mut file = File::create(&disk_path)?;
        let mut limited = reader.take(declared_size.saturating_add(1));
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut written: u64 = 0;

        loop {
            let n = limited
                .read(&mut buf)
                .map_err(|e| ExtractError::CorruptInput(format!("{}: {}", relative_path, e)))?;
            if n == 0 {
                break;
            }
            written += n as u64;
            if written > declared_size {
                return Err(ExtractError::PolicyViolation(format!(
                    "member inflates past its declared size of {} bytes",
                    declared_size
                )));
            }
            ledger.charge(n as u64)?;
            file.write_all(&buf[..n])?;
        }
        file.flush()?;
        drop(file);

        let disk_path = ensure_within(self.dir.path(), &disk_path)?;
        Ok(StagedMember {
            relative_path: relative_path.to_string(),
            file_name: file_name(relative_path).to_string(),
            disk_path,
            size: written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::budget::ArchiveBudget;
    use crate::config::ArchiveLimits;

    #[test]
    fn test_write_member_within_declared_size() {
        let scope = RequestScope::new(None).unwrap();
        let staging = Staging::for_job(&scope).unwrap();
        let mut ledger = ArchiveBudget::top_level(&ArchiveLimits::default()).ledger();

        let mut data: &[u8] = b"hello world";
        let member = staging
            .write_member(0, "docs/hello.txt", &mut data, 11, &mut ledger)
            .unwrap();

        assert_eq!(member.file_name, "hello.txt");
        assert_eq!(member.size, 11);
        assert_eq!(std::fs::read(&member.disk_path).unwrap(), b"hello world");
        assert_eq!(ledger.used(), 11);
    }

    #[test]
    fn test_write_member_rejects_inflation() {
        let scope = RequestScope::new(None).unwrap();
        let staging = Staging::for_job(&scope).unwrap();
        let mut ledger = ArchiveBudget::top_level(&ArchiveLimits::default()).ledger();

        let mut data: &[u8] = &[0u8; 4096];
        let result = staging.write_member(0, "liar.bin", &mut data, 16, &mut ledger);
        assert!(matches!(result, Err(ExtractError::PolicyViolation(_))));
    }

    #[test]
    fn test_write_member_respects_ledger() {
        let scope = RequestScope::new(None).unwrap();
        let staging = Staging::for_job(&scope).unwrap();
        let limits = ArchiveLimits {
            max_extracted_size: 8,
            ..ArchiveLimits::default()
        };
        let mut ledger = ArchiveBudget::top_level(&limits).ledger();

        let mut data: &[u8] = b"0123456789";
        let result = staging.write_member(0, "big.txt", &mut data, 10, &mut ledger);
        assert!(matches!(result, Err(ExtractError::PolicyViolation(_))));
    }
}
