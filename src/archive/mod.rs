// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Recursive archive unpacking with bomb and nesting defense
//!
//! Each container is pre-scanned for declared sizes, then streamed member by
//! member into a job-private staging directory under a byte ledger. Nested
//! containers recurse with a child budget; everything else goes back to the
//! format dispatcher.

pub mod budget;
pub mod rar;
pub mod sanitize;
pub mod sevenz;
pub mod staging;
pub mod tar;
pub mod zip;

pub use budget::{ArchiveBudget, DeclaredTally, ExtractionLedger, MAX_ARCHIVE_MEMBERS};
pub use staging::{StagedMember, Staging};
pub use tar::TarCompression;

use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::config::ArchiveLimits;
use crate::errors::{ExtractError, Result};
use crate::extract::formats::{get_file_extension, Format};
use crate::extract::ExtractionUnit;
use crate::sandbox::Sandbox;
use crate::scope::RequestScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar(TarCompression),
    SevenZ,
    Rar,
}

/// One container to unpack
#[derive(Debug)]
pub struct ArchiveJob {
    pub content: Vec<u8>,
    /// Provenance prefix for members, e.g. `outer.zip/inner.zip`
    pub logical_path: String,
    pub format: ArchiveFormat,
}

#[derive(Debug, Default)]
pub struct UnpackOutcome {
    pub units: Vec<ExtractionUnit>,
    /// Bytes written for this container and every container below it
    pub consumed_bytes: u64,
}

/// Turns one non-archive member into text
#[async_trait]
pub trait MemberDispatcher: Send + Sync {
    async fn extract_member(
        &self,
        content: Vec<u8>,
        file_name: &str,
        format: Format,
        scope: &RequestScope,
    ) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct ArchiveUnpacker {
    limits: ArchiveLimits,
    sandbox: Sandbox,
    stage_timeout: Duration,
}

impl ArchiveUnpacker {
    pub fn new(limits: ArchiveLimits, sandbox: Sandbox, stage_timeout: Duration) -> Self {
        Self {
            limits,
            sandbox,
            stage_timeout,
        }
    }

    pub fn limits(&self) -> &ArchiveLimits {
        &self.limits
    }

    /// Budget for a container received directly from a client
    pub fn top_level_budget(&self) -> ArchiveBudget {
        ArchiveBudget::top_level(&self.limits)
    }

    /// Unpack one container and everything nested inside it.
    ///
    /// Member-local failures skip the member; policy, security, cancellation
    /// and internal failures abort the whole tree.
    pub fn unpack<'a>(
        &'a self,
        job: ArchiveJob,
        budget: ArchiveBudget,
        dispatcher: &'a dyn MemberDispatcher,
        scope: &'a RequestScope,
    ) -> BoxFuture<'a, Result<UnpackOutcome>> {
        Box::pin(async move {
            budget.admit()?;
            scope.check_cancelled()?;
            if job.content.len() as u64 > self.limits.max_archive_size {
                return Err(ExtractError::PolicyViolation(format!(
                    "archive {} is {} bytes, limit is {}",
                    job.logical_path,
                    job.content.len(),
                    self.limits.max_archive_size
                )));
            }

            let staging = Staging::for_job(scope)?;
            let staged = self.expand(job.content, job.format, &staging, &budget).await?;
            let mut consumed: u64 = staged.iter().map(|m| m.size).sum();
            info!(
                archive = %job.logical_path,
                members = staged.len(),
                bytes = consumed,
                depth = budget.nesting_level,
                "archive expanded"
            );

            let mut units = Vec::new();
            for member in staged {
                scope.check_cancelled()?;
                let logical = format!("{}/{}", job.logical_path, member.relative_path);

                let Some(ext) = get_file_extension(&member.file_name) else {
                    debug!(member = %logical, "skipping member without extension");
                    continue;
                };
                let Some(format) = Format::from_extension(&ext) else {
                    debug!(member = %logical, ext = %ext, "skipping unsupported member");
                    continue;
                };
                if member.size == 0 {
                    debug!(member = %logical, "skipping empty member");
                    continue;
                }

                let content = tokio::fs::read(&member.disk_path).await?;
                if let Err(e) = tokio::fs::remove_file(&member.disk_path).await {
                    debug!(member = %logical, error = %e, "staged member not removed");
                }

                match format {
                    Format::Archive(nested) => {
                        let child = ArchiveJob {
                            content,
                            logical_path: logical.clone(),
                            format: nested,
                        };
                        match self
                            .unpack(child, budget.child(consumed), dispatcher, scope)
                            .await
                        {
                            Ok(outcome) => {
                                consumed = consumed.saturating_add(outcome.consumed_bytes);
                                units.extend(outcome.units);
                            }
                            Err(e) if e.is_member_local() => {
                                warn!(member = %logical, error = %e, "skipping nested archive");
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    format => {
                        match dispatcher
                            .extract_member(content, &member.file_name, format, scope)
                            .await
                        {
                            Ok(text) if !text.trim().is_empty() => units.push(ExtractionUnit::new(
                                member.file_name.clone(),
                                logical,
                                member.size,
                                ext,
                                text,
                            )),
                            Ok(_) => debug!(member = %logical, "member produced no text"),
                            Err(e) if e.is_member_local() => {
                                warn!(member = %logical, error = %e, "skipping member");
                            }
                            Err(e) => return Err(e),
                        }
                    }
                }
            }

            Ok(UnpackOutcome {
                units,
                consumed_bytes: consumed,
            })
        })
    }

    async fn expand(
        &self,
        content: Vec<u8>,
        format: ArchiveFormat,
        staging: &Staging,
        budget: &ArchiveBudget,
    ) -> Result<Vec<StagedMember>> {
        let budget = *budget;
        match format {
            ArchiveFormat::Rar => {
                rar::expand(&self.sandbox, &content, staging, &budget, self.stage_timeout).await
            }
            ArchiveFormat::Zip => {
                let staging = staging.clone();
                tokio::task::spawn_blocking(move || zip::expand(&content, &staging, &budget)).await?
            }
            ArchiveFormat::Tar(compression) => {
                let staging = staging.clone();
                tokio::task::spawn_blocking(move || {
                    tar::expand(&content, compression, &staging, &budget)
                })
                .await?
            }
            ArchiveFormat::SevenZ => {
                let staging = staging.clone();
                tokio::task::spawn_blocking(move || sevenz::expand(&content, &staging, &budget))
                    .await?
            }
        }
    }
}
