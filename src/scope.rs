// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Per-request scratch space and cancellation
//!
//! A scope owns the private temp tree of one top-level request. Blocking
//! workers hold a clone of the `Arc<TempDir>`, so the tree is removed once the
//! request and every worker it spawned have let go of it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::{ExtractError, Result};

#[derive(Debug, Clone)]
pub struct RequestScope {
    pub id: Uuid,
    scratch: Arc<TempDir>,
    cancel: CancellationToken,
}

impl RequestScope {
    /// Create a scope with a fresh private directory under `parent`
    /// (system temp when `None`)
    pub fn new(parent: Option<&Path>) -> Result<Self> {
        let id = Uuid::new_v4();
        let mut builder = tempfile::Builder::new();
        builder.prefix("rag-extract-");
        let scratch = match parent {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        }
        .map_err(|e| ExtractError::Internal(format!("scratch dir: {}", e)))?;

        Ok(Self {
            id,
            scratch: Arc::new(scratch),
            cancel: CancellationToken::new(),
        })
    }

    pub fn scratch_path(&self) -> &Path {
        self.scratch.path()
    }

    pub fn scratch_handle(&self) -> Arc<TempDir> {
        Arc::clone(&self.scratch)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(ExtractError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Create a job directory inside the scratch tree
    pub fn job_dir(&self, prefix: &str) -> Result<TempDir> {
        tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(self.scratch.path())
            .map_err(|e| ExtractError::Internal(format!("job dir: {}", e)))
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch.path().to_path_buf()
    }
}
