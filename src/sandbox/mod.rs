// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Resource-bounded execution of external converters
//!
//! Every call spawns a fresh child in its own process group with kernel
//! rlimits (when enabled), waits with a wall-clock bound, and kills the whole
//! group on timeout or cancellation. Nothing persists between calls.

pub mod limits;
pub mod process;

pub use limits::{strategy_for, EnforcedLimits, LimitStrategy, ProcessClass, ProcessLimits, Unenforced};
pub use process::{SandboxError, SandboxInvocation, SandboxOutput};

use std::sync::Arc;
use std::time::Duration;

use crate::config::ResourceLimitsConfig;

/// Shared handle for running converters; cheap to clone
#[derive(Debug, Clone)]
pub struct Sandbox {
    strategy: Arc<dyn LimitStrategy>,
    limits: ResourceLimitsConfig,
}

impl Sandbox {
    /// Build from config, selecting the limit strategy once
    pub fn new(limits: ResourceLimitsConfig) -> Self {
        let strategy = strategy_for(&limits);
        tracing::info!(
            enforced = strategy.enforces(),
            "sandbox resource limit strategy selected"
        );
        Self { strategy, limits }
    }

    /// Build with an explicit strategy
    pub fn with_strategy(limits: ResourceLimitsConfig, strategy: Arc<dyn LimitStrategy>) -> Self {
        Self { strategy, limits }
    }

    pub fn enforces_limits(&self) -> bool {
        self.strategy.enforces()
    }

    /// Invocation pre-filled with the memory ceiling of `class`
    pub fn invocation<I, S>(&self, class: ProcessClass, command: I, timeout: Duration) -> SandboxInvocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SandboxInvocation::new(command, timeout).memory_ceiling(class.memory_ceiling(&self.limits))
    }

    /// Run one invocation to completion, timeout or kill
    pub async fn run(&self, invocation: SandboxInvocation) -> Result<SandboxOutput, SandboxError> {
        process::execute(self.strategy.as_ref(), invocation).await
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(ResourceLimitsConfig::default())
    }
}
