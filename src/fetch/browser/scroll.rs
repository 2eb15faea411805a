// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Bounded scroll loop for lazily loaded pages

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::Result;

/// Height reads in a row that must match before the page counts as settled
pub const STABLE_READS: usize = 2;
/// Growth over the initial height at which scrolling stops
pub const GROWTH_FACTOR: u64 = 10;

/// The two page operations the loop needs
#[async_trait]
pub trait ScrollablePage: Send + Sync {
    async fn scroll_height(&self) -> Result<u64>;
    async fn scroll_to_bottom(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ScrollPolicy {
    pub max_attempts: usize,
    pub stable_reads: usize,
    pub growth_factor: u64,
    /// Pause after each scroll for new content to load
    pub settle: Duration,
}

impl ScrollPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            stable_reads: STABLE_READS,
            growth_factor: GROWTH_FACTOR,
            settle: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Stable,
    GrowthCap,
    MaxAttempts,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollReport {
    pub iterations: usize,
    pub initial_height: u64,
    pub final_height: u64,
    pub stop: StopReason,
}

/// Scroll until the height settles, grows past the cap, or attempts run out.
///
/// Always terminates within `max_attempts` iterations.
pub async fn scroll_until_settled(
    page: &dyn ScrollablePage,
    policy: &ScrollPolicy,
) -> Result<ScrollReport> {
    let initial = page.scroll_height().await?;
    let cap = initial.max(1).saturating_mul(policy.growth_factor);
    let mut last = initial;
    let mut unchanged = 0usize;

    for attempt in 1..=policy.max_attempts {
        page.scroll_to_bottom().await?;
        if !policy.settle.is_zero() {
            tokio::time::sleep(policy.settle).await;
        }
        let height = page.scroll_height().await?;
        debug!(attempt, height, "scrolled");

        if height == last {
            unchanged += 1;
        } else {
            unchanged = 0;
        }
        last = height;

        let stop = if unchanged >= policy.stable_reads {
            Some(StopReason::Stable)
        } else if height > cap {
            Some(StopReason::GrowthCap)
        } else {
            None
        };
        if let Some(stop) = stop {
            return Ok(ScrollReport {
                iterations: attempt,
                initial_height: initial,
                final_height: height,
                stop,
            });
        }
    }

    Ok(ScrollReport {
        iterations: policy.max_attempts,
        initial_height: initial,
        final_height: last,
        stop: StopReason::MaxAttempts,
    })
}
