// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Extraction budget passed down the recursion
//!
//! The budget is an immutable value: a parent hands each child the bytes it
//! has left and the child reports back what it consumed. The ledger is the
//! mutable counterpart used inside one container while members are written.

use crate::config::ArchiveLimits;
use crate::errors::{ExtractError, Result};

/// Members per container before the container is refused
pub const MAX_ARCHIVE_MEMBERS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveBudget {
    pub remaining_bytes: u64,
    pub nesting_level: u32,
    pub max_nesting: u32,
}

impl ArchiveBudget {
    /// Budget for a container received directly from a client
    pub fn top_level(limits: &ArchiveLimits) -> Self {
        Self {
            remaining_bytes: limits.max_extracted_size,
            nesting_level: 0,
            max_nesting: limits.max_nesting,
        }
    }

    /// Refuse containers nested too deep
    pub fn admit(&self) -> Result<()> {
        if self.nesting_level >= self.max_nesting {
            return Err(ExtractError::PolicyViolation(format!(
                "archive nesting depth {} exceeds limit {}",
                self.nesting_level + 1,
                self.max_nesting
            )));
        }
        Ok(())
    }

    /// Pre-scan check: the sum of declared member sizes must fit
    pub fn check_declared(&self, declared_total: u64, members: usize) -> Result<()> {
        if members > MAX_ARCHIVE_MEMBERS {
            return Err(ExtractError::PolicyViolation(format!(
                "archive has {} members, limit is {}",
                members, MAX_ARCHIVE_MEMBERS
            )));
        }
        if declared_total > self.remaining_bytes {
            return Err(ExtractError::PolicyViolation(format!(
                "declared uncompressed size {} exceeds remaining budget {}",
                declared_total, self.remaining_bytes
            )));
        }
        Ok(())
    }

    /// Budget for a container found inside this one after `consumed` bytes
    pub fn child(&self, consumed: u64) -> Self {
        Self {
            remaining_bytes: self.remaining_bytes.saturating_sub(consumed),
            nesting_level: self.nesting_level + 1,
            max_nesting: self.max_nesting,
        }
    }

    pub fn ledger(&self) -> ExtractionLedger {
        ExtractionLedger {
            limit: self.remaining_bytes,
            used: 0,
        }
    }
}

/// Running byte count for one container's extraction pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionLedger {
    limit: u64,
    used: u64,
}

impl ExtractionLedger {
    pub fn charge(&mut self, bytes: u64) -> Result<()> {
        let next = self.used.saturating_add(bytes);
        if next > self.limit {
            return Err(ExtractError::PolicyViolation(format!(
                "extracted size exceeds limit of {} bytes",
                self.limit
            )));
        }
        self.used = next;
        Ok(())
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn remaining(&self) -> u64 {
        self.limit - self.used
    }
}

/// Running declared-size total for a pre-scan that may stop early
#[derive(Debug, Default)]
pub struct DeclaredTally {
    pub total: u64,
    pub members: usize,
}

impl DeclaredTally {
    /// Add one member and fail as soon as the budget is exceeded
    pub fn add(&mut self, size: u64, budget: &ArchiveBudget) -> Result<()> {
        self.total = self.total.saturating_add(size);
        self.members += 1;
        budget.check_declared(self.total, self.members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ArchiveLimits {
        ArchiveLimits {
            max_archive_size: 1024,
            max_extracted_size: 1000,
            max_nesting: 3,
        }
    }

    #[test]
    fn test_nesting_admission() {
        let top = ArchiveBudget::top_level(&limits());
        assert!(top.admit().is_ok());
        let third = top.child(0).child(0);
        assert_eq!(third.nesting_level, 2);
        assert!(third.admit().is_ok());
        assert!(matches!(
            third.child(0).admit(),
            Err(ExtractError::PolicyViolation(_))
        ));
    }

    #[test]
    fn test_child_inherits_remaining_bytes() {
        let top = ArchiveBudget::top_level(&limits());
        let child = top.child(400);
        assert_eq!(child.remaining_bytes, 600);
        assert_eq!(top.child(5000).remaining_bytes, 0);
    }

    #[test]
    fn test_declared_total_checked() {
        let top = ArchiveBudget::top_level(&limits());
        assert!(top.check_declared(1000, 2).is_ok());
        assert!(top.check_declared(1001, 2).is_err());
        assert!(top.check_declared(1, MAX_ARCHIVE_MEMBERS + 1).is_err());
    }

    #[test]
    fn test_tally_stops_early() {
        let top = ArchiveBudget::top_level(&limits());
        let mut tally = DeclaredTally::default();
        assert!(tally.add(600, &top).is_ok());
        assert!(tally.add(600, &top).is_err());
    }

    #[test]
    fn test_ledger_charges() {
        let mut ledger = ArchiveBudget::top_level(&limits()).ledger();
        ledger.charge(999).unwrap();
        assert_eq!(ledger.remaining(), 1);
        assert!(ledger.charge(2).is_err());
        assert_eq!(ledger.used(), 999);
    }
}
