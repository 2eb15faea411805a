// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Resource-limit strategies applied to a child before exec

use std::fmt::Debug;

use tokio::process::Command;

use crate::config::ResourceLimitsConfig;

const MB: u64 = 1024 * 1024;

/// Kernel ceilings for one child process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLimits {
    /// Address-space ceiling in bytes
    pub memory_bytes: Option<u64>,
    /// CPU-time ceiling in seconds
    pub cpu_secs: Option<u64>,
    /// Largest file the child may write, in bytes
    pub file_size_bytes: Option<u64>,
}

/// Converter families, each with its own memory ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessClass {
    Ocr,
    Pdf,
    Office,
    Archive,
}

impl ProcessClass {
    /// Memory ceiling in bytes for this class
    pub fn memory_ceiling(&self, config: &ResourceLimitsConfig) -> u64 {
        let mb = match self {
            ProcessClass::Ocr => config.ocr_memory_mb,
            ProcessClass::Pdf => config.pdf_memory_mb,
            ProcessClass::Office => config.office_memory_mb,
            ProcessClass::Archive => config.archive_memory_mb,
        };
        mb.saturating_mul(MB)
    }
}

/// How limits get attached to a command
pub trait LimitStrategy: Send + Sync + Debug {
    /// Configure `cmd` so the child starts in its own process group with
    /// `limits` applied
    fn apply(&self, cmd: &mut Command, limits: ProcessLimits);

    /// Whether kernel limits are in force
    fn enforces(&self) -> bool;
}

/// Kernel-enforced rlimits via `setrlimit` in the forked child
#[derive(Debug, Default, Clone, Copy)]
pub struct EnforcedLimits;

/// Timeout-only fallback; the child still gets its own process group
#[derive(Debug, Default, Clone, Copy)]
pub struct Unenforced;

impl LimitStrategy for EnforcedLimits {
    fn apply(&self, cmd: &mut Command, limits: ProcessLimits) {
        #[cfg(unix)]
        {
            // Safety: the closure runs between fork and exec and only calls
            // async-signal-safe libc functions.
            unsafe {
                cmd.pre_exec(move || {
                    if libc::setpgid(0, 0) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    apply_rlimits(limits)
                });
            }
        }
        #[cfg(not(unix))]
        {
            let _ = (cmd, limits);
        }
    }

    fn enforces(&self) -> bool {
        cfg!(unix)
    }
}

impl LimitStrategy for Unenforced {
    fn apply(&self, cmd: &mut Command, _limits: ProcessLimits) {
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }
        #[cfg(not(unix))]
        {
            let _ = cmd;
        }
    }

    fn enforces(&self) -> bool {
        false
    }
}

/// Pick the strategy once at startup
pub fn strategy_for(config: &ResourceLimitsConfig) -> std::sync::Arc<dyn LimitStrategy> {
    if config.enabled && cfg!(unix) {
        std::sync::Arc::new(EnforcedLimits)
    } else {
        std::sync::Arc::new(Unenforced)
    }
}

#[cfg(unix)]
fn apply_rlimits(limits: ProcessLimits) -> std::io::Result<()> {
    macro_rules! set_limit {
        ($resource:expr, $value:expr) => {{
            let value = $value as libc::rlim_t;
            let rlim = libc::rlimit {
                rlim_cur: value,
                rlim_max: value,
            };
            if libc::setrlimit($resource, &rlim) != 0 {
                return Err(std::io::Error::last_os_error());
            }
        }};
    }

    unsafe {
        set_limit!(libc::RLIMIT_CORE, 0u64);
        if let Some(bytes) = limits.memory_bytes {
            set_limit!(libc::RLIMIT_AS, bytes);
        }
        if let Some(secs) = limits.cpu_secs {
            set_limit!(libc::RLIMIT_CPU, secs);
        }
        if let Some(bytes) = limits.file_size_bytes {
            set_limit!(libc::RLIMIT_FSIZE, bytes);
        }
    }
    Ok(())
}
