// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! One bounded child process: spawn, wait, kill, classify

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use super::limits::{LimitStrategy, ProcessLimits};
use crate::errors::ExtractError;

/// Longest stderr excerpt carried in an error
const STDERR_EXCERPT: usize = 2000;

/// Default cap on bytes read from each of stdout and stderr
pub const DEFAULT_OUTPUT_CAP: u64 = 64 * 1024 * 1024;

/// Shell-style exit codes for a child that died by SIGSEGV, SIGABRT or SIGBUS
#[cfg(unix)]
const CRASH_EXIT_CODES: &[i32] = &[128 + libc::SIGSEGV, 128 + libc::SIGABRT, 128 + libc::SIGBUS];

/// Markers converters print when an allocation fails under RLIMIT_AS
const ALLOC_FAILURE_MARKERS: &[&str] = &[
    "cannot allocate",
    "out of memory",
    "bad_alloc",
    "memory allocation failed",
    "memoryerror",
];

/// Errors from running an external tool
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Binary not found on PATH
    #[error("Tool not installed: {tool}")]
    ToolMissing { tool: String },

    /// Wall-clock timeout; the whole process group was killed
    #[error("{tool} timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u128 },

    /// Killed by a memory, CPU or file-size ceiling
    #[error("{tool} exceeded its resource ceiling: {reason}")]
    ResourceExceeded { tool: String, reason: String },

    /// Exited non-zero for any other reason
    #[error("{tool} exited with status {code}: {stderr}")]
    NonZeroExit {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("Empty command")]
    EmptyCommand,

    #[error("Failed to run {tool}: {source}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<SandboxError> for ExtractError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::ToolMissing { tool } => {
                warn!(tool = %tool, "external tool missing");
                ExtractError::CorruptInput(format!("converter unavailable: {}", tool))
            }
            SandboxError::Timeout { .. } => ExtractError::Timeout(err.to_string()),
            SandboxError::ResourceExceeded { .. } => {
                ExtractError::ResourceExceeded(err.to_string())
            }
            SandboxError::NonZeroExit { .. } => ExtractError::CorruptInput(err.to_string()),
            SandboxError::EmptyCommand => ExtractError::Internal(err.to_string()),
            SandboxError::Io { .. } => ExtractError::Internal(err.to_string()),
        }
    }
}

/// A single request to run a tool; consumed by [`super::Sandbox::run`]
#[derive(Debug, Clone)]
pub struct SandboxInvocation {
    pub command: Vec<String>,
    pub timeout: Duration,
    /// Address-space ceiling in bytes
    pub memory_ceiling: Option<u64>,
    /// CPU seconds; `ceil(timeout) + 1` when unset
    pub cpu_ceiling: Option<u64>,
    /// RLIMIT_FSIZE for tools that write files
    pub file_size_ceiling: Option<u64>,
    pub stdin: Option<Vec<u8>>,
    pub working_dir: Option<PathBuf>,
    /// Bytes kept per output pipe before the group is killed
    pub output_cap: u64,
}

impl SandboxInvocation {
    pub fn new<I, S>(command: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            timeout,
            memory_ceiling: None,
            cpu_ceiling: None,
            file_size_ceiling: None,
            stdin: None,
            working_dir: None,
            output_cap: DEFAULT_OUTPUT_CAP,
        }
    }

    pub fn memory_ceiling(mut self, bytes: u64) -> Self {
        self.memory_ceiling = Some(bytes);
        self
    }

    pub fn cpu_ceiling(mut self, secs: u64) -> Self {
        self.cpu_ceiling = Some(secs);
        self
    }

    pub fn file_size_ceiling(mut self, bytes: u64) -> Self {
        self.file_size_ceiling = Some(bytes);
        self
    }

    pub fn stdin(mut self, payload: Vec<u8>) -> Self {
        self.stdin = Some(payload);
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn output_cap(mut self, bytes: u64) -> Self {
        self.output_cap = bytes;
        self
    }

    /// Program name, for logs and errors
    pub fn tool(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("<none>")
    }

    pub(crate) fn limits(&self) -> ProcessLimits {
        let derived_cpu = self.timeout.as_secs() + u64::from(self.timeout.subsec_nanos() > 0) + 1;
        ProcessLimits {
            memory_bytes: self.memory_ceiling,
            cpu_secs: Some(self.cpu_ceiling.unwrap_or(derived_cpu)),
            file_size_bytes: self.file_size_ceiling,
        }
    }
}

/// Captured result of a process that exited on its own
#[derive(Debug, Clone)]
pub struct SandboxOutput {
    pub tool: String,
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl SandboxOutput {
    /// Turn a non-zero exit into [`SandboxError::NonZeroExit`]
    pub fn success(self) -> Result<Self, SandboxError> {
        if self.exit_code == 0 {
            Ok(self)
        } else {
            Err(SandboxError::NonZeroExit {
                tool: self.tool.clone(),
                code: self.exit_code,
                stderr: stderr_excerpt(&self.stderr),
            })
        }
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Kills the child's process group when dropped unless disarmed
struct GroupGuard {
    pgid: Option<i32>,
}

impl GroupGuard {
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

#[cfg(unix)]
pub(crate) fn kill_group(pgid: i32) {
    if pgid > 0 {
        // Safety: plain syscall; ESRCH for an already-gone group is ignored.
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
pub(crate) fn kill_group(_pgid: i32) {}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    match trimmed.char_indices().nth(STDERR_EXCERPT) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

fn looks_like_alloc_failure(stderr: &[u8]) -> bool {
    let text = String::from_utf8_lossy(stderr).to_lowercase();
    ALLOC_FAILURE_MARKERS.iter().any(|m| text.contains(m))
}

/// Why waiting on the child stopped early
enum WaitFailure {
    Io(std::io::Error),
    OutputCap(&'static str),
}

/// Drain one pipe, failing once it yields more than `cap` bytes
async fn read_capped<R>(pipe: Option<R>, cap: u64, stream: &'static str) -> Result<Vec<u8>, WaitFailure>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(pipe) = pipe {
        pipe.take(cap.saturating_add(1))
            .read_to_end(&mut buf)
            .await
            .map_err(WaitFailure::Io)?;
        if buf.len() as u64 > cap {
            return Err(WaitFailure::OutputCap(stream));
        }
    }
    Ok(buf)
}

/// Spawn, wait with a wall-clock bound, and classify the outcome
pub(crate) async fn execute(
    strategy: &dyn LimitStrategy,
    invocation: SandboxInvocation,
) -> Result<SandboxOutput, SandboxError> {
    let (program, args) = invocation
        .command
        .split_first()
        .ok_or(SandboxError::EmptyCommand)?;
    let tool = program.clone();

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);
    if let Some(dir) = &invocation.working_dir {
        cmd.current_dir(dir);
    }
    strategy.apply(&mut cmd, invocation.limits());

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SandboxError::ToolMissing { tool: tool.clone() }
        } else {
            SandboxError::Io {
                tool: tool.clone(),
                source: e,
            }
        }
    })?;

    let mut guard = GroupGuard {
        pgid: child.id().map(|pid| pid as i32),
    };

    if let (Some(payload), Some(mut stdin)) = (invocation.stdin, child.stdin.take()) {
        tokio::spawn(async move {
            // A tool that stops reading early closes the pipe; that is not our error.
            let _ = stdin.write_all(&payload).await;
            let _ = stdin.shutdown().await;
        });
    }

    debug!(tool = %tool, timeout_ms = invocation.timeout.as_millis() as u64, "sandbox spawn");

    let cap = invocation.output_cap;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let waited = tokio::time::timeout(invocation.timeout, async {
        tokio::try_join!(
            read_capped(stdout, cap, "stdout"),
            read_capped(stderr, cap, "stderr"),
            async { child.wait().await.map_err(WaitFailure::Io) },
        )
    })
    .await;

    let output = match waited {
        Ok(Ok((stdout, stderr, status))) => std::process::Output {
            status,
            stdout,
            stderr,
        },
        Ok(Err(WaitFailure::Io(e))) => {
            return Err(SandboxError::Io { tool, source: e });
        }
        Ok(Err(WaitFailure::OutputCap(stream))) => {
            warn!(tool = %tool, stream, cap, "sandbox output cap hit, killing process group");
            drop(guard);
            return Err(SandboxError::ResourceExceeded {
                tool,
                reason: format!("{} exceeded {} bytes", stream, cap),
            });
        }
        Err(_) => {
            // Dropping the wait future killed the leader; the guard takes the group.
            warn!(tool = %tool, "sandbox timeout, killing process group");
            drop(guard);
            return Err(SandboxError::Timeout {
                tool,
                timeout_ms: invocation.timeout.as_millis(),
            });
        }
    };
    guard.disarm();

    let memory_limited = strategy.enforces() && invocation.memory_ceiling.is_some();
    classify(tool, output, strategy.enforces(), memory_limited)
}

/// Map an exit status to an outcome.
///
/// Under an address-space ceiling a failed allocation usually ends in
/// SIGSEGV, SIGABRT or SIGBUS with nothing on stderr, so those signals (and
/// the shell's `128 + signal` codes for them) count as the ceiling.
fn classify(
    tool: String,
    output: std::process::Output,
    limits_enforced: bool,
    memory_limited: bool,
) -> Result<SandboxOutput, SandboxError> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = output.status.signal() {
            let reason = match signal {
                libc::SIGKILL => Some("killed (memory ceiling)"),
                libc::SIGXCPU => Some("CPU time ceiling"),
                libc::SIGXFSZ => Some("file size ceiling"),
                libc::SIGSEGV | libc::SIGABRT | libc::SIGBUS
                    if memory_limited
                        || (limits_enforced && looks_like_alloc_failure(&output.stderr)) =>
                {
                    Some("allocation failure under memory ceiling")
                }
                _ => None,
            };
            if let Some(reason) = reason {
                warn!(tool = %tool, signal, "sandbox resource ceiling hit");
                return Err(SandboxError::ResourceExceeded {
                    tool,
                    reason: reason.to_string(),
                });
            }
            return Err(SandboxError::NonZeroExit {
                tool,
                code: 128 + signal,
                stderr: stderr_excerpt(&output.stderr),
            });
        }
    }

    let exit_code = output.status.code().unwrap_or(-1);
    #[cfg(unix)]
    let crashed = memory_limited && CRASH_EXIT_CODES.contains(&exit_code);
    #[cfg(not(unix))]
    let crashed = false;
    if exit_code != 0 && (crashed || (limits_enforced && looks_like_alloc_failure(&output.stderr))) {
        warn!(tool = %tool, exit_code, "sandbox allocation failure");
        return Err(SandboxError::ResourceExceeded {
            tool,
            reason: "allocation failure under memory ceiling".to_string(),
        });
    }

    debug!(tool = %tool, exit_code, stdout_bytes = output.stdout.len(), "sandbox exit");
    Ok(SandboxOutput {
        tool,
        exit_code,
        stdout: output.stdout,
        stderr: output.stderr,
    })
}
