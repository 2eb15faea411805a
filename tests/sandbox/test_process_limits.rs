// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Wall-clock, file-size and process-group behavior of the sandbox

#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use rag_extract::{
    config::ResourceLimitsConfig,
    sandbox::{EnforcedLimits, ProcessClass, Sandbox, SandboxError, SandboxInvocation, Unenforced},
    ExtractError,
};

fn enforced() -> Sandbox {
    Sandbox::with_strategy(ResourceLimitsConfig::default(), Arc::new(EnforcedLimits))
}

fn unenforced() -> Sandbox {
    Sandbox::with_strategy(
        ResourceLimitsConfig {
            enabled: false,
            ..ResourceLimitsConfig::default()
        },
        Arc::new(Unenforced),
    )
}

#[tokio::test]
async fn test_sleep_is_killed_at_timeout() {
    for sandbox in [enforced(), unenforced()] {
        let started = Instant::now();
        let err = sandbox
            .run(SandboxInvocation::new(["sleep", "30"], Duration::from_millis(300)))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { .. }), "got {:?}", err);
        assert!(started.elapsed() < Duration::from_secs(5));

        let mapped: ExtractError = err.into();
        assert_eq!(mapped.status_code(), 504);
    }
}

#[tokio::test]
async fn test_stdout_and_exit_code_are_captured() {
    let output = enforced()
        .run(SandboxInvocation::new(["sh", "-c", "echo hello; exit 3"], Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(output.exit_code, 3);
    assert_eq!(output.stdout_lossy().trim(), "hello");
    assert!(matches!(output.success(), Err(SandboxError::NonZeroExit { code: 3, .. })));
}

#[tokio::test]
async fn test_stdin_payload_is_delivered() {
    let output = enforced()
        .run(SandboxInvocation::new(["cat"], Duration::from_secs(5)).stdin(b"piped".to_vec()))
        .await
        .unwrap()
        .success()
        .unwrap();
    assert_eq!(output.stdout, b"piped");
}

#[tokio::test]
async fn test_missing_tool_is_reported() {
    let err = enforced()
        .run(SandboxInvocation::new(
            ["definitely-not-a-real-converter-binary"],
            Duration::from_secs(5),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::ToolMissing { .. }));
}

#[tokio::test]
async fn test_file_size_ceiling_is_resource_exceeded() {
    let dir = tempfile::tempdir().unwrap();
    let invocation = enforced()
        .invocation(
            ProcessClass::Archive,
            ["dd", "if=/dev/zero", "of=out.bin", "bs=1024", "count=1024"],
            Duration::from_secs(10),
        )
        .file_size_ceiling(4096)
        .working_dir(dir.path());

    let err = enforced().run(invocation).await.unwrap_err();
    assert!(matches!(err, SandboxError::ResourceExceeded { .. }), "got {:?}", err);
    let mapped: ExtractError = err.into();
    assert!(matches!(mapped, ExtractError::ResourceExceeded(_)));
}

#[tokio::test]
async fn test_memory_ceiling_is_resource_exceeded() {
    let invocation = enforced()
        .invocation(
            ProcessClass::Ocr,
            ["sh", "-c", "x=$(head -c 200000000 /dev/zero | tr '\\0' a); echo done"],
            Duration::from_secs(20),
        )
        .memory_ceiling(64 * 1024 * 1024);

    let err = enforced().run(invocation).await.unwrap_err();
    assert!(matches!(err, SandboxError::ResourceExceeded { .. }), "got {:?}", err);
    let mapped: ExtractError = err.into();
    assert!(matches!(mapped, ExtractError::ResourceExceeded(_)));
    assert_eq!(mapped.status_code(), 422);
}

#[tokio::test]
async fn test_output_beyond_cap_kills_the_tool() {
    for sandbox in [enforced(), unenforced()] {
        let started = Instant::now();
        let err = sandbox
            .run(
                SandboxInvocation::new(["head", "-c", "300000000", "/dev/zero"], Duration::from_secs(20))
                    .output_cap(1024 * 1024),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ResourceExceeded { .. }), "got {:?}", err);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}

#[tokio::test]
async fn test_output_within_cap_is_kept_whole() {
    let output = enforced()
        .run(
            SandboxInvocation::new(["head", "-c", "4096", "/dev/zero"], Duration::from_secs(5))
                .output_cap(4096),
        )
        .await
        .unwrap()
        .success()
        .unwrap();
    assert_eq!(output.stdout.len(), 4096);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_timeout_kills_grandchildren() {
    let dir = tempfile::tempdir().unwrap();
    let script = "sleep 30 & echo $! > child.pid; wait";
    let err = enforced()
        .run(
            SandboxInvocation::new(["sh", "-c", script], Duration::from_millis(500))
                .working_dir(dir.path()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::Timeout { .. }));

    tokio::time::sleep(Duration::from_millis(200)).await;
    let pid = std::fs::read_to_string(dir.path().join("child.pid")).unwrap();
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid.trim()));
    // Gone, or a zombie waiting for its new parent to reap it.
    match stat {
        Err(_) => {}
        Ok(stat) => {
            let state = stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.split_whitespace().next())
                .unwrap_or("");
            assert_eq!(state, "Z", "grandchild still running: {}", stat);
        }
    }
}
