// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Error taxonomy for the extraction pipeline
//!
//! Every failure raised by the unpacker, the sandbox, the fetcher or a
//! format handler ends up as an [`ExtractError`]. Its [`ErrorClass`] decides:
//! - whether a caller may retry,
//! - whether the failure stays isolated to one archive member,
//! - the HTTP status and the public message.
//!
//! Detailed causes go to logs only; public messages never carry internal
//! paths.

use thiserror::Error;

/// Errors that can occur while turning a payload into extraction units
#[derive(Error, Debug)]
pub enum ExtractError {
    /// A size, depth or count limit was hit
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// Extension unknown, or content does not match the declared extension
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Zero-byte payload
    #[error("Empty input: {0}")]
    EmptyInput(String),

    /// Network timeout or connection failure
    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    /// External process killed by its memory or CPU ceiling
    #[error("Resource ceiling exceeded: {0}")]
    ResourceExceeded(String),

    /// Malformed container or document, or a failing converter
    #[error("Corrupt input: {0}")]
    CorruptInput(String),

    /// SSRF target or path escape
    #[error("Security rejection: {0}")]
    SecurityRejection(String),

    /// Outer request or per-stage timeout
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Request was cancelled before completion
    #[error("Cancelled")]
    Cancelled,

    /// Malformed client request (bad base64, missing field)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Unexpected host-side failure
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used for retry, isolation and HTTP mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    PolicyViolation,
    UnsupportedFormat,
    EmptyInput,
    TransientIo,
    ResourceExceeded,
    CorruptInput,
    SecurityRejection,
    Timeout,
    BadRequest,
    Internal,
}

impl ErrorClass {
    /// HTTP status code for this class
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorClass::UnsupportedFormat => 415,
            ErrorClass::PolicyViolation => 413,
            ErrorClass::EmptyInput | ErrorClass::CorruptInput | ErrorClass::ResourceExceeded => {
                422
            }
            ErrorClass::Timeout => 504,
            ErrorClass::SecurityRejection => 403,
            ErrorClass::TransientIo => 502,
            ErrorClass::BadRequest => 400,
            ErrorClass::Internal => 500,
        }
    }

    /// Message safe to return to API clients
    pub fn public_message(&self) -> &'static str {
        match self {
            ErrorClass::PolicyViolation => "File or archive exceeds processing limits.",
            ErrorClass::UnsupportedFormat => "Unsupported file format.",
            ErrorClass::EmptyInput => "File is empty.",
            ErrorClass::TransientIo => "Remote resource could not be retrieved.",
            ErrorClass::ResourceExceeded => "File exceeded processing resource limits.",
            ErrorClass::CorruptInput => "File is corrupted or the format is not supported.",
            ErrorClass::SecurityRejection => "Request was rejected by security policy.",
            ErrorClass::Timeout => "Processing exceeded the time limit.",
            ErrorClass::BadRequest => "Invalid request.",
            ErrorClass::Internal => "Internal processing error.",
        }
    }

    /// Stable code for logs
    pub fn code(&self) -> &'static str {
        match self {
            ErrorClass::PolicyViolation => "POLICY_VIOLATION",
            ErrorClass::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            ErrorClass::EmptyInput => "EMPTY_INPUT",
            ErrorClass::TransientIo => "TRANSIENT_IO",
            ErrorClass::ResourceExceeded => "RESOURCE_EXCEEDED",
            ErrorClass::CorruptInput => "CORRUPT_INPUT",
            ErrorClass::SecurityRejection => "SECURITY_REJECTION",
            ErrorClass::Timeout => "TIMEOUT",
            ErrorClass::BadRequest => "BAD_REQUEST",
            ErrorClass::Internal => "INTERNAL",
        }
    }
}

impl ExtractError {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            ExtractError::PolicyViolation(_) => ErrorClass::PolicyViolation,
            ExtractError::UnsupportedFormat(_) => ErrorClass::UnsupportedFormat,
            ExtractError::EmptyInput(_) => ErrorClass::EmptyInput,
            ExtractError::TransientIo(_) => ErrorClass::TransientIo,
            ExtractError::ResourceExceeded(_) => ErrorClass::ResourceExceeded,
            ExtractError::CorruptInput(_) => ErrorClass::CorruptInput,
            ExtractError::SecurityRejection(_) => ErrorClass::SecurityRejection,
            ExtractError::Timeout(_) | ExtractError::Cancelled => ErrorClass::Timeout,
            ExtractError::BadRequest(_) => ErrorClass::BadRequest,
            ExtractError::Internal(_) => ErrorClass::Internal,
        }
    }

    /// A caller may resubmit the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::TransientIo | ErrorClass::Timeout
        ) && !matches!(self, ExtractError::Cancelled)
    }

    /// Failure stays local to one archive member; siblings continue
    pub fn is_member_local(&self) -> bool {
        matches!(
            self,
            ExtractError::CorruptInput(_)
                | ExtractError::EmptyInput(_)
                | ExtractError::UnsupportedFormat(_)
                | ExtractError::ResourceExceeded(_)
                | ExtractError::Timeout(_)
        )
    }

    pub fn is_security_error(&self) -> bool {
        matches!(self, ExtractError::SecurityRejection(_))
    }

    pub fn status_code(&self) -> u16 {
        self.class().status_code()
    }

    pub fn public_message(&self) -> &'static str {
        self.class().public_message()
    }
}

impl From<std::io::Error> for ExtractError {
    fn from(err: std::io::Error) -> Self {
        ExtractError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ExtractError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            ExtractError::Cancelled
        } else {
            ExtractError::Internal(format!("worker task failed: {}", err))
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
