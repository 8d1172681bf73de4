//! The error-code vocabulary surfaced over HTTP (spec §6/§7).
//!
//! Every crate's own `snafu` error enum maps into one of these through a
//! `code()` method; the HTTP layer in `agent::http` is the only place that
//! turns a `code()` into a status line and a JSON body.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable string identifiers returned in the `error` field of an HTTP error
/// body. Never reordered or renamed once shipped: clients match on these.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    InvalidRequest,
    Forbidden,
    WorkloadNotFound,
    SessionNotFound,
    DependencyMissing,
    SandboxCreateFailed,
    SandboxTimeout,
    SandboxInitFailed,
    CommitFailed,
    Internal,
}

impl ErrorCode {
    /// The HTTP status line this code is always reported under.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorCode::Unauthorized => 401,
            ErrorCode::InvalidRequest => 400,
            ErrorCode::Forbidden => 403,
            ErrorCode::WorkloadNotFound | ErrorCode::SessionNotFound => 404,
            ErrorCode::DependencyMissing => 503,
            ErrorCode::SandboxCreateFailed
            | ErrorCode::SandboxTimeout
            | ErrorCode::SandboxInitFailed
            | ErrorCode::CommitFailed
            | ErrorCode::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::WorkloadNotFound => "WORKLOAD_NOT_FOUND",
            ErrorCode::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorCode::DependencyMissing => "DEPENDENCY_MISSING",
            ErrorCode::SandboxCreateFailed => "SANDBOX_CREATE_FAILED",
            ErrorCode::SandboxTimeout => "SANDBOX_TIMEOUT",
            ErrorCode::SandboxInitFailed => "SANDBOX_INIT_FAILED",
            ErrorCode::CommitFailed => "COMMIT_FAILED",
            ErrorCode::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}
