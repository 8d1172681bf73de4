//! Store error taxonomy (spec §7: "fail-open on reads, fail-closed on
//! writes"). Read-path inconsistencies are handled inline by skipping
//! missing primaries (§4.3 "Load semantics"); only genuine backend failures
//! reach this enum.

use common_lib::ErrorCode;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("session '{}' not found", session_id))]
    NotFound { session_id: String },

    #[snafu(display("failed to connect to store at '{}': {}", addr, source))]
    Connect {
        addr: String,
        source: redis::RedisError,
    },

    #[snafu(display("store backend error during '{}': {}", op, source))]
    Backend {
        op: String,
        source: redis::RedisError,
    },

    #[snafu(display("failed to serialise session record '{}': {}", session_id, source))]
    Serialise {
        session_id: String,
        source: serde_json::Error,
    },

    #[snafu(display("failed to deserialise session record '{}': {}", session_id, source))]
    Deserialise {
        session_id: String,
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::NotFound { .. } => ErrorCode::SessionNotFound,
            _ => ErrorCode::Internal,
        }
    }
}
