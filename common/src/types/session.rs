//! The session record (spec §3 "Session record") owned by the core and
//! persisted in `SessionStore`.

use crate::principal::Principal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direct creation vs warm-pool claim-bind (spec glossary "Warm pool / claim").
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SessionKind {
    Direct,
    ClaimBacked { claim_name: String },
}

/// `creating` -> `running`, per invariant I4. Never revived once deleted.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Creating,
    Running,
}

/// A `{path, protocol, endpoint}` triple reachable by callers (glossary
/// "Entry-point").
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub path: String,
    pub protocol: String,
    pub endpoint: String,
}

/// The core's logical handle for one sandbox.
///
/// Constructed twice per successful create: once as a `Creating` placeholder
/// before the declarative object exists (so GC can reclaim it, invariant I4),
/// and once more, via `Update`, as `Running` with the resolved entry-points.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    pub kind: SessionKind,
    pub sandbox_id: String,
    pub sandbox_name: String,
    pub sandbox_namespace: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub entry_points: Vec<EntryPoint>,
    pub status: SessionStatus,
    pub creator_principal: Principal,
}

impl SessionRecord {
    /// Builds the `creating` placeholder written before the declarative
    /// object exists (pipeline step 4).
    pub fn placeholder(
        session_id: String,
        kind: SessionKind,
        sandbox_id: String,
        sandbox_name: String,
        sandbox_namespace: String,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
        creator_principal: Principal,
    ) -> Self {
        Self {
            kind,
            sandbox_id,
            sandbox_name,
            sandbox_namespace,
            session_id,
            created_at: now,
            expires_at: now + ttl,
            last_activity: now,
            entry_points: Vec::new(),
            status: SessionStatus::Creating,
            creator_principal,
        }
    }

    /// Promotes a placeholder to `running` with resolved entry-points
    /// (pipeline step 9).
    pub fn commit(&mut self, entry_points: Vec<EntryPoint>) {
        self.entry_points = entry_points;
        self.status = SessionStatus::Running;
    }
}
