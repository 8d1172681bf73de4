//! The `SessionStore` operation set (spec §4.3 table).

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_lib::types::SessionRecord;

/// A sorted, indexed key-value store. Each operation is atomic with respect
/// to its own keys (spec §4.3); across operations the index and primary are
/// eventually consistent and readers must tolerate a missing primary for a
/// candidate id (§4.3 "Load semantics").
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Upsert primary; insert into both secondary indices. All writes are one
    /// transaction. Used for both the `creating` placeholder and later
    /// `running` writes reached through `Update` instead.
    async fn store(&self, record: &SessionRecord) -> Result<(), StoreError>;

    /// Conditional replace of primary; fails `NotFound` if absent. Preserves
    /// index membership (the expiry score does not change on commit; the
    /// activity score is untouched here — use `touch_activity` for that).
    async fn update(&self, record: &SessionRecord) -> Result<(), StoreError>;

    /// Returns the primary record or `StoreError::NotFound`.
    async fn get(&self, session_id: &str) -> Result<SessionRecord, StoreError>;

    /// Removes the primary and both index entries in one transaction.
    /// Idempotent: deleting an absent session-id succeeds silently (P6).
    async fn delete(&self, session_id: &str) -> Result<(), StoreError>;

    /// Range over the expiry index with score <= `before`, bounded by
    /// `limit`. Ids whose primary has since been deleted are silently
    /// skipped; callers must not assume `len(result) == limit`.
    async fn list_expired(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>, StoreError>;

    /// Range over the last-activity index with score <= `before`, bounded by
    /// `limit`. Same skip-on-miss semantics as `list_expired`.
    async fn list_inactive(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>, StoreError>;

    /// Moves the session-id's last-activity score to `at`. Fails `NotFound`
    /// if the primary is absent. The score is monotonically non-decreasing
    /// per invariant I3; callers (external activity pings) are expected to
    /// only call this with `at >= now`.
    async fn touch_activity(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
}
