//! An in-memory `SessionStore`, mirroring the Redis backend's semantics for
//! tests (P1-P7, S1-S6) that would otherwise need a live Redis. Grounded on
//! the teacher's composable-store pattern (`common/src/store/etcd.rs`'s
//! `Store` trait) and the "`InMemoryCacheStore`/`RedisCacheStore`" split
//! documented across the example pack's own cache layers.

use crate::{error::StoreError, traits::SessionStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_lib::types::SessionRecord;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};

#[derive(Default)]
struct Inner {
    primary: HashMap<String, SessionRecord>,
    expiry: BTreeSet<(i64, String)>,
    activity: BTreeSet<(i64, String)>,
}

/// Process-local session store. Never durable across restarts -- fine for
/// tests, wrong for production (spec §1 Non-goals: "not a long-term
/// database").
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemStore {
    async fn store(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let id = record.session_id.clone();
        // Upsert: drop any stale index entries for this id first so a
        // re-`store()` (e.g. placeholder retry) doesn't leave duplicates.
        remove_from_indices(&mut inner, &id);
        inner
            .expiry
            .insert((record.expires_at.timestamp(), id.clone()));
        inner
            .activity
            .insert((record.last_activity.timestamp(), id.clone()));
        inner.primary.insert(id, record.clone());
        Ok(())
    }

    async fn update(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.primary.contains_key(&record.session_id) {
            return crate::error::NotFound {
                session_id: record.session_id.clone(),
            }
            .fail();
        }
        inner
            .primary
            .insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<SessionRecord, StoreError> {
        self.inner
            .lock()
            .primary
            .get(session_id)
            .cloned()
            .ok_or_else(|| {
                crate::error::NotFound {
                    session_id: session_id.to_string(),
                }
                .build()
            })
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.primary.remove(session_id);
        remove_from_indices(&mut inner, session_id);
        Ok(())
    }

    async fn list_expired(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>, StoreError> {
        let inner = self.inner.lock();
        Ok(collect(&inner.expiry, &inner.primary, before, limit))
    }

    async fn list_inactive(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>, StoreError> {
        let inner = self.inner.lock();
        Ok(collect(&inner.activity, &inner.primary, before, limit))
    }

    async fn touch_activity(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let record = match inner.primary.get_mut(session_id) {
            Some(record) => record,
            None => {
                return crate::error::NotFound {
                    session_id: session_id.to_string(),
                }
                .fail()
            }
        };
        let old_score = record.last_activity.timestamp();
        record.last_activity = at;
        inner.activity.remove(&(old_score, session_id.to_string()));
        inner.activity.insert((at.timestamp(), session_id.to_string()));
        Ok(())
    }
}

fn remove_from_indices(inner: &mut Inner, session_id: &str) {
    inner.expiry.retain(|(_, id)| id != session_id);
    inner.activity.retain(|(_, id)| id != session_id);
}

fn collect(
    index: &BTreeSet<(i64, String)>,
    primary: &HashMap<String, SessionRecord>,
    before: DateTime<Utc>,
    limit: usize,
) -> Vec<SessionRecord> {
    let before = before.timestamp();
    index
        .iter()
        .take_while(|(score, _)| *score <= before)
        .take(limit)
        .filter_map(|(_, id)| primary.get(id).cloned())
        .collect()
}
