//! Redis-backed `SessionStore` (spec §6 wire contract).
//!
//! Transactional writes use `MULTI`/`EXEC` pipelines for the unconditional
//! three-key writes (`store`/`delete`), and small `EVAL` scripts for the two
//! conditional operations (`update`, `touch_activity`) that must observe
//! "primary already exists" atomically with the write — the same
//! compare-then-mutate shape the teacher's `Etcd::put_kv` uses its lease
//! `Compare` for, just expressed in Redis's primitive instead of etcd's.

use crate::{
    error::{Backend, Connect, Deserialise, NotFound, Serialise, StoreError},
    keys::{self, ACTIVITY_INDEX, EXPIRY_INDEX},
    traits::SessionStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_lib::types::SessionRecord;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use snafu::ResultExt;

/// `UPDATE_SCRIPT` and `TOUCH_SCRIPT` both guard a mutation behind
/// `EXISTS session:<id>`, returning 0 when the primary is absent so the
/// caller can map it to `StoreError::NotFound`.
const UPDATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
redis.call('SET', KEYS[1], ARGV[1])
return 1
"#;

const TOUCH_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
redis.call('ZADD', KEYS[2], ARGV[1], ARGV[2])
return 1
"#;

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connects to `addr` (e.g. `redis://host:6379`), optionally
    /// authenticating with `password` (the `STORE_PASSWORD` env var).
    pub async fn connect(addr: &str, password: Option<&str>) -> Result<Self, StoreError> {
        let url = match password {
            Some(password) if !password.is_empty() => inject_password(addr, password),
            _ => addr.to_string(),
        };
        let client = Client::open(url).context(Connect { addr: addr.to_string() })?;
        let conn = client
            .get_tokio_connection_manager()
            .await
            .context(Connect { addr: addr.to_string() })?;
        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn inject_password(addr: &str, password: &str) -> String {
    match addr.split_once("://") {
        Some((scheme, rest)) => format!("{}://:{}@{}", scheme, password, rest),
        None => addr.to_string(),
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn store(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let key = keys::primary_key(&record.session_id);
        let value = serde_json::to_string(record).context(Serialise {
            session_id: record.session_id.clone(),
        })?;
        let expiry_score = record.expires_at.timestamp();
        let activity_score = record.last_activity.timestamp();

        let _: () = redis::pipe()
            .atomic()
            .set(&key, value)
            .zadd(EXPIRY_INDEX, &record.session_id, expiry_score)
            .zadd(ACTIVITY_INDEX, &record.session_id, activity_score)
            .query_async(&mut self.conn())
            .await
            .context(Backend { op: "store" })?;
        Ok(())
    }

    async fn update(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let key = keys::primary_key(&record.session_id);
        let value = serde_json::to_string(record).context(Serialise {
            session_id: record.session_id.clone(),
        })?;
        let applied: i64 = Script::new(UPDATE_SCRIPT)
            .key(&key)
            .arg(value)
            .invoke_async(&mut self.conn())
            .await
            .context(Backend { op: "update" })?;
        if applied == 0 {
            return NotFound {
                session_id: record.session_id.clone(),
            }
            .fail();
        }
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<SessionRecord, StoreError> {
        let key = keys::primary_key(session_id);
        let raw: Option<String> = self
            .conn()
            .get(&key)
            .await
            .context(Backend { op: "get" })?;
        let raw = raw.context(NotFound {
            session_id: session_id.to_string(),
        })?;
        serde_json::from_str(&raw).context(Deserialise {
            session_id: session_id.to_string(),
        })
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let key = keys::primary_key(session_id);
        let _: () = redis::pipe()
            .atomic()
            .del(&key)
            .zrem(EXPIRY_INDEX, session_id)
            .zrem(ACTIVITY_INDEX, session_id)
            .query_async(&mut self.conn())
            .await
            .context(Backend { op: "delete" })?;
        Ok(())
    }

    async fn list_expired(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>, StoreError> {
        self.list_by_index(EXPIRY_INDEX, before, limit).await
    }

    async fn list_inactive(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>, StoreError> {
        self.list_by_index(ACTIVITY_INDEX, before, limit).await
    }

    async fn touch_activity(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let key = keys::primary_key(session_id);
        let applied: i64 = Script::new(TOUCH_SCRIPT)
            .key(&key)
            .key(ACTIVITY_INDEX)
            .arg(at.timestamp())
            .arg(session_id)
            .invoke_async(&mut self.conn())
            .await
            .context(Backend { op: "touch_activity" })?;
        if applied == 0 {
            return NotFound {
                session_id: session_id.to_string(),
            }
            .fail();
        }
        Ok(())
    }
}

impl RedisStore {
    async fn list_by_index(
        &self,
        index: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>, StoreError> {
        let ids: Vec<String> = self
            .conn()
            .zrangebyscore_limit(index, "-inf", before.timestamp(), 0, limit as isize)
            .await
            .context(Backend { op: "list" })?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| keys::primary_key(id)).collect();
        let values: Vec<Option<String>> = self
            .conn()
            .mget(&keys)
            .await
            .context(Backend { op: "list" })?;

        let mut out = Vec::with_capacity(values.len());
        for (id, raw) in ids.into_iter().zip(values.into_iter()) {
            // A candidate id with no primary is an expected race with a
            // concurrent delete (§4.3 "Load semantics") -- skip, don't fail.
            let raw = match raw {
                Some(raw) => raw,
                None => {
                    tracing::debug!(session_id = %id, index, "skipping index entry with no primary");
                    continue;
                }
            };
            let record: SessionRecord = serde_json::from_str(&raw).context(Deserialise {
                session_id: id.clone(),
            })?;
            out.push(record);
        }
        Ok(out)
    }
}
