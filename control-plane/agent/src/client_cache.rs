//! `ClientCache` (spec §4.2): fixed-capacity LRU of `(namespace, principal)
//! -> (scoped-client, token-expiry)`, keyed deliberately by principal and
//! *not* by raw token (spec §9 Design Notes) so rotated tokens for the same
//! caller share one client.

use crate::jwt;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

struct Entry<C> {
    client: C,
    /// `None` means the embedded token couldn't be parsed -- per spec §4.2
    /// this disables expiry-based eviction entirely (trusted-forever until
    /// the LRU evicts it on capacity pressure).
    token_expiry: Option<DateTime<Utc>>,
}

/// Generic over the scoped-client type so this module stays free of any
/// direct `kube` dependency; `agent::client_factory` supplies the concrete
/// `Arc<dyn OrchestratorClient>` value.
pub struct ClientCache<C: Clone> {
    inner: Mutex<LruCache<String, Entry<C>>>,
}

impl<C: Clone> ClientCache<C> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or_else(|| NonZeroUsize::new(1).unwrap());
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns the client iff `token_expiry` is absent (trusted-forever) or
    /// in the future; otherwise removes the entry and returns `None`.
    /// Promotes to front on a hit (spec §4.2: "Get promotes to front").
    pub fn get(&self, key: &str) -> Option<C> {
        let mut inner = self.inner.lock();
        let expired = match inner.peek(key) {
            Some(entry) => matches!(entry.token_expiry, Some(expiry) if expiry <= Utc::now()),
            None => return None,
        };
        if expired {
            inner.pop(key);
            return None;
        }
        inner.get(key).map(|entry| entry.client.clone())
    }

    /// Upserts `client` under `key`, deriving its expiry from the token's
    /// embedded `exp` claim (read once, at insert time -- spec §9).
    /// Evicts the least-recently-used entry at capacity.
    pub fn set(&self, key: String, token: &str, client: C) {
        let token_expiry = jwt::token_expiry(token);
        self.inner.lock().put(key, Entry { client, token_expiry });
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
