//! `TokenCache` (spec §4.1): fixed-capacity LRU of `token -> (authenticated,
//! principal)`, with a read-side TTL on top of LRU eviction.
//!
//! Deliberately deviates from textbook LRU (documented in spec §4.1): `Get`
//! is a pure read and does not promote the entry to the front -- only `Set`
//! does. This matters for P4 (capacity never exceeded) and for keeping a
//! busy negative-result entry from starving out less-recently-set positive
//! entries under read-heavy load.

use common_lib::Principal;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

struct Entry {
    authenticated: bool,
    principal: Option<Principal>,
    set_at: Instant,
}

pub struct TokenCache {
    inner: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

/// Outcome of a `TokenCache::get`.
pub enum Lookup {
    /// Not present, or present but older than the TTL.
    Miss,
    Hit { authenticated: bool, principal: Option<Principal> },
}

impl TokenCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or_else(|| NonZeroUsize::new(1).unwrap());
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Returns `Miss` if absent or if the entry's age exceeds the TTL. Does
    /// not call `get` on the underlying LRU's move-to-front path -- uses
    /// `peek` so the read itself never reorders the cache.
    pub fn get(&self, token: &str) -> Lookup {
        let inner = self.inner.lock();
        match inner.peek(token) {
            Some(entry) if entry.set_at.elapsed() <= self.ttl => Lookup::Hit {
                authenticated: entry.authenticated,
                principal: entry.principal.clone(),
            },
            _ => Lookup::Miss,
        }
    }

    /// Updates in place if present, else inserts, evicting the
    /// least-recently-set entry at capacity. The only operation that moves
    /// an entry to the front.
    pub fn set(&self, token: String, authenticated: bool, principal: Option<Principal>) {
        let mut inner = self.inner.lock();
        inner.put(
            token,
            Entry {
                authenticated,
                principal,
                set_at: Instant::now(),
            },
        );
    }

    pub fn remove(&self, token: &str) {
        self.inner.lock().pop(token);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::thread::sleep;

    fn principal() -> Principal {
        Principal::from_str("system:serviceaccount:default:sa").unwrap()
    }

    #[test]
    fn miss_on_absent_token() {
        let cache = TokenCache::new(4, Duration::from_secs(60));
        assert!(matches!(cache.get("tok"), Lookup::Miss));
    }

    #[test]
    fn hit_returns_what_was_set() {
        let cache = TokenCache::new(4, Duration::from_secs(60));
        cache.set("tok".into(), true, Some(principal()));
        match cache.get("tok") {
            Lookup::Hit { authenticated, principal } => {
                assert!(authenticated);
                assert!(principal.is_some());
            }
            Lookup::Miss => panic!("expected hit"),
        }
    }

    #[test]
    fn negative_result_is_cached_too() {
        let cache = TokenCache::new(4, Duration::from_secs(60));
        cache.set("tok".into(), false, None);
        match cache.get("tok") {
            Lookup::Hit { authenticated, .. } => assert!(!authenticated),
            Lookup::Miss => panic!("expected hit"),
        }
    }

    #[test]
    fn entries_older_than_ttl_are_misses() {
        let cache = TokenCache::new(4, Duration::from_millis(10));
        cache.set("tok".into(), true, Some(principal()));
        sleep(Duration::from_millis(30));
        assert!(matches!(cache.get("tok"), Lookup::Miss));
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let cache = TokenCache::new(2, Duration::from_secs(60));
        cache.set("a".into(), true, None);
        cache.set("b".into(), true, None);
        cache.set("c".into(), true, None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn get_does_not_promote_entries() {
        let cache = TokenCache::new(2, Duration::from_secs(60));
        cache.set("a".into(), true, None);
        cache.set("b".into(), true, None);
        // Repeatedly reading "a" must not protect it from eviction, since
        // only Set promotes (spec §4.1's documented LRU deviation).
        for _ in 0..5 {
            let _ = cache.get("a");
        }
        cache.set("c".into(), true, None);
        assert!(matches!(cache.get("a"), Lookup::Miss));
    }

    #[test]
    fn remove_purges_entry() {
        let cache = TokenCache::new(4, Duration::from_secs(60));
        cache.set("tok".into(), true, None);
        cache.remove("tok");
        assert!(matches!(cache.get("tok"), Lookup::Miss));
    }
}
