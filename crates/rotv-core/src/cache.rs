//! TTL + capacity bounded cache shared by every provider module.
//!
//! Keys are namespaced composites (`module:operation:params`) so one
//! module's entries can be dropped without touching the others. Expiry is
//! lazy: an expired entry is removed on the `get` that observes it, there
//! is no background sweep. Capacity is enforced FIFO by insertion time.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    value: Value,
    inserted_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    // Insertion order; may hold keys already evicted or re-inserted, those
    // are skipped when popping.
    order: VecDeque<String>,
}

/// Concurrent key/value store with per-entry TTL and a global entry cap.
///
/// Value-type agnostic: callers store `serde_json::Value` payloads and
/// deserialize on the way out. All operations take one interior lock, so a
/// `set` racing an eviction can neither overshoot the cap nor lose the
/// entry just inserted.
#[derive(Debug)]
pub struct Cache {
    inner: Mutex<CacheInner>,
    max_entries: usize,
}

impl Cache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            max_entries: max_entries.max(1),
        }
    }

    /// Returns the value for `key`, treating an expired entry as absent and
    /// removing it in the same call.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        match inner.entries.get(key) {
            Some(entry) if Utc::now() <= entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                inner.entries.remove(key);
                inner.order.retain(|k| k != key);
                None
            }
            None => None,
        }
    }

    /// Inserts `value` under `key` for `ttl`. Evicts the oldest entry first
    /// when the store is already at capacity.
    pub fn set(&self, key: &str, value: Value, ttl: std::time::Duration) {
        let now = Utc::now();
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(0));
        let entry = CacheEntry {
            value,
            inserted_at: now,
            expires_at: now + ttl,
        };

        let mut inner = self.inner.lock().expect("cache lock poisoned");
        if inner.entries.contains_key(key) {
            // Pure replacement: re-queue at the back, nothing to evict.
            inner.order.retain(|k| k != key);
        } else {
            while inner.entries.len() >= self.max_entries {
                let Some(oldest) = inner.order.pop_front() else {
                    break;
                };
                if inner.entries.remove(&oldest).is_some() {
                    debug!(key = %oldest, "Evicted oldest cache entry");
                }
            }
        }
        inner.entries.insert(key.to_string(), entry);
        inner.order.push_back(key.to_string());
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.entries.clear();
        inner.order.clear();
    }

    /// Clears only keys namespaced under `module_id`.
    pub fn clear_module(&self, module_id: &str) {
        let prefix = format!("{module_id}:");
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.entries.retain(|k, _| !k.starts_with(&prefix));
        inner.order.retain(|k| !k.starts_with(&prefix));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes a snapshot to `path` via temp-file-then-rename. Best effort:
    /// restarts rebuild the cache from upstream when no snapshot exists.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let snapshot: Vec<(String, CacheEntry)> = {
            let inner = self.inner.lock().expect("cache lock poisoned");
            inner
                .order
                .iter()
                .filter_map(|k| inner.entries.get(k).map(|e| (k.clone(), e.clone())))
                .collect()
        };
        let json = serde_json::to_vec(&snapshot)?;
        let tmp = path.with_extension("json.tmp");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)
    }

    /// Loads a snapshot written by [`Cache::save`], skipping entries that
    /// expired in the meantime. An unreadable snapshot degrades to an empty
    /// cache rather than failing startup.
    pub fn load(&self, path: &Path) {
        let snapshot: Vec<(String, CacheEntry)> = match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(s) => s,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring corrupt cache snapshot");
                    return;
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read cache snapshot");
                return;
            }
        };

        let now = Utc::now();
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        for (key, entry) in snapshot {
            if now > entry.expires_at || inner.entries.len() >= self.max_entries {
                continue;
            }
            inner.entries.insert(key.clone(), entry);
            inner.order.push_back(key);
        }
    }
}

/// Hex sha256 digest of `parts`, for cache keys built from long or
/// irregular parameters (upstream URLs, search terms).
pub fn hashed_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn get_returns_inserted_value() {
        let cache = Cache::new(10);
        cache.set("demo:channels", json!(["a", "b"]), TTL);
        assert_eq!(cache.get("demo:channels"), Some(json!(["a", "b"])));
        assert_eq!(cache.get("demo:missing"), None);
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let cache = Cache::new(3);
        for i in 0..5 {
            cache.set(&format!("m:k{i}"), json!(i), TTL);
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("m:k0"), None);
        assert_eq!(cache.get("m:k1"), None);
        assert_eq!(cache.get("m:k2"), Some(json!(2)));
        assert_eq!(cache.get("m:k4"), Some(json!(4)));
    }

    #[test]
    fn reinsert_moves_key_to_back() {
        let cache = Cache::new(2);
        cache.set("m:a", json!(1), TTL);
        cache.set("m:b", json!(2), TTL);
        cache.set("m:a", json!(3), TTL);
        // b is now the oldest and gets evicted.
        cache.set("m:c", json!(4), TTL);
        assert_eq!(cache.get("m:b"), None);
        assert_eq!(cache.get("m:a"), Some(json!(3)));
        assert_eq!(cache.get("m:c"), Some(json!(4)));
    }

    #[test]
    fn overwrite_at_capacity_does_not_evict_others() {
        let cache = Cache::new(2);
        cache.set("m:a", json!(1), TTL);
        cache.set("m:b", json!(2), TTL);
        cache.set("m:a", json!(3), TTL);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("m:b"), Some(json!(2)));
        assert_eq!(cache.get("m:a"), Some(json!(3)));
    }

    #[test]
    fn expired_entry_is_absent_and_stays_absent() {
        let cache = Cache::new(10);
        cache.set("m:x", json!("v"), Duration::ZERO);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get("m:x"), None);
        assert_eq!(cache.get("m:x"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn clear_module_only_touches_namespace() {
        let cache = Cache::new(10);
        cache.set("demo:channels", json!(1), TTL);
        cache.set("demo:vod:page:1", json!(2), TTL);
        cache.set("other:channels", json!(3), TTL);
        cache.clear_module("demo");
        assert_eq!(cache.get("demo:channels"), None);
        assert_eq!(cache.get("demo:vod:page:1"), None);
        assert_eq!(cache.get("other:channels"), Some(json!(3)));
    }

    #[test]
    fn clear_removes_everything() {
        let cache = Cache::new(10);
        cache.set("a:1", json!(1), TTL);
        cache.set("b:2", json!(2), TTL);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn snapshot_roundtrip() {
        let dir = std::env::temp_dir().join(format!("rotv-cache-{}", uuid::Uuid::new_v4()));
        let path = dir.join("cache.json");

        let cache = Cache::new(10);
        cache.set("m:a", json!("keep"), TTL);
        cache.set("m:b", json!("gone"), Duration::ZERO);
        cache.save(&path).unwrap();

        std::thread::sleep(Duration::from_millis(10));
        let restored = Cache::new(10);
        restored.load(&path);
        assert_eq!(restored.get("m:a"), Some(json!("keep")));
        assert_eq!(restored.get("m:b"), None);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn corrupt_snapshot_degrades_to_empty() {
        let dir = std::env::temp_dir().join(format!("rotv-cache-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cache.json");
        std::fs::write(&path, b"not json at all").unwrap();

        let cache = Cache::new(10);
        cache.load(&path);
        assert!(cache.is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn hashed_key_is_deterministic() {
        let a = hashed_key(&["demo", "stream", "https://example.com/a.m3u8"]);
        let b = hashed_key(&["demo", "stream", "https://example.com/a.m3u8"]);
        let c = hashed_key(&["demo", "stream", "https://example.com/b.m3u8"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
