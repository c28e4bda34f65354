use redis::aio::ConnectionManager;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;

/// Cache namespace prefix, shared by both backends.
const NAMESPACE: &str = "cyberchat";

/// TTL for read-through history caches.
pub const HISTORY_TTL: Duration = Duration::from_secs(60);
/// TTL for memoized search results.
pub const SEARCH_TTL: Duration = Duration::from_secs(300);
/// TTL for model preference and settings caches.
pub const PREFERENCE_TTL: Duration = Duration::from_secs(300);

/// Cache key for an identity's chat history.
pub fn history_key(scope: &str) -> String {
    format!("history:{}", scope)
}

/// Cache key for an identity's model preference.
pub fn preference_key(scope: &str) -> String {
    format!("preference:{}", scope)
}

/// Cache key for the system settings map.
pub fn settings_key() -> String {
    "settings:all".to_string()
}

/// Cache key for an anonymous session's quota counter.
pub fn anon_quota_key(session_id: &Uuid) -> String {
    format!("quota:anon:{}", session_id)
}

/// Cache key for a memoized search result.
pub fn search_key(query: &str) -> String {
    format!("search:{}", blake3::hash(query.as_bytes()).to_hex())
}

/// Cache key for an authenticated session record.
pub fn session_key(session_id: &str) -> String {
    format!("session:{}", session_id)
}

/// Cache key for a CSRF token.
pub fn csrf_key(token: &str) -> String {
    format!("csrf:{}", token)
}

/// Cache key for a login rate-limit counter.
pub fn login_rate_key(email: &str) -> String {
    format!("rate_limit:login:{}", email)
}

/// Cache key for a registration rate-limit counter.
pub fn register_rate_key(ip: &str) -> String {
    format!("rate_limit:register:{}", ip)
}

/// A TTL key/value store: Redis when reachable at startup, an in-process
/// map otherwise. Values are JSON strings; eviction is TTL-only.
///
/// Reads and writes swallow backend errors (a cache miss is always a safe
/// answer); only `incr` reports them, because quota admission has an
/// explicit fail-open/fail-closed policy.
#[derive(Clone)]
pub enum CacheStore {
    Remote(RemoteTtlStore),
    Memory(InMemoryTtlStore),
}

impl CacheStore {
    /// Connects to Redis, falling back to the in-process store when the
    /// server is unreachable at startup.
    pub async fn connect(redis_url: &str) -> Self {
        match RemoteTtlStore::connect(redis_url).await {
            Ok(store) => {
                tracing::info!("✅ Redis cache store initialized");
                CacheStore::Remote(store)
            }
            Err(e) => {
                tracing::warn!("⚠️  Redis unavailable, using in-memory cache: {}", e);
                CacheStore::Memory(InMemoryTtlStore::new())
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let payload = match self {
            CacheStore::Remote(store) => store.get_raw(&namespaced(key)).await,
            CacheStore::Memory(store) => store.get_raw(&namespaced(key)).await,
        }?;
        match sonic_rs::from_str(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Cache deserialize error for {}: {}", key, e);
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        let payload = match sonic_rs::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Cache serialize error for {}: {}", key, e);
                return false;
            }
        };
        match self {
            CacheStore::Remote(store) => store.set_raw(&namespaced(key), payload, ttl).await,
            CacheStore::Memory(store) => store.set_raw(&namespaced(key), payload, ttl).await,
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        match self {
            CacheStore::Remote(store) => store.delete(&namespaced(key)).await,
            CacheStore::Memory(store) => store.delete(&namespaced(key)).await,
        }
    }

    /// Atomically increments a counter, arming its TTL on first increment.
    /// Returns the post-increment value.
    pub async fn incr(&self, key: &str, ttl: Duration) -> Result<i64> {
        match self {
            CacheStore::Remote(store) => store.incr(&namespaced(key), ttl).await,
            CacheStore::Memory(store) => Ok(store.incr(&namespaced(key), ttl).await),
        }
    }
}

fn namespaced(key: &str) -> String {
    format!("{}:{}", NAMESPACE, key)
}

/// The Redis-backed store.
#[derive(Clone)]
pub struct RemoteTtlStore {
    conn: ConnectionManager,
}

impl RemoteTtlStore {
    async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    async fn get_raw(&self, key: &str) -> Option<String> {
        let mut conn = self.conn.clone();
        match redis::cmd("GET").arg(key).query_async(&mut conn).await {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Cache get error: {}", e);
                None
            }
        }
    }

    async fn set_raw(&self, key: &str, payload: String, ttl: Duration) -> bool {
        let mut conn = self.conn.clone();
        let result: std::result::Result<(), redis::RedisError> = redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Cache set error: {}", e);
                false
            }
        }
    }

    async fn delete(&self, key: &str) -> bool {
        let mut conn = self.conn.clone();
        match redis::cmd("DEL").arg(key).query_async::<i64>(&mut conn).await {
            Ok(deleted) => deleted > 0,
            Err(e) => {
                tracing::error!("Cache delete error: {}", e);
                false
            }
        }
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut conn = self.conn.clone();
        let count: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        if count == 1 {
            let _: () = redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl.as_secs().max(1))
                .query_async(&mut conn)
                .await?;
        }
        Ok(count)
    }
}

struct Entry {
    payload: String,
    expires_at: Instant,
}

/// The in-process fallback store. Entries are evicted lazily on read.
#[derive(Clone)]
pub struct InMemoryTtlStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl InMemoryTtlStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn get_raw(&self, key: &str) -> Option<String> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.payload.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // expired; drop it so the map does not grow unbounded
        self.entries.write().await.remove(key);
        None
    }

    async fn set_raw(&self, key: &str, payload: String, ttl: Duration) -> bool {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                payload,
                expires_at: Instant::now() + ttl,
            },
        );
        true
    }

    async fn delete(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    async fn incr(&self, key: &str, ttl: Duration) -> i64 {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                let count = entry.payload.parse::<i64>().unwrap_or(0) + 1;
                entry.payload = count.to_string();
                count
            }
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        payload: "1".to_string(),
                        expires_at: now + ttl,
                    },
                );
                1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_store() -> CacheStore {
        CacheStore::Memory(InMemoryTtlStore::new())
    }

    #[tokio::test]
    async fn set_get_delete_round_trip() {
        let cache = memory_store();
        assert!(cache.set("k", &"value".to_string(), Duration::from_secs(60)).await);
        assert_eq!(cache.get::<String>("k").await.as_deref(), Some("value"));
        assert!(cache.delete("k").await);
        assert_eq!(cache.get::<String>("k").await, None::<String>);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = memory_store();
        cache.set("short", &1i64, Duration::from_millis(50)).await;
        assert_eq!(cache.get::<i64>("short").await, Some(1));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.get::<i64>("short").await, None);
    }

    #[tokio::test]
    async fn incr_counts_and_resets_after_expiry() {
        let cache = memory_store();
        assert_eq!(cache.incr("counter", Duration::from_millis(60)).await.unwrap(), 1);
        assert_eq!(cache.incr("counter", Duration::from_millis(60)).await.unwrap(), 2);
        tokio::time::sleep(Duration::from_millis(90)).await;
        // counter lost after TTL; this is the documented soft-limit behavior
        assert_eq!(cache.incr("counter", Duration::from_millis(60)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn search_keys_are_stable_per_query() {
        assert_eq!(search_key("rust async"), search_key("rust async"));
        assert_ne!(search_key("rust async"), search_key("rust sync"));
    }
}
