//! Content-addressed response cache with TTL expiry and a size bound

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument};

use crate::domain::cache::{CacheEntry, CacheKey, CacheStats};
use crate::domain::clock::Clock;
use crate::domain::storage::{Durability, Durable, MigrationChain};
use crate::domain::suggestion::{SubjectId, SuggestionResult};
use crate::infrastructure::storage::{cache_chain, CacheDocument, SessionStore};

/// Configuration for the response cache
#[derive(Debug, Clone)]
pub struct ResponseCacheConfig {
    /// Default lifetime of an entry
    pub ttl: Duration,
    /// Maximum number of entries held, expired or not
    pub max_entries: usize,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(24),
            max_entries: 100,
        }
    }
}

impl ResponseCacheConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }
}

/// Suggestion results keyed by `(subject_id, normalize(message))`.
///
/// Reads are served from memory and never mutate state. Every mutation is
/// flushed through the session store before it returns. Mutations hold the
/// flush lock across the write so documents land in mutation order; the
/// entries lock is released first, so reads never wait on the store.
#[derive(Debug)]
pub struct ResponseCache {
    entries: RwLock<Vec<CacheEntry>>,
    flush: Mutex<()>,
    session: Arc<SessionStore>,
    chain: MigrationChain,
    clock: Arc<dyn Clock>,
    config: ResponseCacheConfig,
}

impl ResponseCache {
    pub fn new(
        session: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
        config: ResponseCacheConfig,
    ) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            flush: Mutex::new(()),
            session,
            chain: cache_chain(),
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ResponseCacheConfig {
        &self.config
    }

    /// Restores persisted entries, migrating older schemas and dropping
    /// expired entries. Returns the number of live entries loaded.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Durable<usize> {
        let _flush = self.flush.lock().await;
        let restored = self.session.restore::<CacheDocument>(&self.chain).await;
        let now = self.clock.now();

        let (loaded, expired, changed) = {
            let mut entries = self.entries.write().await;
            *entries = restored.payload.entries;

            let before = entries.len();
            entries.retain(|entry| !entry.is_expired(now));
            let expired = before - entries.len();

            let overflow = self.enforce_bound(&mut entries);
            let changed = (expired > 0 || overflow > 0).then(|| snapshot(&entries));

            (entries.len(), expired, changed)
        };

        let durability = match changed {
            Some(document) => self.session.persist(&self.chain, &document).await,
            None => restored.durability,
        };

        info!(
            entries = loaded,
            expired,
            from_version = ?restored.from_version,
            "Response cache loaded"
        );

        Durable::new(loaded, durability)
    }

    /// Looks up a live entry; expired entries read as a miss
    pub async fn get(&self, subject_id: &SubjectId, message: &str) -> Option<CacheEntry> {
        let key = CacheKey::derive(subject_id, message);
        let now = self.clock.now();

        let entries = self.entries.read().await;
        entries
            .iter()
            .find(|entry| entry.key == key && !entry.is_expired(now))
            .cloned()
    }

    /// Stores a result with the default TTL
    pub async fn put(
        &self,
        subject_id: &SubjectId,
        message: &str,
        result: SuggestionResult,
    ) -> Durability {
        self.put_with_ttl(subject_id, message, result, self.config.ttl)
            .await
    }

    /// Stores a result, replacing any entry with the same key and evicting
    /// the oldest entries beyond the size bound
    pub async fn put_with_ttl(
        &self,
        subject_id: &SubjectId,
        message: &str,
        result: SuggestionResult,
        ttl: Duration,
    ) -> Durability {
        let now = self.clock.now();
        let entry = CacheEntry::new(subject_id.clone(), message, result, now, ttl);

        let _flush = self.flush.lock().await;
        let document = {
            let mut entries = self.entries.write().await;

            let swept = sweep_expired(&mut entries, now);
            entries.retain(|existing| existing.key != entry.key);

            debug!(key = %entry.key, subject_id = %subject_id, swept, "Caching result");
            entries.push(entry);

            self.enforce_bound(&mut entries);
            snapshot(&entries)
        };

        self.session.persist(&self.chain, &document).await
    }

    /// Removes the entry for a subject/message pair
    pub async fn remove(&self, subject_id: &SubjectId, message: &str) -> Durable<bool> {
        let key = CacheKey::derive(subject_id, message);

        let _flush = self.flush.lock().await;
        let document = {
            let mut entries = self.entries.write().await;

            let before = entries.len();
            entries.retain(|entry| entry.key != key);

            if entries.len() == before {
                return Durable::new(false, Durability::Persisted);
            }

            snapshot(&entries)
        };

        let durability = self.session.persist(&self.chain, &document).await;
        Durable::new(true, durability)
    }

    pub async fn clear(&self) -> Durability {
        let _flush = self.flush.lock().await;
        self.entries.write().await.clear();

        info!("Response cache cleared");
        self.session.persist(&self.chain, &CacheDocument::default()).await
    }

    /// Reclaims expired entries; returns how many were removed
    pub async fn sweep(&self) -> Durable<usize> {
        let now = self.clock.now();

        let _flush = self.flush.lock().await;
        let (swept, document) = {
            let mut entries = self.entries.write().await;

            let swept = sweep_expired(&mut entries, now);
            if swept == 0 {
                return Durable::new(0, Durability::Persisted);
            }

            (swept, snapshot(&entries))
        };

        debug!(swept, "Swept expired cache entries");
        let durability = self.session.persist(&self.chain, &document).await;
        Durable::new(swept, durability)
    }

    pub async fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let entries = self.entries.read().await;

        CacheStats {
            size: entries.len(),
            expired_count: entries.iter().filter(|entry| entry.is_expired(now)).count(),
        }
    }

    /// Live entries for one subject, newest first
    pub async fn get_cached_results_for(&self, subject_id: &SubjectId) -> Vec<CacheEntry> {
        let now = self.clock.now();
        let entries = self.entries.read().await;

        let mut results: Vec<CacheEntry> = entries
            .iter()
            .filter(|entry| &entry.subject_id == subject_id && !entry.is_expired(now))
            .cloned()
            .collect();

        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        results
    }

    fn enforce_bound(&self, entries: &mut Vec<CacheEntry>) -> usize {
        let bound = self.config.max_entries.max(1);
        let mut evicted = 0;

        while entries.len() > bound {
            let oldest = entries
                .iter()
                .enumerate()
                .min_by_key(|(_, entry)| entry.created_at)
                .map(|(index, _)| index);

            match oldest {
                Some(index) => {
                    let entry = entries.remove(index);
                    debug!(key = %entry.key, "Evicted oldest cache entry");
                    evicted += 1;
                }
                None => break,
            }
        }

        evicted
    }
}

fn sweep_expired(entries: &mut Vec<CacheEntry>, now: DateTime<Utc>) -> usize {
    let before = entries.len();
    entries.retain(|entry| !entry.is_expired(now));
    before - entries.len()
}

fn snapshot(entries: &[CacheEntry]) -> CacheDocument {
    CacheDocument {
        entries: entries.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;
    use crate::domain::storage::{DurableStore, MockDurableStore};
    use crate::infrastructure::storage::InMemoryStore;

    struct Fixture {
        cache: ResponseCache,
        clock: ManualClock,
        store: Arc<MockDurableStore>,
    }

    fn fixture(config: ResponseCacheConfig) -> Fixture {
        let store = Arc::new(MockDurableStore::new());
        let clock = ManualClock::starting_now();
        let session = Arc::new(SessionStore::new(store.clone()));
        let cache = ResponseCache::new(session, Arc::new(clock.clone()), config);

        Fixture {
            cache,
            clock,
            store,
        }
    }

    fn result(text: &str) -> SuggestionResult {
        SuggestionResult::from_texts([text])
    }

    #[tokio::test]
    async fn test_put_then_get_round_trip() {
        let f = fixture(ResponseCacheConfig::default());
        let subject = SubjectId::from("42");

        let durability = f.cache.put(&subject, "Are we still on?", result("Yes!")).await;
        assert!(durability.is_persisted());

        let hit = f.cache.get(&subject, "Are we still on?").await.unwrap();
        assert_eq!(hit.result, result("Yes!"));
        assert_eq!(hit.input_message, "Are we still on?");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_not_blocked_by_slow_flush() {
        let store = Arc::new(
            MockDurableStore::new().with_save_delay(std::time::Duration::from_millis(200)),
        );
        let session = Arc::new(SessionStore::new(store.clone()));
        let cache = ResponseCache::new(
            session,
            Arc::new(ManualClock::starting_now()),
            ResponseCacheConfig::default(),
        );
        let subject = SubjectId::from("42");

        let (durability, read) = tokio::join!(
            cache.put(&subject, "lunch?", result("Sure")),
            async {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                tokio::time::timeout(
                    std::time::Duration::from_millis(10),
                    cache.get(&subject, "lunch?"),
                )
                .await
            }
        );

        assert!(durability.is_persisted());
        let hit = read.expect("read waited on the store").unwrap();
        assert_eq!(hit.result, result("Sure"));
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_mutations_flush_in_order() {
        let store = Arc::new(
            MockDurableStore::new().with_save_delay(std::time::Duration::from_millis(20)),
        );
        let session = Arc::new(SessionStore::new(store.clone()));
        let cache = ResponseCache::new(
            session,
            Arc::new(ManualClock::starting_now()),
            ResponseCacheConfig::default(),
        );
        let subject = SubjectId::from("42");

        tokio::join!(
            cache.put(&subject, "first", result("1")),
            cache.put(&subject, "second", result("2")),
            cache.remove(&subject, "first"),
        );

        let persisted: CacheDocument = cache_chain()
            .decode(&store.raw("cache_v2").unwrap(), 2)
            .unwrap();
        assert_eq!(persisted.entries, cache.get_cached_results_for(&subject).await);
    }

    #[tokio::test]
    async fn test_get_normalizes_message() {
        let f = fixture(ResponseCacheConfig::default());
        let subject = SubjectId::from("42");

        f.cache.put(&subject, "Hello there", result("Hi")).await;

        assert!(f.cache.get(&subject, "  hello THERE ").await.is_some());
    }

    #[tokio::test]
    async fn test_same_message_different_subjects_do_not_collide() {
        let f = fixture(ResponseCacheConfig::default());

        f.cache.put(&SubjectId::from("1"), "ok?", result("one")).await;
        f.cache.put(&SubjectId::from("2"), "ok?", result("two")).await;

        assert_eq!(f.cache.stats().await.size, 2);
        let hit = f.cache.get(&SubjectId::from("1"), "ok?").await.unwrap();
        assert_eq!(hit.result, result("one"));
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss_without_sweep() {
        let f = fixture(ResponseCacheConfig::default().with_ttl(Duration::minutes(10)));
        let subject = SubjectId::from("42");

        f.cache.put(&subject, "ping", result("pong")).await;
        let saves = f.store.save_count();

        f.clock.advance(Duration::minutes(11));

        assert!(f.cache.get(&subject, "ping").await.is_none());

        let stats = f.cache.stats().await;
        assert_eq!(stats.size, 1);
        assert_eq!(stats.expired_count, 1);
        assert_eq!(f.store.save_count(), saves);
    }

    #[tokio::test]
    async fn test_entry_valid_exactly_at_expiry() {
        let f = fixture(ResponseCacheConfig::default().with_ttl(Duration::minutes(10)));
        let subject = SubjectId::from("42");

        f.cache.put(&subject, "ping", result("pong")).await;
        f.clock.advance(Duration::minutes(10));

        assert!(f.cache.get(&subject, "ping").await.is_some());
    }

    #[tokio::test]
    async fn test_put_same_key_replaces() {
        let f = fixture(ResponseCacheConfig::default());
        let subject = SubjectId::from("42");

        f.cache.put(&subject, "ping", result("first")).await;
        f.clock.advance(Duration::seconds(1));
        f.cache.put(&subject, "PING", result("second")).await;

        assert_eq!(f.cache.stats().await.size, 1);
        let hit = f.cache.get(&subject, "ping").await.unwrap();
        assert_eq!(hit.result, result("second"));
    }

    #[tokio::test]
    async fn test_eviction_keeps_bound_and_drops_oldest() {
        let f = fixture(ResponseCacheConfig::default());
        let subject = SubjectId::from("42");

        for i in 0..101 {
            f.cache
                .put(&subject, &format!("message {}", i), result("r"))
                .await;
            f.clock.advance(Duration::seconds(1));
        }

        assert_eq!(f.cache.stats().await.size, 100);
        assert!(f.cache.get(&subject, "message 0").await.is_none());
        assert!(f.cache.get(&subject, "message 1").await.is_some());
        assert!(f.cache.get(&subject, "message 100").await.is_some());
    }

    #[tokio::test]
    async fn test_put_sweeps_expired_entries() {
        let f = fixture(ResponseCacheConfig::default().with_ttl(Duration::minutes(1)));
        let subject = SubjectId::from("42");

        f.cache.put(&subject, "old", result("r")).await;
        f.clock.advance(Duration::minutes(2));
        f.cache.put(&subject, "new", result("r")).await;

        let stats = f.cache.stats().await;
        assert_eq!(stats.size, 1);
        assert_eq!(stats.expired_count, 0);
    }

    #[tokio::test]
    async fn test_sweep_reports_reclaimed_count() {
        let f = fixture(ResponseCacheConfig::default().with_ttl(Duration::minutes(1)));
        let subject = SubjectId::from("42");

        f.cache.put(&subject, "a", result("r")).await;
        f.cache.put(&subject, "b", result("r")).await;
        f.clock.advance(Duration::minutes(5));

        assert_eq!(f.cache.sweep().await.value, 2);
        assert_eq!(f.cache.stats().await.size, 0);
    }

    #[tokio::test]
    async fn test_get_cached_results_for_newest_first() {
        let f = fixture(ResponseCacheConfig::default());
        let subject = SubjectId::from("42");

        f.cache.put(&subject, "first", result("1")).await;
        f.clock.advance(Duration::seconds(5));
        f.cache.put(&subject, "second", result("2")).await;
        f.cache.put(&SubjectId::from("7"), "other", result("x")).await;

        let results = f.cache.get_cached_results_for(&subject).await;
        let messages: Vec<&str> = results.iter().map(|e| e.input_message.as_str()).collect();
        assert_eq!(messages, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let f = fixture(ResponseCacheConfig::default());
        let subject = SubjectId::from("42");

        f.cache.put(&subject, "a", result("r")).await;
        f.cache.put(&subject, "b", result("r")).await;

        assert!(f.cache.remove(&subject, "a").await.value);
        assert!(!f.cache.remove(&subject, "a").await.value);

        assert!(f.cache.clear().await.is_persisted());
        assert_eq!(f.cache.stats().await.size, 0);
    }

    #[tokio::test]
    async fn test_entries_survive_reload() {
        let store: Arc<dyn DurableStore> = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let subject = SubjectId::from("42");

        let first = ResponseCache::new(
            Arc::new(SessionStore::new(store.clone())),
            clock.clone(),
            ResponseCacheConfig::default(),
        );
        first.put(&subject, "ping", result("pong")).await;

        let second = ResponseCache::new(
            Arc::new(SessionStore::new(store.clone())),
            clock.clone(),
            ResponseCacheConfig::default(),
        );
        let loaded = second.load().await;

        assert_eq!(loaded.value, 1);
        assert_eq!(
            second.get(&subject, "ping").await.unwrap().result,
            result("pong")
        );
    }

    #[tokio::test]
    async fn test_load_drops_expired_entries() {
        let store: Arc<dyn DurableStore> = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let config = ResponseCacheConfig::default().with_ttl(Duration::minutes(1));

        let first = ResponseCache::new(
            Arc::new(SessionStore::new(store.clone())),
            clock.clone(),
            config.clone(),
        );
        first.put(&SubjectId::from("1"), "a", result("r")).await;

        clock.advance(Duration::minutes(2));

        let second = ResponseCache::new(Arc::new(SessionStore::new(store)), clock, config);
        assert_eq!(second.load().await.value, 0);
        assert_eq!(second.stats().await.size, 0);
    }

    #[tokio::test]
    async fn test_storage_failure_keeps_cache_working() {
        let store = Arc::new(MockDurableStore::new().with_failing_writes());
        let session = Arc::new(SessionStore::new(store));
        let cache = ResponseCache::new(
            session.clone(),
            Arc::new(ManualClock::starting_now()),
            ResponseCacheConfig::default(),
        );
        let subject = SubjectId::from("42");

        let durability = cache.put(&subject, "ping", result("pong")).await;

        assert!(matches!(durability, Durability::InMemoryOnly { .. }));
        assert!(session.is_degraded());
        assert!(cache.get(&subject, "ping").await.is_some());
    }
}
