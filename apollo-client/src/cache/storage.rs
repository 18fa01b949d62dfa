use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::cache::record::CacheKey;
use crate::cache::record::Record;
use crate::error::CacheError;

/// A record store backing the normalized cache.
///
/// Backends are not synchronized themselves: the store serializes writers and lets readers run
/// concurrently.
pub trait NormalizedCache: Send + Sync {
    fn load_record(&self, key: &CacheKey) -> Option<Record>;

    /// Merge a record into the stored one, or store it when absent.
    ///
    /// Returns the keys of the fields that were added or changed.
    fn merge(&mut self, record: Record) -> Result<HashSet<String>, CacheError>;

    fn merge_all(&mut self, records: Vec<Record>) -> Result<HashSet<String>, CacheError> {
        let mut changed = HashSet::new();
        for record in records {
            changed.extend(self.merge(record)?);
        }
        Ok(changed)
    }

    /// Returns `true` if a record was removed.
    fn remove(&mut self, key: &CacheKey) -> bool;

    fn clear_all(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unbounded in-memory record store.
#[derive(Debug, Default)]
pub struct MemoryCache {
    records: HashMap<CacheKey, Record>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NormalizedCache for MemoryCache {
    fn load_record(&self, key: &CacheKey) -> Option<Record> {
        self.records.get(key).cloned()
    }

    fn merge(&mut self, record: Record) -> Result<HashSet<String>, CacheError> {
        match self.records.get_mut(record.key()) {
            Some(existing) => Ok(existing.merge_with(record)),
            None => {
                let changed = record.field_keys();
                self.records.insert(record.key().clone(), record);
                Ok(changed)
            }
        }
    }

    fn remove(&mut self, key: &CacheKey) -> bool {
        self.records.remove(key).is_some()
    }

    fn clear_all(&mut self) {
        self.records.clear();
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

/// Bounds of an [`LruNormalizedCache`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EvictionPolicy {
    /// Maximum number of records kept.
    pub max_entries: u64,

    /// Evict a record this long after it was last written.
    #[serde(with = "humantime_serde", default)]
    pub expire_after_write: Option<Duration>,

    /// Evict a record this long after it was last read or written.
    #[serde(with = "humantime_serde", default)]
    pub expire_after_access: Option<Duration>,
}

impl EvictionPolicy {
    pub fn with_max_entries(max_entries: u64) -> Self {
        Self {
            max_entries,
            expire_after_write: None,
            expire_after_access: None,
        }
    }
}

/// Bounded record store evicting the least recently used records.
#[derive(Clone)]
pub struct LruNormalizedCache {
    records: moka::sync::Cache<CacheKey, Arc<Record>>,
}

impl LruNormalizedCache {
    pub fn new(policy: &EvictionPolicy) -> Self {
        let mut builder = moka::sync::Cache::builder().max_capacity(policy.max_entries);
        if let Some(ttl) = policy.expire_after_write {
            builder = builder.time_to_live(ttl);
        }
        if let Some(tti) = policy.expire_after_access {
            builder = builder.time_to_idle(tti);
        }
        Self {
            records: builder.build(),
        }
    }
}

impl fmt::Debug for LruNormalizedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruNormalizedCache")
            .field("entries", &self.records.entry_count())
            .finish()
    }
}

impl NormalizedCache for LruNormalizedCache {
    fn load_record(&self, key: &CacheKey) -> Option<Record> {
        self.records.get(key).map(|record| (*record).clone())
    }

    fn merge(&mut self, record: Record) -> Result<HashSet<String>, CacheError> {
        let key = record.key().clone();
        let (merged, changed) = match self.records.get(&key) {
            Some(existing) => {
                let mut merged = (*existing).clone();
                let changed = merged.merge_with(record);
                (merged, changed)
            }
            None => {
                let changed = record.field_keys();
                (record, changed)
            }
        };
        if !changed.is_empty() {
            self.records.insert(key, Arc::new(merged));
        }
        Ok(changed)
    }

    fn remove(&mut self, key: &CacheKey) -> bool {
        self.records.remove(key).is_some()
    }

    fn clear_all(&mut self) {
        self.records.invalidate_all();
        self.records.run_pending_tasks();
    }

    fn len(&self) -> usize {
        self.records.run_pending_tasks();
        self.records.entry_count() as usize
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;

    fn keys(keys: &[&str]) -> HashSet<String> {
        keys.iter().map(|key| key.to_string()).collect()
    }

    fn merge_semantics(cache: &mut dyn NormalizedCache) {
        let changed = cache
            .merge(Record::new("1000").with_field("name", json!("Luke")))
            .unwrap();
        assert_eq!(changed, keys(&["1000.name"]));

        let changed = cache
            .merge_all(vec![
                Record::new("1000")
                    .with_field("name", json!("Luke"))
                    .with_field("height", json!(1.72)),
                Record::new("2001").with_field("name", json!("R2-D2")),
            ])
            .unwrap();
        assert_eq!(changed, keys(&["1000.height", "2001.name"]));

        let changed = cache
            .merge(Record::new("1000").with_field("name", json!("Skywalker")))
            .unwrap();
        assert_eq!(changed, keys(&["1000.name"]));

        let luke = cache.load_record(&CacheKey::new("1000")).unwrap();
        assert_eq!(
            luke,
            Record::new("1000")
                .with_field("name", json!("Skywalker"))
                .with_field("height", json!(1.72))
        );
        assert_eq!(cache.len(), 2);

        assert!(cache.remove(&CacheKey::new("2001")));
        assert!(!cache.remove(&CacheKey::new("2001")));
        assert_eq!(cache.load_record(&CacheKey::new("2001")), None);

        cache.clear_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn memory_cache() {
        merge_semantics(&mut MemoryCache::new());
    }

    #[test]
    fn lru_cache() {
        merge_semantics(&mut LruNormalizedCache::new(&EvictionPolicy::with_max_entries(
            100,
        )));
    }

    #[test]
    fn lru_cache_is_bounded() {
        let mut cache = LruNormalizedCache::new(&EvictionPolicy::with_max_entries(10));
        for i in 0..100 {
            cache
                .merge(Record::new(format!("{i}")).with_field("id", json!(i)))
                .unwrap();
        }
        assert!(cache.len() <= 10);
    }
}
