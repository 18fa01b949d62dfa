//! The store coordinating access to the normalized cache.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::runtime::Handle;

use crate::cache::headers::CacheHeaders;
use crate::cache::key_resolver::CacheKeyResolver;
use crate::cache::normalizer::NormalizedResponse;
use crate::cache::normalizer::Normalizer;
use crate::cache::reader::ReadError;
use crate::cache::reader::ReadResult;
use crate::cache::reader::Reader;
use crate::cache::record::CacheKey;
use crate::cache::record::Record;
use crate::cache::storage::NormalizedCache;
use crate::error::CacheError;
use crate::graphql::Response;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::operation::Operation;

/// Identifier of a store subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Notified when records it depends on change.
pub trait StoreSubscriber: Send + Sync {
    /// Called with every changed key set intersecting the subscription's dependencies.
    fn on_records_changed(&self, changed_keys: &HashSet<String>);
}

impl<F> StoreSubscriber for F
where
    F: Fn(&HashSet<String>) + Send + Sync,
{
    fn on_records_changed(&self, changed_keys: &HashSet<String>) {
        self(changed_keys)
    }
}

struct Subscription {
    dependent_keys: HashSet<String>,
    subscriber: Arc<dyn StoreSubscriber>,
}

struct Inner {
    cache: RwLock<Box<dyn NormalizedCache>>,
    resolver: Arc<dyn CacheKeyResolver>,
    subscriptions: Mutex<HashMap<SubscriptionId, Subscription>>,
    next_subscription: AtomicU64,
    dispatcher: Handle,
}

/// Thread safe access to the normalized cache.
///
/// Reads share the backend, writes are exclusive and serialized. Subscribers are notified of
/// changed keys on the dispatcher, never on the writing task.
#[derive(Clone)]
pub struct ApolloStore {
    inner: Arc<Inner>,
}

impl fmt::Debug for ApolloStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApolloStore")
            .field("records", &self.inner.cache.read().len())
            .field("subscriptions", &self.inner.subscriptions.lock().len())
            .finish()
    }
}

/// Shared access to the backend for the duration of a read transaction.
pub struct ReadableStore<'a> {
    cache: &'a dyn NormalizedCache,
    resolver: &'a dyn CacheKeyResolver,
}

impl ReadableStore<'_> {
    pub fn load_record(&self, key: &CacheKey) -> Option<Record> {
        self.cache.load_record(key)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub(crate) fn read(&self, operation: &Operation) -> Result<ReadResult, ReadError> {
        Reader::new(self.cache, operation.variables(), self.resolver)
            .read(&operation.root_key(), operation.selections())
    }
}

/// Exclusive access to the backend for the duration of a write transaction.
pub struct WriteableStore<'a> {
    cache: &'a mut dyn NormalizedCache,
    resolver: &'a dyn CacheKeyResolver,
}

impl WriteableStore<'_> {
    pub fn load_record(&self, key: &CacheKey) -> Option<Record> {
        self.cache.load_record(key)
    }

    pub(crate) fn read(&self, operation: &Operation) -> Result<ReadResult, ReadError> {
        Reader::new(&*self.cache, operation.variables(), self.resolver)
            .read(&operation.root_key(), operation.selections())
    }

    /// Read an operation, then remove every record it was read from.
    pub(crate) fn read_and_evict(
        &mut self,
        operation: &Operation,
    ) -> Result<ReadResult, ReadError> {
        let result = self.read(operation)?;
        for key in result.records.keys() {
            self.cache.remove(key);
        }
        Ok(result)
    }

    /// Merge records, unless the headers ask not to store them.
    ///
    /// Returns the changed keys, to be published once the transaction is over.
    pub fn merge(
        &mut self,
        records: Vec<Record>,
        cache_headers: &CacheHeaders,
    ) -> Result<HashSet<String>, CacheError> {
        if cache_headers.do_not_store() {
            return Ok(HashSet::new());
        }
        self.cache.merge_all(records)
    }

    pub fn remove(&mut self, key: &CacheKey) -> bool {
        self.cache.remove(key)
    }

    pub fn clear_all(&mut self) {
        self.cache.clear_all()
    }
}

impl ApolloStore {
    pub fn new(
        cache: Box<dyn NormalizedCache>,
        resolver: Arc<dyn CacheKeyResolver>,
        dispatcher: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache: RwLock::new(cache),
                resolver,
                subscriptions: Mutex::new(HashMap::new()),
                next_subscription: AtomicU64::new(0),
                dispatcher,
            }),
        }
    }

    pub(crate) fn resolver(&self) -> &dyn CacheKeyResolver {
        self.inner.resolver.as_ref()
    }

    /// Read an operation from the cache.
    ///
    /// Never fails: a miss is a response without data.
    pub fn read(&self, operation: &Operation, cache_headers: &CacheHeaders) -> Response<Value> {
        self.read_operation(operation, cache_headers)
            .map(|(response, _)| response)
            .unwrap_or_else(|| Response {
                from_cache: true,
                ..Default::default()
            })
    }

    /// Read an operation from the cache, along with the records it was read from.
    pub(crate) fn read_operation(
        &self,
        operation: &Operation,
        cache_headers: &CacheHeaders,
    ) -> Option<(Response<Value>, Vec<Record>)> {
        // an evicting read removes its records under the same write lock
        let result = if cache_headers.evict_after_read() {
            self.write_transaction(|store| store.read_and_evict(operation))
        } else {
            self.read_transaction(|store| store.read(operation))
        };
        let result = match result {
            Ok(result) => result,
            Err(error) => {
                tracing::debug!(
                    operation = %operation.name(),
                    "cache miss: {error}"
                );
                return None;
            }
        };

        let response = Response {
            data: Some(Value::Object(result.data)),
            errors: Vec::new(),
            from_cache: true,
            dependent_keys: result.dependent_keys,
        };
        Some((response, result.records.into_values().collect()))
    }

    /// Run `f` with shared access to the backend. Every read inside sees the same snapshot.
    pub fn read_transaction<R>(&self, f: impl FnOnce(&ReadableStore<'_>) -> R) -> R {
        let cache = self.inner.cache.read();
        f(&ReadableStore {
            cache: &**cache,
            resolver: self.inner.resolver.as_ref(),
        })
    }

    /// Run `f` with exclusive access to the backend.
    pub fn write_transaction<R>(&self, f: impl FnOnce(&mut WriteableStore<'_>) -> R) -> R {
        let mut cache = self.inner.cache.write();
        f(&mut WriteableStore {
            cache: &mut **cache,
            resolver: self.inner.resolver.as_ref(),
        })
    }

    /// Notify the subscribers depending on any of the changed keys.
    ///
    /// Notifications run on the dispatcher. An empty set notifies no one.
    pub fn publish(&self, changed_keys: HashSet<String>) {
        if changed_keys.is_empty() {
            return;
        }
        let inner = self.inner.clone();
        self.inner.dispatcher.spawn(async move {
            inner.notify(&changed_keys);
        });
    }

    pub fn subscribe(
        &self,
        dependent_keys: HashSet<String>,
        subscriber: Arc<dyn StoreSubscriber>,
    ) -> SubscriptionId {
        let id = SubscriptionId(
            self.inner
                .next_subscription
                .fetch_add(1, Ordering::Relaxed),
        );
        self.inner.subscriptions.lock().insert(
            id,
            Subscription {
                dependent_keys,
                subscriber,
            },
        );
        id
    }

    /// Replace the dependencies of a subscription. Returns `false` if it does not exist anymore.
    pub fn update_subscription(&self, id: SubscriptionId, dependent_keys: HashSet<String>) -> bool {
        match self.inner.subscriptions.lock().get_mut(&id) {
            Some(subscription) => {
                subscription.dependent_keys = dependent_keys;
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscriptions.lock().remove(&id).is_some()
    }

    pub(crate) fn normalize_response(
        &self,
        operation: &Operation,
        data: &Object,
    ) -> Result<NormalizedResponse, CacheError> {
        Normalizer::new(operation.variables(), self.resolver()).normalize(
            operation.root_key(),
            operation.selections(),
            data,
        )
    }

    /// Flatten the data of an operation into records, without storing them.
    pub fn normalize(
        &self,
        operation: &Operation,
        data: &Object,
    ) -> Result<Vec<Record>, CacheError> {
        self.normalize_response(operation, data)
            .map(NormalizedResponse::into_records)
    }

    /// Write the data of an operation to the cache. Returns the changed keys without publishing
    /// them.
    pub fn write(
        &self,
        operation: &Operation,
        data: &Object,
    ) -> Result<HashSet<String>, CacheError> {
        let records = self.normalize(operation, data)?;
        self.write_transaction(|store| store.merge(records, &CacheHeaders::none()))
    }

    /// Write the data of an operation to the cache and notify the subscribers depending on it.
    pub fn write_and_publish(
        &self,
        operation: &Operation,
        data: &Object,
    ) -> Result<HashSet<String>, CacheError> {
        let changed_keys = self.write(operation, data)?;
        self.publish(changed_keys.clone());
        Ok(changed_keys)
    }

    pub fn load_record(&self, key: &CacheKey) -> Option<Record> {
        self.read_transaction(|store| store.load_record(key))
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        self.write_transaction(|store| store.remove(key))
    }

    pub fn clear_all(&self) {
        self.write_transaction(|store| store.clear_all())
    }

    pub fn len(&self) -> usize {
        self.read_transaction(|store| store.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    fn notify(&self, changed_keys: &HashSet<String>) {
        // the registry is not locked while subscribers run, they may unsubscribe
        let subscribers: Vec<_> = self
            .subscriptions
            .lock()
            .values()
            .filter(|subscription| !subscription.dependent_keys.is_disjoint(changed_keys))
            .map(|subscription| subscription.subscriber.clone())
            .collect();
        tracing::trace!(
            changed = changed_keys.len(),
            subscribers = subscribers.len(),
            "publishing changed keys"
        );
        for subscriber in subscribers {
            subscriber.on_records_changed(changed_keys);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::cache::headers::DO_NOT_STORE;
    use crate::cache::headers::EVICT_AFTER_READ;
    use crate::cache::key_resolver::DefaultCacheKeyResolver;
    use crate::cache::storage::MemoryCache;
    use crate::spec::Field;

    fn store() -> ApolloStore {
        ApolloStore::new(
            Box::new(MemoryCache::new()),
            Arc::new(DefaultCacheKeyResolver),
            Handle::current(),
        )
    }

    fn hero_name() -> Operation {
        Operation::builder()
            .name("HeroName")
            .document("query HeroName { hero { __typename id name } }")
            .selections(vec![
                Field::object(
                    "hero",
                    vec![
                        Field::typename().into(),
                        Field::scalar("id").into(),
                        Field::scalar("name").into(),
                    ],
                )
                .into(),
            ])
            .build()
    }

    fn object(value: Value) -> Object {
        value.as_object().cloned().unwrap()
    }

    fn r2_d2() -> Object {
        object(json!({"hero": {"__typename": "Droid", "id": "2001", "name": "R2-D2"}}))
    }

    #[tokio::test]
    async fn write_then_read() {
        let store = store();
        let changed = store.write(&hero_name(), &r2_d2()).unwrap();
        assert!(changed.contains("QUERY_ROOT.hero"));
        assert!(changed.contains("Droid:2001.name"));

        let response = store.read(&hero_name(), &CacheHeaders::none());
        assert!(response.from_cache);
        assert_eq!(response.data, Some(Value::Object(r2_d2())));
        assert!(response.dependent_keys.contains("Droid:2001.name"));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn miss_has_no_data() {
        let response = store().read(&hero_name(), &CacheHeaders::none());
        assert!(response.from_cache);
        assert_eq!(response.data, None);
    }

    #[tokio::test]
    async fn do_not_store() {
        let store = store();
        let records = store.normalize(&hero_name(), &r2_d2()).unwrap();
        let headers = CacheHeaders::builder().header(DO_NOT_STORE, "true").build();

        let changed = store
            .write_transaction(|transaction| transaction.merge(records, &headers))
            .unwrap();
        assert!(changed.is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn evict_after_read() {
        let store = store();
        store.write(&hero_name(), &r2_d2()).unwrap();
        let headers = CacheHeaders::builder().header(EVICT_AFTER_READ, "true").build();

        let response = store.read(&hero_name(), &headers);
        assert!(response.data.is_some());
        assert!(store.load_record(&CacheKey::new("Droid:2001")).is_none());
        assert_eq!(store.read(&hero_name(), &CacheHeaders::none()).data, None);
    }

    #[tokio::test]
    async fn evicting_read_keeps_unrelated_records() {
        let store = store();
        store.write(&hero_name(), &r2_d2()).unwrap();
        let luke = Record::new("Human:1000").with_field("name", json!("Luke"));
        store
            .write_transaction(|transaction| transaction.merge(vec![luke], &CacheHeaders::none()))
            .unwrap();

        let result = store
            .write_transaction(|transaction| transaction.read_and_evict(&hero_name()))
            .unwrap();
        assert!(result.records.contains_key(&CacheKey::new("Droid:2001")));
        assert!(store.load_record(&CacheKey::new("Droid:2001")).is_none());
        assert!(store.load_record(&CacheKey::new("Human:1000")).is_some());
        assert!(
            store
                .write_transaction(|transaction| transaction.read_and_evict(&hero_name()))
                .is_err()
        );
    }

    #[tokio::test]
    async fn publish_notifies_intersecting_subscribers() {
        let store = store();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let sender = tx.clone();
        let interested = store.subscribe(
            HashSet::from(["Droid:2001.name".to_string()]),
            Arc::new(move |changed: &HashSet<String>| {
                let _ = sender.send(("interested", changed.clone()));
            }),
        );
        let sender = tx.clone();
        store.subscribe(
            HashSet::from(["Human:1000.name".to_string()]),
            Arc::new(move |changed: &HashSet<String>| {
                let _ = sender.send(("unrelated", changed.clone()));
            }),
        );

        store.publish(HashSet::new());
        let changed = store.write_and_publish(&hero_name(), &r2_d2()).unwrap();

        let (who, received) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(who, "interested");
        assert_eq!(received, changed);

        assert!(store.unsubscribe(interested));
        assert!(!store.update_subscription(interested, HashSet::new()));
        store.publish(changed);
        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn updated_subscriptions_follow_new_keys() {
        let store = store();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = store.subscribe(
            HashSet::from(["Human:1000.name".to_string()]),
            Arc::new(move |changed: &HashSet<String>| {
                let _ = tx.send(changed.clone());
            }),
        );
        assert!(store.update_subscription(id, HashSet::from(["Droid:2001.name".to_string()])));

        store.write_and_publish(&hero_name(), &r2_d2()).unwrap();
        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(received.contains("Droid:2001.name"));
    }
}
