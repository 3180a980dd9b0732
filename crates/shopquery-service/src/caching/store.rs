use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;

use super::{CacheKey, FetchError, StoreConfig};

/// The outcome of a fetch, shared between everyone waiting on it.
pub type FetchResult<T> = Result<Arc<T>, FetchError>;

/// A handle to a running fetch that can be awaited by any number of callers.
pub type SharedFetch<T> = Shared<BoxFuture<'static, FetchResult<T>>>;

/// How long a freshly fetched entry is served without refresh, and how long it is kept at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freshness {
    /// Age after which the entry is served as stale and refreshed in the background.
    pub stale_time: Duration,
    /// Age after which the entry is dropped and has to be fetched again.
    pub cache_time: Duration,
}

/// The result of looking up a [`CacheKey`] in the [`QueryStore`].
#[derive(Debug)]
pub enum Lookup<T> {
    /// The entry is younger than its `stale_time`.
    Fresh(Arc<T>),
    /// The entry is older than its `stale_time`, but still within its `cache_time`.
    Stale(Arc<T>),
    /// There is no usable entry.
    Missing,
}

/// An item saved in the in-memory moka cache.
#[derive(Debug)]
struct CachedItem<T> {
    /// The actual data.
    data: Arc<T>,
    /// When the data was received.
    fetched_at: Instant,
    freshness: Freshness,
}

impl<T> Clone for CachedItem<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            fetched_at: self.fetched_at,
            freshness: self.freshness,
        }
    }
}

impl<T> CachedItem<T> {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.fetched_at)
    }

    fn is_stale(&self, now: Instant) -> bool {
        self.age(now) >= self.freshness.stale_time
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.age(now) > self.freshness.cache_time
    }
}

struct InFlight<T> {
    id: u64,
    fetch: SharedFetch<T>,
}

type InFlightMap<T> = Arc<Mutex<HashMap<CacheKey, InFlight<T>>>>;

/// Removes an in-flight registration when dropped, unless it was replaced in the meantime.
struct InFlightGuard<T> {
    in_flight: InFlightMap<T>,
    key: CacheKey,
    id: u64,
}

impl<T> Drop for InFlightGuard<T> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.get(&self.key).is_some_and(|entry| entry.id == self.id) {
            in_flight.remove(&self.key);
        }
    }
}

/// Shared registry of cached responses and in-flight requests for one kind of data.
///
/// All [`Query`](super::Query) handles created from clones of the same store share one cache
/// and one set of in-flight requests:
///
/// - Concurrent fetches for the same [`CacheKey`] are coalesced into a single call of the fetch
///   function. The fetch runs as its own task, so it completes and populates the cache even if
///   every caller lost interest in it.
/// - Successful results are cached; failures never are.
/// - Entries are evicted lazily. Every successful fetch sweeps out entries older than their
///   `cache_time`, and lookups treat such entries as absent. The number of entries is also
///   bounded by [`StoreConfig::in_memory_capacity`].
///
/// Fetching requires a running `tokio` runtime.
pub struct QueryStore<T> {
    name: Arc<str>,
    entries: moka::sync::Cache<CacheKey, CachedItem<T>>,
    in_flight: InFlightMap<T>,
    next_fetch_id: Arc<AtomicU64>,
}

impl<T: Send + Sync + 'static> Clone for QueryStore<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            entries: self.entries.clone(),
            in_flight: Arc::clone(&self.in_flight),
            next_fetch_id: Arc::clone(&self.next_fetch_id),
        }
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for QueryStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let in_flight = self.in_flight.try_lock().map(|m| m.len()).unwrap_or_default();
        f.debug_struct("QueryStore")
            .field("name", &self.name)
            .field("in-memory items", &self.entries.entry_count())
            .field("in-flight requests", &in_flight)
            .finish()
    }
}

impl<T> QueryStore<T>
where
    T: Send + Sync + 'static,
{
    /// Creates an empty store.
    ///
    /// The `name` becomes the namespace of all cache keys derived by this store.
    pub fn new(name: impl Into<Arc<str>>, config: &StoreConfig) -> Self {
        let name = name.into();
        let entries = moka::sync::Cache::builder()
            .max_capacity(config.in_memory_capacity)
            .name(&name)
            .build();

        Self {
            name,
            entries,
            in_flight: Default::default(),
            next_fetch_id: Default::default(),
        }
    }

    /// The name of this store, which is also the namespace of its cache keys.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Derives the [`CacheKey`] for `filters` in this store's namespace.
    pub fn cache_key<F>(&self, filters: &F) -> Result<CacheKey, FetchError>
    where
        F: serde::Serialize + ?Sized,
    {
        CacheKey::new(&self.name, filters)
    }

    /// Looks up the cached entry for `key`.
    ///
    /// An entry older than its `cache_time` is reported as missing, even if it has not been
    /// swept yet.
    pub fn lookup(&self, key: &CacheKey) -> Lookup<T> {
        let Some(item) = self.entries.get(key) else {
            return Lookup::Missing;
        };

        let now = Instant::now();
        if item.is_expired(now) {
            // left for the next sweep, a concurrent fetch may be about to replace it
            tracing::trace!(%key, "Ignoring expired entry");
            Lookup::Missing
        } else if item.is_stale(now) {
            Lookup::Stale(item.data)
        } else {
            Lookup::Fresh(item.data)
        }
    }

    /// Returns the running fetch for `key`, or starts a new one.
    ///
    /// `make_fetch` is only invoked if no fetch for `key` is currently in flight. It is called
    /// while the in-flight registry is locked, so it must not access this store itself. The
    /// resulting future is spawned onto the runtime right away.
    ///
    /// When the fetch succeeds, its result is written to the cache with the given
    /// [`Freshness`] and expired entries are swept. In any case the in-flight registration is
    /// removed once the fetch is done, after the cache has been written.
    pub fn fetch<Fut>(
        &self,
        key: &CacheKey,
        freshness: Freshness,
        make_fetch: impl FnOnce() -> Fut,
    ) -> SharedFetch<T>
    where
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = in_flight.get(key) {
            metric!(counter("queries.dedup") += 1, "query" => self.name());
            tracing::trace!(%key, "Joining in-flight fetch");
            return running.fetch.clone();
        }

        let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let done_guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            key: key.clone(),
            id,
        };

        tracing::trace!(%key, "Spawning fetch");
        let future = make_fetch();
        let this = self.clone();
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let _done_guard = done_guard; // move into the future
            let result = future.await;
            this.complete(task_key, freshness, result)
        });

        let fetch = async move {
            match task.await {
                Ok(result) => result,
                Err(join_error) => Err(FetchError::from_std_error(join_error)),
            }
        }
        .boxed()
        .shared();

        in_flight.insert(
            key.clone(),
            InFlight {
                id,
                fetch: fetch.clone(),
            },
        );
        fetch
    }

    fn complete(
        &self,
        key: CacheKey,
        freshness: Freshness,
        result: Result<T, FetchError>,
    ) -> FetchResult<T> {
        match result {
            Ok(data) => {
                metric!(counter("queries.fetch") += 1, "query" => self.name(), "status" => "ok");
                let data = Arc::new(data);
                let item = CachedItem {
                    data: Arc::clone(&data),
                    fetched_at: Instant::now(),
                    freshness,
                };
                self.entries.insert(key, item);
                self.sweep();
                Ok(data)
            }
            Err(error) => {
                metric!(
                    counter("queries.fetch") += 1,
                    "query" => self.name(),
                    "status" => error.kind(),
                );
                tracing::debug!(%key, %error, "Fetch failed");
                Err(error)
            }
        }
    }

    /// Removes the cached entry for `key`. A fetch in flight for `key` is not affected.
    pub fn invalidate(&self, key: &CacheKey) {
        self.entries.invalidate(key);
    }

    /// Removes all entries older than their `cache_time` and returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, item)| item.is_expired(now))
            .map(|(key, _)| key)
            .collect();

        for key in &expired {
            self.entries.invalidate(key.as_ref());
        }

        if !expired.is_empty() {
            metric!(counter("queries.evicted") += expired.len() as i64, "query" => self.name());
            tracing::debug!(store = self.name(), count = expired.len(), "Swept expired entries");
        }
        expired.len()
    }

    /// The number of cached entries, including ones that are expired but not yet swept.
    pub fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    /// The number of fetches currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
