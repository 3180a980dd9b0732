use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{CacheKey, FetchError, FetchResult, Freshness, Lookup, QueryStore};

/// The function a [`Query`] calls to actually load its data.
///
/// It receives the query's current filters. Failures must be reported as `Err`.
pub type FetchFn<F, T> =
    Arc<dyn Fn(F) -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync>;

/// Wraps an async closure into a [`FetchFn`].
pub fn fetch_fn<F, T, Fut>(f: impl Fn(F) -> Fut + Send + Sync + 'static) -> FetchFn<F, T>
where
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
    Arc::new(move |filters| f(filters).boxed())
}

/// Options controlling a single [`Query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// When `false`, nothing is fetched and `loading` stays `false`.
    pub enabled: bool,
    /// Age after which cached data is served as stale and refreshed in the background.
    pub stale_time: Duration,
    /// Age after which cached data is not served at all anymore.
    pub cache_time: Duration,
    /// Whether [`Query::window_focused`] refreshes stale data.
    pub refetch_on_window_focus: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_time: Duration::from_secs(30),
            cache_time: Duration::from_secs(300),
            refetch_on_window_focus: false,
        }
    }
}

impl QueryOptions {
    pub fn freshness(&self) -> Freshness {
        Freshness {
            stale_time: self.stale_time,
            cache_time: self.cache_time,
        }
    }
}

/// What a [`Query`] currently knows about its data.
#[derive(Debug)]
pub struct QueryState<T> {
    /// The last successfully fetched data, fresh or stale.
    pub data: Option<Arc<T>>,
    /// `true` while a request for data that is not cached at all is outstanding.
    ///
    /// Background refreshes of stale data do not set this.
    pub loading: bool,
    /// The most recent failure, cleared by the next success or filter change.
    pub error: Option<FetchError>,
    /// `true` when `data` came from a stale cache entry and a refresh is pending.
    pub is_stale: bool,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
            is_stale: false,
        }
    }
}

impl<T> Clone for QueryState<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            loading: self.loading,
            error: self.error.clone(),
            is_stale: self.is_stale,
        }
    }
}

/// Publishes [`QueryState`] changes, and makes sure only results of the latest request are
/// applied.
///
/// Every filter change or refetch starts a new generation. A fetch result carries the
/// generation it was started in and is dropped if that is no longer the current one. The
/// generation lock is held while the state is modified, so a bump and a late result can not
/// interleave.
struct Tracker<T> {
    generation: Mutex<u64>,
    state: watch::Sender<QueryState<T>>,
}

impl<T> Tracker<T> {
    fn new() -> Self {
        let (state, _) = watch::channel(QueryState::default());
        Self {
            generation: Mutex::new(0),
            state,
        }
    }

    /// Starts a new generation and applies `update` as part of it.
    fn advance(&self, update: impl FnOnce(&mut QueryState<T>)) -> u64 {
        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *generation += 1;
        self.state.send_modify(update);
        *generation
    }

    /// Applies `update` within the current generation.
    fn update(&self, update: impl FnOnce(&mut QueryState<T>)) {
        let _generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        self.state.send_if_modified(|state| {
            let before = (state.loading, state.is_stale);
            update(state);
            before != (state.loading, state.is_stale)
        });
    }

    /// Applies the result of a fetch started in `generation`.
    ///
    /// Returns `false` if the result was discarded because a newer generation started.
    fn settle(&self, generation: u64, result: FetchResult<T>) -> bool {
        let current = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != generation {
            return false;
        }

        self.state.send_modify(|state| {
            state.loading = false;
            match result {
                Ok(data) => {
                    state.data = Some(data);
                    state.error = None;
                    state.is_stale = false;
                }
                Err(error) => state.error = Some(error),
            }
        });
        true
    }

    fn has_data(&self) -> bool {
        self.state.borrow().data.is_some()
    }
}

/// Tracks the data for one filter combination, backed by a shared [`QueryStore`].
///
/// A query serves cached data right away when it is fresh, serves stale data while refreshing
/// it in the background, and otherwise fetches. Whenever the filters or options change the
/// lookup is repeated. The outcome is published as a [`QueryState`], which can be read with
/// [`state`](Self::state) or observed with [`subscribe`](Self::subscribe).
///
/// Results of requests that were superseded by a later filter change or refetch are never
/// applied. Such requests are not cancelled, though: they still complete and populate the
/// cache for other queries. Dropping a query abandons its pending request in the same way.
///
/// Errors of the fetch function end up in [`QueryState::error`]. There are no automatic
/// retries, call [`refetch`](Self::refetch) or change the filters instead.
pub struct Query<F, T> {
    store: QueryStore<T>,
    fetch_fn: FetchFn<F, T>,
    filters: F,
    options: QueryOptions,
    /// The key of the last lookup, if it still counts as current.
    last_key: Option<CacheKey>,
    tracker: Arc<Tracker<T>>,
    /// Waits for the outstanding fetch and applies its result.
    waiter: Option<JoinHandle<()>>,
}

impl<F, T> fmt::Debug for Query<F, T>
where
    F: fmt::Debug,
    T: fmt::Debug + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("store", &self.store)
            .field("filters", &self.filters)
            .field("options", &self.options)
            .field("last_key", &self.last_key)
            .field("state", &*self.tracker.state.borrow())
            .finish()
    }
}

impl<T> QueryStore<T>
where
    T: Send + Sync + 'static,
{
    /// Creates a [`Query`] on this store and runs its first lookup.
    pub fn query<F>(&self, fetch_fn: FetchFn<F, T>, filters: F, options: QueryOptions) -> Query<F, T>
    where
        F: Serialize + Clone + Send + 'static,
    {
        Query::new(self.clone(), fetch_fn, filters, options)
    }
}

impl<F, T> Query<F, T>
where
    F: Serialize + Clone + Send + 'static,
    T: Send + Sync + 'static,
{
    /// Creates a new query and runs its first lookup.
    ///
    /// This must be called from within a `tokio` runtime.
    pub fn new(
        store: QueryStore<T>,
        fetch_fn: FetchFn<F, T>,
        filters: F,
        options: QueryOptions,
    ) -> Self {
        let mut query = Self {
            store,
            fetch_fn,
            filters,
            options,
            last_key: None,
            tracker: Arc::new(Tracker::new()),
            waiter: None,
        };
        query.run();
        query
    }

    /// Returns a snapshot of the current state.
    pub fn state(&self) -> QueryState<T> {
        self.tracker.state.borrow().clone()
    }

    /// Returns a receiver that is notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<QueryState<T>> {
        self.tracker.state.subscribe()
    }

    pub fn filters(&self) -> &F {
        &self.filters
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// The cache key of the last lookup, if any.
    pub fn key(&self) -> Option<&CacheKey> {
        self.last_key.as_ref()
    }

    /// Switches to new filters.
    ///
    /// Nothing happens if the new filters map to the same cache key as before and data is
    /// already present.
    pub fn set_filters(&mut self, filters: F) {
        self.filters = filters;
        self.run();
    }

    /// Replaces the options and repeats the lookup.
    pub fn set_options(&mut self, options: QueryOptions) {
        self.options = options;
        self.run();
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.set_options(QueryOptions {
            enabled,
            ..self.options
        });
    }

    /// Drops the cached entry for the current filters and fetches them again, regardless of
    /// staleness.
    ///
    /// Resolves once that fetch has completed. If a fetch for the same filters is already in
    /// flight, that one is awaited instead of starting another.
    pub async fn refetch(&mut self) {
        if !self.options.enabled {
            return;
        }
        if let Ok(key) = self.store.cache_key(&self.filters) {
            self.store.invalidate(&key);
        }
        self.last_key = None;
        self.run();
        self.settled().await;
    }

    /// Handles the application window regaining focus.
    ///
    /// With [`QueryOptions::refetch_on_window_focus`], a stale cache entry for the current
    /// filters triggers a refresh. Returns whether a refresh was started.
    pub fn window_focused(&mut self) -> bool {
        if !self.options.enabled || !self.options.refetch_on_window_focus {
            return false;
        }
        let Ok(key) = self.store.cache_key(&self.filters) else {
            return false;
        };

        match self.store.lookup(&key) {
            Lookup::Stale(_) => {
                tracing::debug!(%key, "Refreshing stale data on focus");
                self.last_key = None;
                self.run();
                true
            }
            Lookup::Fresh(_) | Lookup::Missing => false,
        }
    }

    /// Waits until the outstanding fetch of this query, if any, has been applied.
    pub async fn settled(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            if let Err(err) = waiter.await {
                if err.is_panic() {
                    tracing::error!(error = &err as &dyn std::error::Error, "Query waiter panicked");
                }
            }
        }
    }

    fn abandon_waiter(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            waiter.abort();
        }
    }

    fn run(&mut self) {
        if !self.options.enabled {
            self.tracker.update(|state| state.loading = false);
            return;
        }

        let key = match self.store.cache_key(&self.filters) {
            Ok(key) => key,
            Err(error) => {
                self.abandon_waiter();
                self.last_key = None;
                self.tracker.advance(|state| {
                    state.loading = false;
                    state.is_stale = false;
                    state.error = Some(error);
                });
                return;
            }
        };

        if self.last_key.as_ref() == Some(&key) && self.tracker.has_data() {
            return;
        }

        self.abandon_waiter();
        self.last_key = Some(key.clone());

        let name = self.store.name();
        metric!(counter("queries.access") += 1, "query" => name);

        let generation = match self.store.lookup(&key) {
            Lookup::Fresh(data) => {
                metric!(counter("queries.memory.hit") += 1, "query" => name, "status" => "fresh");
                self.tracker.advance(|state| {
                    state.data = Some(data);
                    state.loading = false;
                    state.error = None;
                    state.is_stale = false;
                });
                return;
            }
            Lookup::Stale(data) => {
                metric!(counter("queries.memory.hit") += 1, "query" => name, "status" => "stale");
                self.tracker.advance(|state| {
                    state.data = Some(data);
                    state.loading = false;
                    state.error = None;
                    state.is_stale = true;
                })
            }
            Lookup::Missing => {
                metric!(counter("queries.memory.miss") += 1, "query" => name);
                self.tracker.advance(|state| {
                    state.loading = true;
                    state.error = None;
                    state.is_stale = false;
                })
            }
        };

        let fetch_fn = Arc::clone(&self.fetch_fn);
        let filters = self.filters.clone();
        let fetch = self
            .store
            .fetch(&key, self.options.freshness(), move || fetch_fn(filters));

        let tracker = Arc::clone(&self.tracker);
        let store_name = name.to_owned();
        self.waiter = Some(tokio::spawn(async move {
            let result = fetch.await;
            if !tracker.settle(generation, result) {
                metric!(counter("queries.discarded") += 1, "query" => &store_name);
                tracing::trace!(%key, generation, "Discarding superseded result");
            }
        }));
    }
}

impl<F, T> Drop for Query<F, T> {
    fn drop(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            waiter.abort();
        }
    }
}
