//! The deduplicating, stale-while-revalidate fetch cache.
//!
//! A [`QueryStore`] is constructed once per kind of data and shared between all [`Query`]
//! handles that read from it. See [`Query`] for the lookup rules.

mod cache_key;
mod config;
mod fetch_error;
mod query;
mod store;

pub use cache_key::CacheKey;
pub use config::StoreConfig;
pub use fetch_error::FetchError;
pub use query::{FetchFn, Query, QueryOptions, QueryState, fetch_fn};
pub use store::{FetchResult, Freshness, Lookup, QueryStore, SharedFetch};
