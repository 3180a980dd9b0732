//! Listings of the rental shop API, served through per-entity [`QueryStore`]s.

mod client;
mod entity;
mod envelope;
mod filters;

pub use client::{ShopClient, USER_AGENT};
pub use entity::{Entity, UnknownEntity};
pub use envelope::{ApiEnvelope, Page};
pub use filters::ListFilters;

use crate::caching::{FetchFn, Query, QueryOptions, QueryStore, fetch_fn};
use crate::config::QueriesConfig;

/// A normalized page of untyped listing items.
pub type Listing = Page<serde_json::Value>;

/// Entry point for querying listings.
///
/// Holds one [`QueryStore`] per [`Entity`]. Clones share the stores, so all queries created
/// from one `ShopQueries` deduplicate their requests and share cached pages.
#[derive(Debug, Clone)]
pub struct ShopQueries {
    client: ShopClient,
    config: QueriesConfig,
    stores: [QueryStore<Listing>; Entity::ALL.len()],
}

impl ShopQueries {
    pub fn new(client: ShopClient, config: QueriesConfig) -> Self {
        let store_config = config.store_config();
        let stores = Entity::ALL.map(|entity| QueryStore::new(entity.name(), &store_config));

        Self {
            client,
            config,
            stores,
        }
    }

    pub fn client(&self) -> &ShopClient {
        &self.client
    }

    pub fn store(&self, entity: Entity) -> &QueryStore<Listing> {
        &self.stores[entity as usize]
    }

    /// The effective options for queries of `entity`.
    pub fn options(&self, entity: Entity) -> QueryOptions {
        self.config.options(entity)
    }

    /// A fetch function listing `entity` with the filters it is called with.
    pub fn fetch_fn(&self, entity: Entity) -> FetchFn<ListFilters, Listing> {
        let client = self.client.clone();
        fetch_fn(move |filters: ListFilters| {
            let client = client.clone();
            async move { client.list(entity, &filters).await }
        })
    }

    /// Creates a query for `entity` with the configured options and runs its first lookup.
    pub fn query(&self, entity: Entity, filters: ListFilters) -> Query<ListFilters, Listing> {
        self.store(entity)
            .query(self.fetch_fn(entity), filters, self.options(entity))
    }
}
