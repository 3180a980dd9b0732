//! Deduplicated, stale-while-revalidate data fetching for the rental shop API.
//!
//! The core of this crate is the [`caching`] module. A [`QueryStore`](caching::QueryStore)
//! holds cached responses and in-flight requests for one kind of data, and hands out
//! [`Query`](caching::Query) handles that track a single filter combination each.
//!
//! The [`rest`] module pairs the store with the shop's JSON API.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod logging;
pub mod rest;
