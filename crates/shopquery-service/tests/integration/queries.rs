use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use shopquery_service::caching::FetchError;
use shopquery_service::config::QueryTimings;
use shopquery_service::rest::{Entity, ListFilters};

use crate::{ShopServer, setup_queries};

#[tokio::test]
async fn test_concurrent_queries_share_one_request() {
    let server = ShopServer::new();
    server.set_delay(Duration::from_millis(100));
    let queries = setup_queries(&server, |_| {});

    let mut handles: Vec<_> = (0..3)
        .map(|_| queries.query(Entity::Orders, ListFilters::search("drill")))
        .collect();
    assert!(handles.iter().all(|query| query.state().loading));
    for query in &mut handles {
        query.settled().await;
    }

    assert_eq!(server.accesses(), 1);

    let states: Vec<_> = handles.iter().map(|query| query.state()).collect();
    let first = states[0].data.as_ref().unwrap();
    assert_eq!(first.total, 2);
    for state in &states {
        assert!(!state.loading);
        assert!(state.error.is_none());
        assert!(Arc::ptr_eq(first, state.data.as_ref().unwrap()));
    }
}

#[tokio::test]
async fn test_cached_pages_are_reused() {
    let server = ShopServer::new();
    let queries = setup_queries(&server, |_| {});

    let mut first = queries.query(Entity::Products, ListFilters::search("saw"));
    first.settled().await;
    assert_eq!(server.accesses(), 1);

    // equivalent filters written differently
    let filters = ListFilters {
        search: Some("saw".into()),
        status: None,
        ..Default::default()
    };
    let second = queries.query(Entity::Products, filters);
    let state = second.state();
    assert!(!state.loading);
    assert!(!state.is_stale);
    assert_eq!(state.data.unwrap().items.len(), 1);
    assert_eq!(server.accesses(), 0);

    // same filters, different entity
    let mut customers = queries.query(Entity::Customers, ListFilters::search("saw"));
    customers.settled().await;
    assert_eq!(customers.state().data.unwrap().total, 0);
    assert_eq!(server.accesses(), 1);

    assert_eq!(queries.store(Entity::Products).entry_count(), 1);
    assert_eq!(queries.store(Entity::Customers).entry_count(), 1);
    assert_eq!(queries.store(Entity::Orders).entry_count(), 0);
}

#[tokio::test]
async fn test_failures_are_not_cached() {
    let server = ShopServer::new();
    server.respond_with(
        StatusCode::SERVICE_UNAVAILABLE,
        r#"{"success": false, "error": "Maintenance"}"#,
    );
    let queries = setup_queries(&server, |_| {});

    let mut query = queries.query(Entity::Categories, ListFilters::default());
    query.settled().await;
    let state = query.state();
    assert_eq!(
        state.error,
        Some(FetchError::RequestFailed("Maintenance".into()))
    );
    assert!(state.data.is_none());
    assert!(!state.loading);
    assert_eq!(queries.store(Entity::Categories).entry_count(), 0);

    server.recover();
    query.refetch().await;
    let state = query.state();
    assert!(state.error.is_none());
    assert_eq!(state.data.unwrap().total, 3);
    assert_eq!(server.accesses(), 2);
}

#[tokio::test]
async fn test_filter_changes_follow_the_latest_filters() {
    let server = ShopServer::new();
    let queries = setup_queries(&server, |_| {});

    let mut query = queries.query(Entity::Customers, ListFilters::search("ana"));
    query.set_filters(ListFilters::search("ben"));
    query.settled().await;

    let state = query.state();
    let names: Vec<_> = state
        .data
        .as_ref()
        .unwrap()
        .items
        .iter()
        .filter_map(|item| item["name"].as_str())
        .collect();
    assert_eq!(names, ["Ben Okafor"]);
}

#[tokio::test]
async fn test_configured_timings() {
    let server = ShopServer::new();
    let queries = setup_queries(&server, |config| {
        config.refetch_on_window_focus = true;
        config.entities.insert(
            Entity::Orders,
            QueryTimings {
                stale_time: Some(Duration::ZERO),
                cache_time: None,
            },
        );
    });

    let options = queries.options(Entity::Orders);
    assert_eq!(options.stale_time, Duration::ZERO);
    assert_eq!(options.cache_time, Duration::from_secs(300));
    assert_eq!(
        queries.options(Entity::Outlets).stale_time,
        Duration::from_secs(300)
    );

    let mut query = queries.query(Entity::Orders, ListFilters::default());
    query.settled().await;
    assert_eq!(server.accesses(), 1);

    // everything is stale right away, so focus refreshes in the background
    assert!(query.window_focused());
    let state = query.state();
    assert!(state.is_stale);
    assert!(!state.loading);
    query.settled().await;
    assert!(!query.state().is_stale);
    assert_eq!(server.accesses(), 1);

    let mut outlets = queries.query(Entity::Outlets, ListFilters::default());
    outlets.settled().await;
    assert!(!outlets.window_focused());
}
