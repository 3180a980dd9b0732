use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{Value, json};
use shopquery_service::caching::FetchError;
use shopquery_service::rest::{Entity, ListFilters, Page};

use crate::{ShopServer, setup_client};

fn names(page: &Page<Value>) -> Vec<&str> {
    page.items
        .iter()
        .filter_map(|item| item["name"].as_str())
        .collect()
}

#[tokio::test]
async fn test_list_with_search() {
    let server = ShopServer::new();
    let client = setup_client(&server, |_| {});

    let page: Page<Value> = client
        .list(Entity::Products, &ListFilters::search("drill"))
        .await
        .unwrap();

    assert_eq!(
        names(&page),
        ["Cordless drill", "Hammer drill", "Drill bit set"]
    );
    assert_eq!(page.items[0], json!({"id": 1, "name": "Cordless drill"}));
    assert_eq!(page.total, 3);
    assert_eq!(page.page, 1);
    assert_eq!(page.limit, 10);
    assert_eq!(page.total_pages, 1);
    assert!(!page.has_more);

    assert_eq!(
        server.all_hits(),
        [("/api/products?search=drill".to_owned(), 1)]
    );
}

#[tokio::test]
async fn test_list_pagination() {
    let server = ShopServer::new();
    let client = setup_client(&server, |_| {});

    let filters = ListFilters {
        page: Some(2),
        limit: Some(2),
        ..Default::default()
    };
    let page: Page<Value> = client.list(Entity::Products, &filters).await.unwrap();

    assert_eq!(names(&page), ["Tile saw", "Extension ladder"]);
    assert_eq!(page.total, 6);
    assert_eq!(page.page, 2);
    assert_eq!(page.total_pages, 3);
    assert!(page.has_more);

    assert_eq!(
        server.all_hits(),
        [("/api/products?page=2&limit=2".to_owned(), 1)]
    );
}

#[tokio::test]
async fn test_extra_filters_are_passed_through() {
    let server = ShopServer::new();
    let client = setup_client(&server, |_| {});

    let mut filters = ListFilters::search("ana");
    filters.outlet_id = Some("downtown".into());
    filters.extra.insert("sort".into(), "newest".into());
    let page: Page<Value> = client.list(Entity::Customers, &filters).await.unwrap();

    assert_eq!(names(&page), ["Ana Souza"]);
    assert_eq!(
        server.all_hits(),
        [(
            "/api/customers?search=ana&outletId=downtown&sort=newest".to_owned(),
            1
        )]
    );
}

#[tokio::test]
async fn test_bearer_token() {
    let server = ShopServer::new();
    server.require_token("secret");

    let anonymous = setup_client(&server, |_| {});
    let err = anonymous
        .list::<Value>(Entity::Outlets, &ListFilters::default())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        FetchError::PermissionDenied("Authentication required".into())
    );

    let authorized = setup_client(&server, |config| config.token = Some("secret".into()));
    let page = authorized
        .list::<Value>(Entity::Outlets, &ListFilters::default())
        .await
        .unwrap();
    assert_eq!(names(&page), ["Downtown", "Harbor"]);
}

#[tokio::test]
async fn test_error_responses() {
    let server = ShopServer::new();
    let client = setup_client(&server, |_| {});
    let filters = ListFilters::default();
    let list = || client.list::<Value>(Entity::Orders, &filters);

    server.respond_with(StatusCode::NOT_FOUND, "");
    assert_eq!(list().await.unwrap_err(), FetchError::NotFound);

    server.respond_with(
        StatusCode::INTERNAL_SERVER_ERROR,
        r#"{"success": false, "message": "Database unavailable"}"#,
    );
    assert_eq!(
        list().await.unwrap_err(),
        FetchError::RequestFailed("Database unavailable".into())
    );

    server.respond_with(StatusCode::BAD_GATEWAY, "<html>oops</html>");
    assert_eq!(
        list().await.unwrap_err(),
        FetchError::RequestFailed("502 Bad Gateway".into())
    );

    server.respond_with(
        StatusCode::OK,
        r#"{"success": false, "error": "Outlet is closed"}"#,
    );
    assert_eq!(
        list().await.unwrap_err(),
        FetchError::Rejected("Outlet is closed".into())
    );

    server.respond_with(StatusCode::OK, "definitely not json");
    assert!(matches!(list().await, Err(FetchError::Malformed(_))));

    server.respond_with(StatusCode::OK, r#"{"success": true, "data": {"total": 3}}"#);
    assert_eq!(
        list().await.unwrap_err(),
        FetchError::Malformed("missing `orders` in data".into())
    );

    server.recover();
    assert_eq!(list().await.unwrap().total, 5);
}

#[tokio::test]
async fn test_timeout() {
    let server = ShopServer::new();
    server.set_delay(Duration::from_millis(500));
    let client = setup_client(&server, |config| {
        config.timeout = Duration::from_millis(100);
    });

    let err = client
        .list::<Value>(Entity::Orders, &ListFilters::default())
        .await
        .unwrap_err();
    assert_eq!(err, FetchError::Timeout(Duration::from_millis(100)));
}

#[tokio::test]
async fn test_connection_refused() {
    let server = ShopServer::new();
    let client = setup_client(&server, |_| {});
    drop(server);
    // give the aborted server task a chance to close its listener
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = client
        .list::<Value>(Entity::Orders, &ListFilters::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::RequestFailed(_)), "{err:?}");
}
