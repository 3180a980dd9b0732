use std::time::Duration;

use shopquery_service::config::{ApiConfig, QueriesConfig};
use shopquery_service::rest::{ShopClient, ShopQueries};
use shopquery_test as test;

pub use test::ShopServer;

/// Setup tests and create a client talking to `server`.
///
/// The `update_config` closure can modify the default configuration before the client is
/// created.
pub fn setup_client(
    server: &ShopServer,
    update_config: impl FnOnce(&mut ApiConfig),
) -> ShopClient {
    test::setup();

    let mut config = ApiConfig {
        base_url: server.base_url(),
        token: None,
        timeout: Duration::from_secs(5),
    };
    update_config(&mut config);

    ShopClient::new(&config).unwrap()
}

/// Setup tests and create query stores backed by `server`.
pub fn setup_queries(
    server: &ShopServer,
    update_config: impl FnOnce(&mut QueriesConfig),
) -> ShopQueries {
    let client = setup_client(server, |_| {});

    let mut config = QueriesConfig::default();
    update_config(&mut config);

    ShopQueries::new(client, config)
}
