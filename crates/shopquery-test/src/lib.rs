//! Helpers for testing the query stores and the shop client.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`ShopServer`], make sure that the server is held until all requests to it
//!    have been made. If the server is dropped, it stops serving and all requests to it fail.
//!    To avoid this, assign it to a variable: `let server = ShopServer::new();`.

use std::collections::BTreeMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{self, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `shopquery_service` crate and
///    mutes all other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("shopquery_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    pub fn with_router(router: Router) -> Self {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// The listings served by [`ShopServer`], by entity.
const CATALOG: &[(&str, &[&str])] = &[
    (
        "orders",
        &[
            "Drill rental for Ana",
            "Tile saw rental for Ben",
            "Drill and bits for Cleo",
            "Ladder rental for Dev",
            "Pressure washer for Eli",
        ],
    ),
    (
        "products",
        &[
            "Cordless drill",
            "Hammer drill",
            "Tile saw",
            "Extension ladder",
            "Pressure washer",
            "Drill bit set",
        ],
    ),
    (
        "customers",
        &["Ana Souza", "Ben Okafor", "Cleo Martin", "Dev Patel"],
    ),
    ("outlets", &["Downtown", "Harbor"]),
    ("categories", &["Power tools", "Access", "Cleaning"]),
];

#[derive(Debug, Default)]
struct ShopState {
    hits: BTreeMap<String, usize>,
    delay: Duration,
    token: Option<String>,
    fault: Option<(StatusCode, String)>,
}

type SharedState = Arc<Mutex<ShopState>>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    search: Option<String>,
    page: Option<usize>,
    limit: Option<usize>,
}

/// A fake shop API serving `GET /api/<entity>` in the shop's response envelope.
///
/// Listings can be searched by name and paginated. Every request is counted, keyed by its
/// path and query string.
pub struct ShopServer {
    server: Server,
    state: SharedState,
}

impl ShopServer {
    pub fn new() -> Self {
        let state = SharedState::default();

        let router = Router::new()
            .route("/api/:entity", get(list))
            .with_state(state.clone());

        let server = Server::with_router(router);

        Self { server, state }
    }

    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }

    /// The base URL the entity paths are relative to.
    pub fn base_url(&self) -> Url {
        self.server.url("/")
    }

    /// Delays every following response by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = delay;
    }

    /// Rejects every following request without `Authorization: Bearer <token>`.
    pub fn require_token(&self, token: &str) {
        self.state.lock().unwrap().token = Some(token.to_owned());
    }

    /// Answers every following request with `status` and the raw `body`.
    pub fn respond_with(&self, status: StatusCode, body: impl Into<String>) {
        self.state.lock().unwrap().fault = Some((status, body.into()));
    }

    /// Goes back to serving regular listings.
    pub fn recover(&self) {
        self.state.lock().unwrap().fault = None;
    }

    /// Returns the number of requests since the last call, and resets the counter.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut self.state.lock().unwrap().hits);
        map.into_values().sum()
    }

    /// Returns the requests since the last call by path and query, and resets the counter.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let map = std::mem::take(&mut self.state.lock().unwrap().hits);
        map.into_iter().collect()
    }
}

impl Default for ShopServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn list(
    State(state): State<SharedState>,
    extract::Path(entity): extract::Path<String>,
    extract::OriginalUri(uri): extract::OriginalUri,
    extract::Query(params): extract::Query<ListParams>,
    headers: HeaderMap,
) -> Response {
    let (delay, token, fault) = {
        let mut state = state.lock().unwrap();
        *state.hits.entry(uri.to_string()).or_default() += 1;
        (state.delay, state.token.clone(), state.fault.clone())
    };

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    if let Some(token) = token {
        let expected = format!("Bearer {token}");
        let authorized = headers
            .get(header::AUTHORIZATION)
            .is_some_and(|value| value.as_bytes() == expected.as_bytes());
        if !authorized {
            return failure(StatusCode::UNAUTHORIZED, "Authentication required");
        }
    }

    if let Some((status, body)) = fault {
        return (status, [(header::CONTENT_TYPE, "application/json")], body).into_response();
    }

    let Some((_, names)) = CATALOG.iter().find(|(name, _)| *name == entity) else {
        return failure(StatusCode::NOT_FOUND, "Not found");
    };

    let search = params.search.map(|s| s.to_lowercase());
    let matching: Vec<Value> = names
        .iter()
        .enumerate()
        .filter(|(_, name)| {
            search
                .as_ref()
                .is_none_or(|s| name.to_lowercase().contains(s))
        })
        .map(|(idx, name)| json!({ "id": idx + 1, "name": name }))
        .collect();

    let total = matching.len();
    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(10).max(1);
    let items: Vec<Value> = matching
        .into_iter()
        .skip((page - 1) * limit)
        .take(limit)
        .collect();

    Json(json!({
        "success": true,
        "data": {
            entity: items,
            "total": total,
            "page": page,
            "limit": limit,
        },
    }))
    .into_response()
}

fn failure(status: StatusCode, error: &str) -> Response {
    let body = json!({ "success": false, "error": error });
    (status, Json(body)).into_response()
}
