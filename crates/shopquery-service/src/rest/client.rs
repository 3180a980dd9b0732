use std::error::Error;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{StatusCode, header};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::Value;
use url::Url;

use crate::caching::FetchError;
use crate::config::ApiConfig;

use super::{ApiEnvelope, Entity, ListFilters, Page};

pub const USER_AGENT: &str = concat!("shopquery/", env!("CARGO_PKG_VERSION"));

/// Client for the listing endpoints of the shop API.
#[derive(Debug, Clone)]
pub struct ShopClient {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    timeout: Duration,
}

impl ShopClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to create HTTP client")?;

        // without a trailing slash, `join` would replace the last path segment
        let mut base_url = config.base_url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            token: config.token.clone(),
            timeout: config.timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Fetches one page of `entity` and normalizes it.
    pub async fn list<T: DeserializeOwned>(
        &self,
        entity: Entity,
        filters: &ListFilters,
    ) -> Result<Page<T>, FetchError> {
        let url = self
            .base_url
            .join(&entity.path())
            .map_err(FetchError::from_std_error)?;

        tracing::debug!("Fetching {entity} from `{url}`");

        let mut builder = self
            .client
            .get(url)
            .query(filters)
            .header(header::USER_AGENT, USER_AGENT);
        if let Some(ref token) = self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| self.request_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.ok();
            return Err(error_for_status(entity, status, body.as_deref()));
        }

        let body = response.bytes().await.map_err(|e| self.request_error(e))?;
        let envelope: ApiEnvelope<Value> = serde_json::from_slice(&body)?;
        Page::from_data(entity.collection_field(), envelope.into_data()?)
    }

    fn request_error(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            return FetchError::Timeout(self.timeout);
        }

        let mut error: &dyn Error = &error;
        while let Some(src) = error.source() {
            error = src;
        }
        FetchError::RequestFailed(error.to_string())
    }
}

/// Infers the [`FetchError`] for an unsuccessful response.
///
/// The envelope's `error` or `message` is used as details if the body has one.
fn error_for_status(entity: Entity, status: StatusCode, body: Option<&str>) -> FetchError {
    debug_assert!(!status.is_success());

    let details = body
        .and_then(|body| serde_json::from_str::<ApiEnvelope<IgnoredAny>>(body).ok())
        .and_then(|envelope| envelope.error.or(envelope.message))
        .unwrap_or_else(|| status.to_string());

    if status == StatusCode::NOT_FOUND {
        tracing::debug!("Listing `{entity}` does not exist: {status}");
        FetchError::NotFound
    } else if matches!(status, StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED) {
        tracing::debug!("Insufficient permissions to list `{entity}`: {status}");
        FetchError::PermissionDenied(details)
    } else {
        tracing::debug!("Unexpected status code listing `{entity}`: {status}");
        FetchError::RequestFailed(details)
    }
}
