use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::caching::FetchError;

/// The JSON envelope wrapped around every shop API response.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<D> {
    pub success: bool,
    pub data: Option<D>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl<D> ApiEnvelope<D> {
    /// Unwraps the payload of a successful response.
    pub fn into_data(self) -> Result<D, FetchError> {
        if !self.success {
            let details = self
                .error
                .or(self.message)
                .unwrap_or_else(|| "request was not successful".to_owned());
            return Err(FetchError::Rejected(details));
        }

        self.data
            .ok_or_else(|| FetchError::Malformed("successful response without `data`".into()))
    }
}

/// One page of a listing, normalized from the API's pagination fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub has_more: bool,
    pub total_pages: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPage {
    total: Option<u64>,
    page: Option<u64>,
    limit: Option<u64>,
    has_more: Option<bool>,
    total_pages: Option<u64>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl<T: DeserializeOwned> Page<T> {
    /// Normalizes the `data` of a listing response.
    ///
    /// The items are read from the `collection` field, falling back to `items`, or `data` may
    /// be a bare array. Pagination fields the API left out are derived from the ones present.
    pub fn from_data(collection: &str, data: Value) -> Result<Self, FetchError> {
        let raw = match data {
            Value::Array(items) => RawPage {
                total: None,
                page: None,
                limit: None,
                has_more: None,
                total_pages: None,
                fields: Map::from_iter([(collection.to_owned(), Value::Array(items))]),
            },
            data => serde_json::from_value(data)?,
        };

        let RawPage {
            total,
            page,
            limit,
            has_more,
            total_pages,
            mut fields,
        } = raw;

        let items = fields
            .remove(collection)
            .or_else(|| fields.remove("items"))
            .ok_or_else(|| FetchError::Malformed(format!("missing `{collection}` in data")))?;
        let items: Vec<T> = serde_json::from_value(items)?;

        let count = items.len() as u64;
        let total = total.unwrap_or(count);
        let page = page.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(count);
        let total_pages = total_pages.unwrap_or(match limit {
            0 => u64::from(total > 0),
            limit => total.div_ceil(limit),
        });
        let has_more = has_more.unwrap_or(page < total_pages);

        Ok(Self {
            items,
            total,
            page,
            limit,
            has_more,
            total_pages,
        })
    }
}
