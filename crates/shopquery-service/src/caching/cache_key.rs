use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::FetchError;

/// Identifies one filter combination within a [`QueryStore`](super::QueryStore).
///
/// The key is `<namespace>:<canonical json>`, where the canonical JSON form of the filters
/// has all object keys sorted and all `null` members removed. Filters that only differ in
/// field order, or in an explicit `None` versus a missing field, share the same key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    key: Arc<str>,
}

impl CacheKey {
    /// Derives the key for `filters` within the given `namespace`.
    pub fn new<F>(namespace: &str, filters: &F) -> Result<Self, FetchError>
    where
        F: Serialize + ?Sized,
    {
        let value = serde_json::to_value(filters)
            .map_err(|err| FetchError::InvalidFilters(err.to_string()))?;
        let canonical = serde_json::to_string(&canonicalize(value))
            .map_err(|err| FetchError::InvalidFilters(err.to_string()))?;

        Ok(Self {
            key: format!("{namespace}:{canonical}").into(),
        })
    }

    /// Returns the full key as a string.
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Returns the namespace part of the key.
    pub fn namespace(&self) -> &str {
        self.key
            .split_once(':')
            .map_or(&*self.key, |(namespace, _)| namespace)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CacheKey").field(&self.as_str()).finish()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rewrites `value` into its canonical form.
///
/// Objects are rebuilt with sorted keys and without `null` members. Array order is kept, since
/// it is meaningful for filters like sort orders.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
