use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::caching::QueryOptions;

/// The kinds of listings the shop API serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    Orders,
    Products,
    Customers,
    Outlets,
    Categories,
}

impl Entity {
    pub const ALL: [Entity; 5] = [
        Self::Orders,
        Self::Products,
        Self::Customers,
        Self::Outlets,
        Self::Categories,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Orders => "orders",
            Self::Products => "products",
            Self::Customers => "customers",
            Self::Outlets => "outlets",
            Self::Categories => "categories",
        }
    }

    /// The listing endpoint, relative to the API base URL.
    pub fn path(&self) -> String {
        format!("api/{}", self.name())
    }

    /// The field of the response `data` holding the listed items.
    pub fn collection_field(&self) -> &'static str {
        self.name()
    }

    /// Query options tuned to how often this kind of data changes.
    ///
    /// Orders, products and customers change all the time, outlets and categories are close to
    /// static.
    pub fn default_options(&self) -> QueryOptions {
        let (stale_time, cache_time) = match self {
            Self::Orders | Self::Products | Self::Customers => {
                (Duration::from_secs(30), Duration::from_secs(5 * 60))
            }
            Self::Outlets | Self::Categories => {
                (Duration::from_secs(5 * 60), Duration::from_secs(10 * 60))
            }
        };

        QueryOptions {
            stale_time,
            cache_time,
            ..Default::default()
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
#[error("unknown entity `{0}`, expected one of orders, products, customers, outlets, categories")]
pub struct UnknownEntity(String);

impl FromStr for Entity {
    type Err = UnknownEntity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|entity| entity.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownEntity(s.to_owned()))
    }
}
