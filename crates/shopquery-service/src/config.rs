use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::caching::{QueryOptions, StoreConfig};
use crate::rest::Entity;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "shopquery".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Where and how to reach the shop API.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL the entity paths are resolved against.
    pub base_url: Url,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    /// Timeout of a single request.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("http://127.0.0.1:3000/")
                .unwrap_or_else(|_| unreachable!("static URL is valid")),
            token: env::var("SHOP_API_TOKEN").ok(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Overrides for the freshness timings of queries.
///
/// Unset values fall back to the next less specific layer.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueryTimings {
    #[serde(with = "humantime_serde")]
    pub stale_time: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub cache_time: Option<Duration>,
}

impl QueryTimings {
    fn apply(&self, options: &mut QueryOptions) {
        if let Some(stale_time) = self.stale_time {
            options.stale_time = stale_time;
        }
        if let Some(cache_time) = self.cache_time {
            options.cache_time = cache_time;
        }
    }
}

/// Tuning of the query stores.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct QueriesConfig {
    /// Maximum number of cached responses per entity.
    pub in_memory_capacity: Option<u64>,
    /// Whether queries refresh stale data when the window regains focus.
    pub refetch_on_window_focus: bool,
    /// Timings applied to all entities.
    pub defaults: QueryTimings,
    /// Timings of individual entities, taking precedence over `defaults`.
    pub entities: BTreeMap<Entity, QueryTimings>,
}

impl QueriesConfig {
    pub fn store_config(&self) -> StoreConfig {
        let mut config = StoreConfig::default();
        if let Some(capacity) = self.in_memory_capacity {
            config.in_memory_capacity = capacity;
        }
        config
    }

    /// The effective options for queries of `entity`.
    pub fn options(&self, entity: Entity) -> QueryOptions {
        let mut options = entity.default_options();
        options.refetch_on_window_focus = self.refetch_on_window_focus;

        self.defaults.apply(&mut options);
        if let Some(timings) = self.entities.get(&entity) {
            timings.apply(&mut options);
        }
        options
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The shop API.
    pub api: ApiConfig,

    /// Freshness and capacity of cached listings.
    pub queries: QueriesConfig,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl<'de> de::Visitor<'de> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
