use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

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
    /// The log level for the symbolizer.
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
            prefix: "symbolizer".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Settings of the profile symbolizer itself.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SymbolizerConfig {
    /// Base URL of the debuginfod server.
    pub debuginfod_url: Url,

    /// Maximum number of mappings that are symbolized concurrently for one profile.
    ///
    /// This also bounds the number of concurrent requests to the debuginfod server
    /// issued by a single profile. Must be positive.
    pub max_debuginfod_concurrency: usize,
}

impl SymbolizerConfig {
    /// Checks the values that cannot be expressed by the types alone.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_debuginfod_concurrency < 1 {
            return Err(ConfigError::InvalidConcurrency);
        }
        Ok(())
    }
}

impl Default for SymbolizerConfig {
    fn default() -> Self {
        Self {
            debuginfod_url: default_debuginfod_url(),
            max_debuginfod_concurrency: 10,
        }
    }
}

fn default_debuginfod_url() -> Url {
    Url::parse("https://debuginfod.elfutils.org").expect("static URL is valid")
}

/// Tuning of the debuginfod HTTP client.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DebuginfodConfig {
    /// The `User-Agent` sent with each request. An empty string disables the header.
    pub user_agent: String,

    /// Total number of attempts for one fetch, including the first one.
    pub max_attempts: usize,

    /// Backoff before the first retry.
    #[serde(with = "humantime_serde")]
    pub min_backoff: Duration,

    /// Upper bound for the exponential backoff.
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,

    /// The timeout for establishing a connection.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Global timeout for one request, including the body.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Number of redirects that are followed before giving up.
    pub max_redirects: usize,

    /// How long a build ID that debuginfod reported as missing is remembered.
    #[serde(with = "humantime_serde")]
    pub not_found_ttl: Duration,

    /// Maximum number of remembered missing build IDs.
    pub not_found_capacity: u64,

    /// Maximum total size in bytes of downloaded debug files kept in memory.
    pub debuginfo_cache_size: u64,
}

impl Default for DebuginfodConfig {
    fn default() -> Self {
        Self {
            user_agent: "Pyroscope-Symbolizer/1.0".into(),
            max_attempts: 3,
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(120),
            max_redirects: 3,
            not_found_ttl: Duration::from_secs(3600),
            not_found_capacity: 100_000,
            debuginfo_cache_size: 512 * 1024 * 1024,
        }
    }
}

/// The backend of an object store.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ObjectStoreConfig {
    /// Objects are kept in memory for the lifetime of the process.
    Memory,
    /// Objects are files below the given directory.
    Filesystem { path: PathBuf },
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self::Memory
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid max_debuginfod_concurrency value, must be positive")]
    InvalidConcurrency,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configures the logging system.
    pub logging: Logging,

    /// Configures the metrics system.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// Settings of the profile symbolizer.
    pub symbolizer: SymbolizerConfig,

    /// Settings of the debuginfod client.
    pub debuginfod: DebuginfodConfig,

    /// Where converted symbol tables are persisted.
    pub object_store: ObjectStoreConfig,

    /// An optional store of raw debug files, consulted before debuginfod.
    ///
    /// Files are expected at `{build_id}/debuginfo`.
    pub debuginfo_store: Option<ObjectStoreConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            symbolizer: SymbolizerConfig::default(),
            debuginfod: DebuginfodConfig::default(),
            object_store: ObjectStoreConfig::default(),
            debuginfo_store: None,
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            )?,
            None => Config::default(),
        };
        config.validate()?;
        Ok(config)
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

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.symbolizer.validate()
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
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
