//! Client for the debuginfod protocol.
//!
//! Only `GET /buildid/{id}/debuginfo` is spoken. See
//! <https://sourceware.org/elfutils/Debuginfod.html> for the full protocol.

use std::error::Error;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Url;

use crate::caching::{CacheEntry, CacheError};
use crate::config::DebuginfodConfig;
use crate::types::sanitize_build_id;
use crate::utils::futures::{RetryError, RetryPolicy, measure, retry};
use crate::utils::http::{create_client, truncate_body};
use crate::utils::singleflight::SingleFlight;

pub mod compression;
pub mod status;

use self::status::StatusClass;

/// The maximum number of bytes of an error response that are kept.
const MAX_ERROR_BODY: usize = 512;

impl CacheError {
    fn download_error(mut error: &dyn Error) -> Self {
        while let Some(src) = error.source() {
            error = src;
        }

        let mut error_string = error.to_string();

        // Special-case a few error strings
        if error_string.contains("certificate verify failed") {
            error_string = "certificate verify failed".to_string();
        }

        if error_string.contains("SSL routines") {
            error_string = "SSL error".to_string();
        }

        Self::DownloadError(error_string)
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(error: reqwest::Error) -> Self {
        Self::download_error(&error)
    }
}

/// Everything a single fetch needs. Cloned into the task that performs it.
#[derive(Clone)]
struct Fetcher {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
    not_found: moka::sync::Cache<String, ()>,
}

impl Fetcher {
    async fn fetch(self, build_id: String) -> CacheEntry<Bytes> {
        let url = Url::parse(&format!("{}/buildid/{build_id}/debuginfo", self.base_url))
            .map_err(CacheError::from_std_error)?;

        let result = retry(&self.retry, CacheError::is_retryable, |attempt| {
            self.fetch_once(&build_id, &url, attempt)
        })
        .await;

        match result {
            Ok(bytes) => Ok(bytes),
            Err(RetryError::Permanent(err)) => Err(err),
            Err(RetryError::Exhausted { attempts, last }) => Err(CacheError::RetriesExhausted {
                attempts,
                source: Box::new(last),
            }),
        }
    }

    async fn fetch_once(&self, build_id: &str, url: &Url, attempt: usize) -> CacheEntry<Bytes> {
        tracing::trace!(%url, attempt, "fetching debuginfo");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| self.request_error(err))?;

        let status = response.status().as_u16();
        match StatusClass::from_code(status) {
            StatusClass::Success => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|err| self.request_error(err))?;
                metric!(distribution("debuginfod.file.size") = body.len() as u64);
                Ok(body)
            }
            StatusClass::NotFound => {
                self.not_found.insert(build_id.to_owned(), ());
                Err(CacheError::NotFound)
            }
            class => {
                let body = response.text().await.unwrap_or_default();
                tracing::debug!(status, class = class.label(), "unexpected debuginfod response");
                Err(CacheError::HttpStatus {
                    status,
                    body: truncate_body(&body, MAX_ERROR_BODY).to_owned(),
                })
            }
        }
    }

    fn request_error(&self, err: reqwest::Error) -> CacheError {
        if err.is_timeout() {
            CacheError::Timeout(self.timeout)
        } else {
            err.into()
        }
    }
}

/// Fetches raw debug files from a debuginfod server.
///
/// Build IDs the server reported as missing are remembered for `not_found_ttl`. Concurrent
/// fetches of the same build ID share a single request. Downloaded files are kept in memory up
/// to `debuginfo_cache_size` bytes.
pub struct DebuginfodClient {
    fetcher: Fetcher,
    flights: SingleFlight<Bytes>,
    debuginfo: moka::sync::Cache<String, Bytes>,
}

impl std::fmt::Debug for DebuginfodClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebuginfodClient")
            .field("base_url", &self.fetcher.base_url)
            .field("retry", &self.fetcher.retry)
            .field("flights", &self.flights)
            .field("cached_bytes", &self.debuginfo.weighted_size())
            .finish()
    }
}

impl DebuginfodClient {
    pub fn new(base_url: &Url, config: &DebuginfodConfig) -> reqwest::Result<Self> {
        let not_found = moka::sync::Cache::builder()
            .max_capacity(config.not_found_capacity)
            .time_to_live(config.not_found_ttl)
            .build();

        let fetcher = Fetcher {
            client: create_client(config)?,
            base_url: base_url.as_str().trim_end_matches('/').to_owned(),
            timeout: config.timeout,
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
                min_backoff: config.min_backoff,
                max_backoff: config.max_backoff,
            },
            not_found,
        };

        let debuginfo = moka::sync::Cache::builder()
            .max_capacity(config.debuginfo_cache_size)
            .weigher(|_, data: &Bytes| data.len().try_into().unwrap_or(u32::MAX))
            .build();

        Ok(Self {
            fetcher,
            flights: SingleFlight::new(),
            debuginfo,
        })
    }

    /// Whether the server recently reported `build_id` as missing.
    pub fn is_known_missing(&self, build_id: &str) -> bool {
        self.fetcher.not_found.contains_key(build_id)
    }

    /// Downloads the debug file for `build_id`.
    ///
    /// The returned bytes are exactly what the server sent, possibly still compressed.
    pub async fn fetch_debuginfo(&self, build_id: &str) -> CacheEntry<Bytes> {
        let result = self.fetch_debuginfo_inner(build_id).await;

        match &result {
            Ok(_) | Err(CacheError::NotFound) => {}
            Err(err) => tracing::warn!(
                build_id,
                error = err as &dyn Error,
                "failed to fetch debuginfo"
            ),
        }

        result
    }

    async fn fetch_debuginfo_inner(&self, build_id: &str) -> CacheEntry<Bytes> {
        let build_id = match sanitize_build_id(build_id) {
            Ok("") => return Err(CacheError::InvalidBuildId(String::new())),
            Ok(id) => id,
            Err(err) => {
                tracing::error!(build_id, "refusing to fetch invalid build ID");
                return Err(err);
            }
        };

        if self.is_known_missing(build_id) {
            return Err(CacheError::NotFound);
        }

        if let Some(data) = self.debuginfo.get(build_id) {
            metric!(counter("debuginfod.memory_cache.hits") += 1);
            return Ok(data);
        }

        let fetch = self.fetcher.clone().fetch(build_id.to_owned());
        let result = measure(
            "debuginfod.request.duration",
            outcome,
            self.flights.run(build_id, fetch),
        )
        .await;

        if let Ok(data) = &result {
            self.debuginfo.insert(build_id.to_owned(), data.clone());
        }
        result
    }
}

fn outcome(result: &CacheEntry<Bytes>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(err) => err.outcome_label(),
    }
}
