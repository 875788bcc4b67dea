use std::time::Duration;

use thiserror::Error;

use crate::download::status::StatusClass;

/// An error that happens when fetching, converting or storing a symbol table.
///
/// The error is `Clone` so that every caller waiting on a shared fetch receives the same result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The build ID contains characters outside of `[a-zA-Z0-9_-]`.
    ///
    /// Such an ID never leaves the process.
    #[error("invalid build ID: {0:?}")]
    InvalidBuildId(String),
    /// The object was not found at the remote source.
    ///
    /// This is remembered for a while, so that repeated lookups skip the network.
    #[error("not found")]
    NotFound,
    /// The remote source answered with an unexpected status code.
    ///
    /// The attached body is truncated.
    #[error("unexpected status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    /// The object could not be fetched from the remote source due to a timeout.
    #[error("download timed out after {0:?}")]
    Timeout(Duration),
    /// The object could not be fetched from the remote source due to another problem,
    /// like connection loss or DNS resolution.
    #[error("download failed: {0}")]
    DownloadError(String),
    /// The object was fetched successfully, but is invalid in some way.
    ///
    /// For example, this could result from a broken compression stream, a file that is not
    /// an ELF object, or an error during symcache conversion.
    #[error("malformed: {0}")]
    Malformed(String),
    /// Every attempt failed with an error that is worth retrying.
    ///
    /// `source` is the error of the last attempt.
    #[error("giving up after {attempts} attempts")]
    RetriesExhausted {
        attempts: usize,
        source: Box<CacheError>,
    },
    /// The shared computation this caller was waiting on went away.
    #[error("canceled")]
    Canceled,
    /// An unexpected error in the symbolizer itself.
    #[error("internal error")]
    InternalError,
}

impl CacheError {
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }

    /// Whether repeating the same request could plausibly give a different result.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::DownloadError(_) => true,
            Self::HttpStatus { status, .. } => StatusClass::from_code(*status).retry(),
            _ => false,
        }
    }

    /// Whether this error says the object does not exist, possibly behind exhausted retries.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound => true,
            Self::RetriesExhausted { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// The label used to tag metrics with the outcome of a fetch.
    pub fn outcome_label(&self) -> &'static str {
        match self {
            Self::InvalidBuildId(_) => "error_invalid_id",
            Self::NotFound => "error_not_found",
            Self::HttpStatus { status, .. } => StatusClass::from_code(*status).outcome_label(),
            Self::Timeout(_) => "error_timeout",
            Self::Canceled => "error_canceled",
            Self::RetriesExhausted { source, .. } => source.outcome_label(),
            Self::DownloadError(_) | Self::Malformed(_) | Self::InternalError => "error_other",
        }
    }
}

/// An entry in a cache, containing either `Ok(T)` or an error denoting the reason why an
/// object could not be fetched or is otherwise unusable.
pub type CacheEntry<T = ()> = Result<T, CacheError>;
