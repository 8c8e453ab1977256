//! Error types and error-handling utilities.

use std::path::PathBuf;

use anyhow::Error;
use thiserror::Error;

/// A failure reported by a [`crate::geocoders::GeocodeProvider`].
///
/// Every variant is treated as transient by the retry loop. A clean "no
/// match" is not an error at all, and is reported as `Ok(None)` instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// The request did not complete within the configured timeout.
    #[error("geocoding request timed out")]
    Timeout,

    /// The remote server reported an internal error (5xx).
    #[error("geocoding service error {status} ({body})")]
    ServiceError {
        /// The HTTP status code.
        status: u16,
        /// The HTTP body returned by the server.
        body: String,
    },

    /// The remote service is temporarily unavailable (503).
    #[error("geocoding service unavailable")]
    Unavailable,

    /// Our local HTTP stack failed, or the server returned a non-success
    /// status that isn't a server error.
    #[error("HTTP error while geocoding")]
    Http {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// The server answered, but we couldn't understand the answer.
    #[error("could not parse geocoding response")]
    InvalidResponse {
        #[from]
        source: serde_json::Error,
    },
}

impl ProviderError {
    /// Wrap an arbitrary HTTP-layer error.
    pub fn http<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ProviderError::Http {
            source: Box::new(source),
        }
    }

    /// A short, low-cardinality label for metrics.
    pub fn metrics_label(&self) -> &'static str {
        match self {
            ProviderError::Timeout => "timeout",
            ProviderError::ServiceError { .. } => "service_error",
            ProviderError::Unavailable => "unavailable",
            ProviderError::Http { .. } => "http",
            ProviderError::InvalidResponse { .. } => "invalid_response",
        }
    }
}

/// Why we could not produce a [`crate::location::Location`] for a place.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GeocodeError {
    /// The provider answered cleanly, but had no match at any precision.
    #[error("no geocoding result for {place:?}")]
    NotFound { place: String },

    /// Every attempt failed with a transient error.
    #[error("gave up geocoding {place:?} after {attempts} attempts")]
    TransientFailure {
        place: String,
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    /// A previous session already failed to geocode this place.
    #[error("{place:?} is marked as having no result in the cache")]
    NegativeCached { place: String },

    /// We are not allowed to make network requests, and the cache missed.
    #[error("{place:?} is not cached and network lookups are disabled")]
    CacheOnly { place: String },

    /// The cache file exists but could not be parsed.
    #[error("could not parse cache file {}", path.display())]
    CacheCorrupt {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// The cache file could not be opened or written.
    #[error("could not access cache file {}", path.display())]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file could not be loaded.
    #[error("could not load configuration from {}", path.display())]
    ConfigError {
        path: PathBuf,
        #[source]
        source: Error,
    },
}

impl GeocodeError {
    /// Build a cache error from a `csv::Error`, separating plain I/O
    /// failures from malformed data.
    pub(crate) fn from_csv(path: PathBuf, err: csv::Error) -> Self {
        if !err.is_io_error() {
            return GeocodeError::CacheCorrupt { path, source: err };
        }
        let source = match err.into_kind() {
            csv::ErrorKind::Io(source) => source,
            other => std::io::Error::new(std::io::ErrorKind::Other, format!("{:?}", other)),
        };
        GeocodeError::CacheIo { path, source }
    }
}

/// Summarize a `hyper::Error` as a short label for metrics.
pub(crate) fn hyper_error_description_for_metrics(err: &hyper::Error) -> &'static str {
    if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else if err.is_incomplete_message() {
        "incomplete_message"
    } else if err.is_closed() || err.is_canceled() {
        "closed"
    } else {
        "other"
    }
}

/// Display an error, plus all the underlying "causes" (ie, wrapped errors), plus a
/// backtrace.
pub fn display_causes_and_backtrace(err: &Error) {
    eprintln!("Error: {}", err);
    for cause in err.chain().skip(1) {
        eprintln!("  caused by: {}", cause);
    }
    eprintln!("{}", err.backtrace());
}

#[test]
fn csv_io_errors_are_not_reported_as_corruption() {
    let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
    let err = GeocodeError::from_csv(PathBuf::from("cache.csv"), csv::Error::from(io_err));
    assert!(matches!(err, GeocodeError::CacheIo { .. }));
}
