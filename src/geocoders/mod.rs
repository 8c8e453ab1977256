//! Geocoding backends.

use std::sync::Arc;

use async_trait::async_trait;
use hyper::{client::HttpConnector, Client};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};

use crate::errors::ProviderError;

pub mod nominatim;
pub mod rate_gate;

pub use self::rate_gate::RateGate;

/// A `hyper` client shared between multiple requests.
pub type SharedHttpClient = Arc<Client<HttpsConnector<HttpConnector>>>;

pub fn shared_http_client() -> SharedHttpClient {
    // Create a shared `hyper::Client` with a connection pool, so that we can
    // use keep-alive. We only ever talk to one host, one request at a time.
    Arc::new(
        Client::builder().pool_max_idle_per_host(1).build(
            HttpsConnectorBuilder::new()
                .with_native_roots()
                .https_or_http()
                .enable_http1()
                .enable_http2()
                .build(),
        ),
    )
}

/// A single geocoding request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeocodeQuery {
    /// The free-form place to search for.
    pub query: String,
    /// Restrict results to these ISO 3166 alpha-2 codes (comma-separated).
    pub country_codes: Option<String>,
    /// Only return the best match.
    pub exactly_one: bool,
}

/// The best match for a [`GeocodeQuery`].
#[derive(Clone, Debug, PartialEq)]
pub struct GeoResult {
    pub latitude: f64,
    pub longitude: f64,
    /// The provider's canonical name for the place.
    pub address: String,
}

/// Abstract geocoding interface.
#[async_trait]
pub trait GeocodeProvider: Send + Sync + 'static {
    /// A short name for this provider, used in logs and metrics.
    fn tag(&self) -> &str;

    /// Geocode a single place.
    ///
    /// Returns `Ok(None)` if the provider answered but found nothing. Any
    /// error may be retried.
    async fn geocode(&self, query: &GeocodeQuery) -> Result<Option<GeoResult>, ProviderError>;
}

/// A provider for runs which must never touch the network. Every request
/// fails as unavailable.
pub struct Offline;

#[async_trait]
impl GeocodeProvider for Offline {
    fn tag(&self) -> &str {
        "offline"
    }

    async fn geocode(&self, _query: &GeocodeQuery) -> Result<Option<GeoResult>, ProviderError> {
        Err(ProviderError::Unavailable)
    }
}
