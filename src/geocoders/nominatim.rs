//! Interface to a Nominatim-compatible search API.

use std::time::Instant;

use async_trait::async_trait;
use futures::stream::StreamExt;
use hyper::{header, Body, Request, StatusCode};
use metrics::{counter, describe_histogram, histogram, Unit};
use serde::Deserialize;
use tracing::{instrument, trace};
use url::Url;

use super::{GeoResult, GeocodeProvider, GeocodeQuery, SharedHttpClient};
use crate::errors::{hyper_error_description_for_metrics, ProviderError};
use crate::Result;

/// The public OpenStreetMap Nominatim search endpoint.
pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";

/// Nominatim's usage policy requires an identifying user agent.
pub const DEFAULT_USER_AGENT: &str = concat!("ged-geocode/", env!("CARGO_PKG_VERSION"));

/// A non-success HTTP status which isn't a server error.
#[derive(Debug, thiserror::Error)]
#[error("unexpected HTTP status {status}: {body}")]
struct UnexpectedStatus {
    status: StatusCode,
    body: String,
}

/// One search result. Nominatim returns coordinates as strings.
#[derive(Clone, Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
    #[serde(default)]
    display_name: String,
}

/// A Nominatim client.
pub struct Nominatim {
    client: SharedHttpClient,
    base_url: Url,
    user_agent: String,
}

impl Nominatim {
    /// Create a new client for the search endpoint at `base_url`.
    pub fn new(client: SharedHttpClient, base_url: &str, user_agent: &str) -> Result<Nominatim> {
        describe_histogram!(
            "gedgeocode.nominatim.request.duration_seconds",
            Unit::Seconds,
            "Time required for Nominatim to answer a search"
        );

        Ok(Nominatim {
            client,
            base_url: Url::parse(base_url)?,
            user_agent: user_agent.to_owned(),
        })
    }
}

/// The full search URL for `query`.
fn search_url(base_url: &Url, query: &GeocodeQuery) -> Url {
    let mut url = base_url.clone();
    {
        let mut pairs = url.query_pairs_mut();
        pairs
            .append_pair("q", &query.query)
            .append_pair("format", "jsonv2");
        if query.exactly_one {
            pairs.append_pair("limit", "1");
        }
        if let Some(country_codes) = &query.country_codes {
            pairs.append_pair("countrycodes", country_codes);
        }
    }
    url
}

#[async_trait]
impl GeocodeProvider for Nominatim {
    fn tag(&self) -> &str {
        "nominatim"
    }

    #[instrument(
        name = "Nominatim::geocode",
        level = "debug",
        skip_all,
        fields(query = %query.query)
    )]
    async fn geocode(&self, query: &GeocodeQuery) -> Result<Option<GeoResult>, ProviderError> {
        let start = Instant::now();

        let url = search_url(&self.base_url, query);
        let req = Request::builder()
            .method("GET")
            .uri(url.as_str())
            .header(header::USER_AGENT, &self.user_agent)
            .header(header::ACCEPT, "application/json")
            .body(Body::empty())
            .map_err(ProviderError::http)?;
        let res = match self.client.request(req).await {
            Ok(res) => res,
            Err(err) => {
                // Errors that occur here are being reported by our local HTTP
                // stack, not the remote server.
                let desc = hyper_error_description_for_metrics(&err);
                counter!("gedgeocode.selected_errors.count", 1, "component" => "nominatim", "cause" => desc);
                if err.is_timeout() {
                    return Err(ProviderError::Timeout);
                }
                return Err(ProviderError::http(err));
            }
        };
        let status = res.status();
        let mut body = res.into_body();
        let mut body_data = vec![];
        while let Some(chunk_result) = body.next().await {
            let chunk = chunk_result.map_err(ProviderError::http)?;
            body_data.extend(&chunk[..]);
        }

        histogram!(
            "gedgeocode.nominatim.request.duration_seconds",
            (Instant::now() - start).as_secs_f64(),
        );

        if status.is_success() {
            parse_response(&body_data)
        } else {
            // This error was reported by the remote server.
            counter!("gedgeocode.selected_errors.count", 1, "component" => "nominatim", "cause" => status.to_string());
            Err(status_error(status, &body_data))
        }
    }
}

/// Classify a non-success response.
fn status_error(status: StatusCode, body: &[u8]) -> ProviderError {
    let body = String::from_utf8_lossy(body).into_owned();
    if status == StatusCode::SERVICE_UNAVAILABLE {
        ProviderError::Unavailable
    } else if status.is_server_error() {
        ProviderError::ServiceError {
            status: status.as_u16(),
            body,
        }
    } else {
        ProviderError::http(UnexpectedStatus { status, body })
    }
}

/// Parse a successful search response. An empty list means no match.
fn parse_response(body: &[u8]) -> Result<Option<GeoResult>, ProviderError> {
    let places: Vec<Place> = serde_json::from_slice(body)?;
    trace!("nominatim returned {} places", places.len());
    let place = match places.into_iter().next() {
        Some(place) => place,
        None => return Ok(None),
    };
    let coordinate = |s: &str| {
        s.trim().parse::<f64>().map_err(|err| {
            <serde_json::Error as serde::de::Error>::custom(format!(
                "bad coordinate {:?}: {}",
                s, err
            ))
        })
    };
    Ok(Some(GeoResult {
        latitude: coordinate(&place.lat)?,
        longitude: coordinate(&place.lon)?,
        address: place.display_name,
    }))
}
