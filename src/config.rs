//! Configuration for geocoding.

use std::{collections::HashMap, fs::File, path::Path, path::PathBuf, time::Duration};

use anyhow::{format_err, Context};
use rand::Rng;
use serde::Deserialize;
use tracing::{info, warn};

use crate::{address_book::MergeStrategy, errors::GeocodeError, Result};

/// The country we assume when a config file doesn't name one.
pub const FALLBACK_DEFAULT_COUNTRY: &str = "England";

/// Geographic settings, normally loaded from a JSON file like:
///
/// ```json
/// {
///     "default_country": "England",
///     "country_substitutions": { "USA": "United States" },
///     "additional_countries_codes_dict_to_add": { "Scotland": "GB" },
///     "fallback_continent_map": { "AQ": "Antarctica" }
/// }
/// ```
///
/// Every field is optional.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GeoConfig {
    /// The country appended to places which don't name one. The literal
    /// string `"none"` disables this.
    #[serde(default)]
    pub default_country: Option<String>,

    /// Final place components which should be replaced by a country name.
    #[serde(default)]
    pub country_substitutions: HashMap<String, String>,

    /// Extra country names, mapped to ISO 3166 alpha-2 codes.
    #[serde(default)]
    pub additional_countries_codes_dict_to_add: HashMap<String, String>,

    /// Country codes mapped to continent names, checked before the built-in
    /// table.
    #[serde(default)]
    pub fallback_continent_map: HashMap<String, String>,
}

impl Default for GeoConfig {
    /// Built-in settings used when no config file is available.
    fn default() -> Self {
        let pairs = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|&(k, v)| (k.to_owned(), v.to_owned()))
                .collect::<HashMap<_, _>>()
        };
        GeoConfig {
            default_country: Some(FALLBACK_DEFAULT_COUNTRY.to_owned()),
            country_substitutions: pairs(&[
                ("USA", "United States"),
                ("U.S.A.", "United States"),
                ("United States of America", "United States"),
                ("UK", "United Kingdom"),
                ("Great Britain", "United Kingdom"),
                ("Holland", "Netherlands"),
                ("Russia", "Russian Federation"),
            ]),
            additional_countries_codes_dict_to_add: pairs(&[
                ("England", "GB"),
                ("Scotland", "GB"),
                ("Wales", "GB"),
                ("Northern Ireland", "GB"),
            ]),
            fallback_continent_map: HashMap::new(),
        }
    }
}

impl GeoConfig {
    /// A config with no default country, substitutions or additions.
    pub fn empty() -> GeoConfig {
        GeoConfig {
            default_country: None,
            country_substitutions: HashMap::new(),
            additional_countries_codes_dict_to_add: HashMap::new(),
            fallback_continent_map: HashMap::new(),
        }
    }

    /// Load a `GeoConfig` from a JSON file.
    pub fn from_path(path: &Path) -> Result<GeoConfig> {
        let f = File::open(path)
            .with_context(|| format_err!("cannot open {}", path.display()))?;
        serde_json::from_reader(f)
            .with_context(|| format_err!("error parsing {}", path.display()))
    }

    /// Load a `GeoConfig` from `path`, falling back to the built-in settings
    /// if there's no path or the file can't be loaded.
    pub fn load_or_default(path: Option<&Path>) -> GeoConfig {
        let path = match path {
            Some(path) => path,
            None => return GeoConfig::default(),
        };
        match GeoConfig::from_path(path) {
            Ok(geo) => {
                info!("loaded geographic configuration from {}", path.display());
                geo
            }
            Err(source) => {
                let err = GeocodeError::ConfigError {
                    path: path.to_owned(),
                    source,
                };
                warn!("{:#}; using built-in defaults", anyhow::Error::new(err));
                GeoConfig::default()
            }
        }
    }
}

/// How hard to try before giving up on a single query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per query, including the first.
    pub max_retries: u32,
    /// Delay after the first failure. Doubles with every further failure.
    pub backoff_base: Duration,
    /// Upper bound on random delay added to each backoff.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            max_jitter: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// How long to wait after failed attempt number `attempt` (counting from
    /// 1), not including jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base * 2u32.pow(exponent)
    }

    /// `backoff(attempt)`, plus a random jitter.
    pub fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..=self.max_jitter)
        };
        self.backoff(attempt) + jitter
    }
}

/// Everything the geocoding core needs to know.
#[derive(Clone, Debug)]
pub struct GeocodeConfig {
    /// CSV file of cached results. `None` means "don't persist".
    pub cache_file: Option<PathBuf>,

    /// CSV file of alternate names for places.
    pub alt_addr_file: Option<PathBuf>,

    /// Ignore cached results (but still record new ones).
    pub always_geocode: bool,

    /// Never contact the geocoding provider.
    pub cache_only: bool,

    /// Overrides `geo.default_country` when set.
    pub default_country: Option<String>,

    /// Country tables and substitutions.
    pub geo: GeoConfig,

    /// Minimum time between two requests to the provider.
    pub sleep_interval: Duration,

    /// Maximum time to wait for a single request.
    pub request_timeout: Duration,

    pub retry: RetryPolicy,

    /// How many less-precise versions of a place to try, by dropping the
    /// leading component.
    pub max_address_depth: u32,

    pub merge_strategy: MergeStrategy,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        GeocodeConfig {
            cache_file: None,
            alt_addr_file: None,
            always_geocode: false,
            cache_only: false,
            default_country: None,
            geo: GeoConfig::default(),
            sleep_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            max_address_depth: 3,
            merge_strategy: MergeStrategy::default(),
        }
    }
}

impl GeocodeConfig {
    /// The default country to append to places, or `None` if disabled.
    pub fn effective_default_country(&self) -> Option<&str> {
        let country = self
            .default_country
            .as_deref()
            .or(self.geo.default_country.as_deref())
            .unwrap_or(FALLBACK_DEFAULT_COUNTRY)
            .trim();
        if country.is_empty() || country.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(country)
        }
    }
}
