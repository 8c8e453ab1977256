//! Turning place strings into locations.

use metrics::{counter, describe_counter};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    address_book::{FuzzyAddressBook, DEFAULT_FUZZY_THRESHOLD},
    config::GeocodeConfig,
    countries::{CountryTable, UNKNOWN_COUNTRY_CODE},
    errors::{GeocodeError, ProviderError},
    geo_cache::{CacheEntry, GeoCache},
    geocoders::{GeoResult, GeocodeProvider, GeocodeQuery, RateGate},
    location::{is_blank, LatLon, Location},
};

/// A place string after country normalization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaceCountry {
    /// The lowercased place, with any country substitution applied and the
    /// default country appended if needed.
    pub place: String,
    /// ISO 3166 alpha-2 code, or `"none"`.
    pub country_code: String,
    pub country_name: String,
    /// Was the country named in the place itself?
    pub found: bool,
}

/// Resolves place strings using a cache and a rate-limited provider.
pub struct Geocode {
    config: GeocodeConfig,
    countries: CountryTable,
    geo_cache: GeoCache,
    provider: Box<dyn GeocodeProvider>,
    rate_gate: RateGate,
}

impl Geocode {
    /// Create a geocoder, loading the cache named by `config`.
    pub fn new(config: GeocodeConfig, provider: Box<dyn GeocodeProvider>) -> Geocode {
        describe_counter!("gedgeocode.cache_hits.total", "Places found in cache");
        describe_counter!("gedgeocode.cache_misses.total", "Places not found in cache");
        describe_counter!(
            "gedgeocode.provider_requests.total",
            "Requests sent to the geocoding provider"
        );
        describe_counter!(
            "gedgeocode.provider_retries.total",
            "Provider requests retried after a failure"
        );
        describe_counter!(
            "gedgeocode.negative_cache_writes.total",
            "Places recorded as having no result"
        );

        let geo_cache = GeoCache::new(
            config.cache_file.clone(),
            config.always_geocode,
            config.alt_addr_file.as_deref(),
        );
        Geocode {
            countries: CountryTable::new(&config.geo),
            rate_gate: RateGate::new(config.sleep_interval),
            geo_cache,
            provider,
            config,
        }
    }

    pub fn config(&self) -> &GeocodeConfig {
        &self.config
    }

    pub fn countries(&self) -> &CountryTable {
        &self.countries
    }

    pub fn geo_cache(&self) -> &GeoCache {
        &self.geo_cache
    }

    pub fn geo_cache_mut(&mut self) -> &mut GeoCache {
        &mut self.geo_cache
    }

    /// Write the cache back to disk.
    pub fn save_geo_cache(&self) -> Result<(), GeocodeError> {
        self.geo_cache.save_geo_cache()
    }

    /// Map a country code to a continent name, or `"Unknown"`.
    pub fn country_code_to_continent(&self, country_code: &str) -> String {
        self.countries.country_code_to_continent(country_code)
    }

    /// Work out which country `place` is in.
    ///
    /// The last comma-separated component is checked against our
    /// substitutions, then against known country names. If neither matches,
    /// the default country (if any) is appended, but `found` stays false.
    pub fn get_place_and_countrycode(&self, place: &str) -> PlaceCountry {
        let place_lower = place.trim().trim_end_matches(',').trim_end().to_lowercase();
        let (head, last) = match place_lower.rsplit_once(',') {
            Some((head, last)) => (Some(head.trim_end()), last.trim()),
            None => (None, place_lower.trim()),
        };

        let mut result = PlaceCountry {
            place: place_lower.clone(),
            country_code: String::new(),
            country_name: String::new(),
            found: false,
        };
        if let Some(new_country) = self.countries.substitution(last) {
            info!("substituting country {:?} with {:?} in {:?}", last, new_country, place);
            result.place = match head {
                Some(head) => format!("{}, {}", head, new_country),
                None => new_country.to_owned(),
            };
            result.country_name = new_country.to_owned();
            result.found = true;
        } else if let Some(name) = self.countries.canonical_name(last) {
            result.country_name = name.to_owned();
            result.found = true;
        }

        if !result.found {
            if let Some(default_country) = self.config.effective_default_country() {
                debug!("adding default country {:?} to {:?}", default_country, place);
                result.place = format!("{}, {}", place_lower, default_country);
                result.country_name = default_country.to_owned();
            }
        }

        let code_name = self
            .countries
            .substitution(&result.country_name)
            .unwrap_or(result.country_name.as_str());
        result.country_code = self.countries.country_code(code_name);
        result
    }

    /// Split `address_book` into places which are cached and places which
    /// will need a network request.
    ///
    /// Each shared location appears once, under one of its place strings. A
    /// location counts as cached if any of its place strings is, and is then
    /// represented by the first cached one.
    pub fn separate_cached_locations(
        &self,
        address_book: &FuzzyAddressBook,
    ) -> (FuzzyAddressBook, FuzzyAddressBook) {
        let new_book = || {
            FuzzyAddressBook::with_options(DEFAULT_FUZZY_THRESHOLD, address_book.merge_strategy())
        };
        let mut cached = new_book();
        let mut non_cached = new_book();
        for (location, places) in address_book.address_groups() {
            let cached_place = if self.config.always_geocode {
                None
            } else {
                places
                    .iter()
                    .find(|place| self.geo_cache.contains(place))
                    .copied()
            };
            match cached_place {
                Some(place) => cached.fuzzy_add_address(place, Some(location.clone())),
                None => non_cached.fuzzy_add_address(places[0], Some(location.clone())),
            }
        }
        debug!(
            "{} cached places, {} to geocode",
            cached.len(),
            non_cached.len()
        );
        (cached, non_cached)
    }

    /// Resolve `place`, logging (rather than returning) any failure.
    pub async fn lookup_location(&mut self, place: &str) -> Option<Location> {
        match self.try_lookup_location(place).await {
            Ok(location) => Some(location),
            Err(
                err @ (GeocodeError::NotFound { .. }
                | GeocodeError::NegativeCached { .. }
                | GeocodeError::CacheOnly { .. }),
            ) => {
                debug!("{}", err);
                None
            }
            Err(err) => {
                warn!("{:#}", anyhow::Error::new(err));
                None
            }
        }
    }

    /// Resolve `place` using the cache, falling back to the provider.
    ///
    /// Successes and failures from the provider are both recorded in the
    /// cache.
    pub async fn try_lookup_location(&mut self, place: &str) -> Result<Location, GeocodeError> {
        if place.trim().is_empty() {
            return Err(GeocodeError::NotFound {
                place: place.to_owned(),
            });
        }

        let (use_place, cache_entry) = if self.config.always_geocode {
            (place.to_owned(), None)
        } else {
            self.geo_cache.lookup_geo_cache_entry(place)
        };
        if cache_entry.as_ref().map_or(false, |entry| entry.no_result) {
            counter!("gedgeocode.cache_hits.total", 1, "geocoding_result" => "no_result");
            return Err(GeocodeError::NegativeCached {
                place: place.to_owned(),
            });
        }

        let place_country = self.get_place_and_countrycode(&use_place);

        let mut location = match cache_entry.filter(|entry| entry.has_coordinates()) {
            Some(entry) => {
                counter!("gedgeocode.cache_hits.total", 1, "geocoding_result" => "found");
                self.location_from_cache(&entry, &place_country)
            }
            None => {
                counter!("gedgeocode.cache_misses.total", 1);
                match self.geocode_place(&place_country.place, &place_country).await {
                    Ok(mut location) => {
                        location.address = place.to_owned();
                        self.geo_cache.add_geo_cache_entry(place, &location);
                        info!("geocoded {:?} to {}", place, location.latlon);
                        location
                    }
                    Err(err @ GeocodeError::CacheOnly { .. }) => return Err(err),
                    Err(err) => {
                        self.geo_cache.add_no_result_entry(place);
                        counter!("gedgeocode.negative_cache_writes.total", 1);
                        return Err(err);
                    }
                }
            }
        };

        if is_blank(&location.continent) {
            location.continent = self.country_code_to_continent(&location.country_code);
        }
        Ok(location)
    }

    /// Build a location from a cache hit, filling in the country if the
    /// cache didn't know it but we do now.
    fn location_from_cache(&mut self, entry: &CacheEntry, place_country: &PlaceCountry) -> Location {
        let mut location = Location::from_cache_entry(entry);
        if !entry.found_country || is_blank(&entry.country_name) {
            if place_country.found {
                info!("adding country {:?} to cached {:?}", place_country.country_name, entry.address);
                location.found_country = true;
                location.country_code = place_country.country_code.clone();
                location.country_name = place_country.country_name.clone();
                location.continent = self.countries.continent_for(&place_country.country_code);
                self.geo_cache.add_geo_cache_entry(&entry.address, &location);
            } else {
                debug!("no country found for cached {:?}", entry.address);
            }
        }
        location
    }

    /// Geocode `place` with the provider. If that fails, retry with less
    /// precise versions of `place`, dropping one leading component at a
    /// time.
    pub async fn geocode_place(
        &self,
        place: &str,
        place_country: &PlaceCountry,
    ) -> Result<Location, GeocodeError> {
        if self.config.cache_only {
            return Err(GeocodeError::CacheOnly {
                place: place.to_owned(),
            });
        }

        let mut query = place.trim().to_owned();
        let mut depth = 0;
        loop {
            let err = match self.geocode_with_retries(&query, &place_country.country_code).await {
                Ok(Some(result)) => {
                    let latlon = LatLon::new(result.latitude, result.longitude);
                    if latlon.is_valid() {
                        return Ok(self.location_from_result(result, latlon, place_country));
                    }
                    warn!("ignoring invalid coordinates {} for {:?}", latlon, query);
                    GeocodeError::NotFound { place: query.clone() }
                }
                Ok(None) => GeocodeError::NotFound { place: query.clone() },
                Err(err) => err,
            };
            match query.split_once(',') {
                Some((_, rest)) if depth < self.config.max_address_depth && !rest.trim().is_empty() => {
                    let less_precise = rest.trim().to_owned();
                    info!("retrying {:?} with less precision as {:?}", place, less_precise);
                    query = less_precise;
                    depth += 1;
                }
                _ => return Err(err),
            }
        }
    }

    fn location_from_result(
        &self,
        result: GeoResult,
        latlon: LatLon,
        place_country: &PlaceCountry,
    ) -> Location {
        let mut location = Location::new(result.address);
        location.used = 1;
        location.latlon = latlon;
        location.country_code = place_country.country_code.clone();
        location.country_name = place_country.country_name.clone();
        location.continent = self.countries.continent_for(&place_country.country_code);
        location.found_country = place_country.found;
        location
    }

    /// Send one query to the provider, retrying transient failures with
    /// exponential backoff. A clean "no match" is returned immediately.
    #[instrument(level = "debug", skip_all, fields(query = %query))]
    async fn geocode_with_retries(
        &self,
        query: &str,
        country_code: &str,
    ) -> Result<Option<GeoResult>, GeocodeError> {
        let country_codes = if country_code.is_empty() || country_code == UNKNOWN_COUNTRY_CODE {
            None
        } else {
            Some(country_code.to_lowercase())
        };
        let request = GeocodeQuery {
            query: query.to_owned(),
            country_codes,
            exactly_one: true,
        };

        let max_attempts = self.config.retry.max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.rate_gate.acquire().await;
            let result = match timeout(self.config.request_timeout, self.provider.geocode(&request)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout),
            };
            match result {
                Ok(found) => {
                    let label = if found.is_some() { "found" } else { "no_match" };
                    counter!("gedgeocode.provider_requests.total", 1, "provider" => self.provider.tag().to_owned(), "result" => label);
                    return Ok(found);
                }
                Err(err) => {
                    counter!("gedgeocode.provider_requests.total", 1, "provider" => self.provider.tag().to_owned(), "result" => err.metrics_label());
                    if attempt >= max_attempts {
                        error!("giving up on {:?} after {} attempts: {}", query, attempt, err);
                        return Err(GeocodeError::TransientFailure {
                            place: query.to_owned(),
                            attempts: attempt,
                            source: err,
                        });
                    }
                    let delay = self.config.retry.backoff_with_jitter(attempt);
                    warn!(
                        "error geocoding {:?} (attempt {}/{}), retrying in {:?}: {}",
                        query, attempt, max_attempts, delay, err
                    );
                    counter!("gedgeocode.provider_retries.total", 1);
                    sleep(delay).await;
                }
            }
        }
    }
}
