//! Resolved places and their coordinates.

use std::fmt;

use serde::Serialize;

use crate::address_book::MergeStrategy;
use crate::geo_cache::CacheEntry;

/// A latitude/longitude pair, either of which may be unset.
///
/// An unset `LatLon` is distinct from `(0, 0)`, which is a perfectly good
/// place in the Gulf of Guinea.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LatLon {
    lat: Option<f64>,
    lon: Option<f64>,
}

impl LatLon {
    /// Create a `LatLon` from known coordinates.
    pub fn new(lat: f64, lon: f64) -> LatLon {
        LatLon {
            lat: Some(lat),
            lon: Some(lon),
        }
    }

    /// A `LatLon` with neither coordinate set.
    pub fn none() -> LatLon {
        LatLon::default()
    }

    /// Parse coordinates from strings. Accepts plain decimals and
    /// hemisphere-prefixed values like `N51.5` or `W0.12`. Anything
    /// unparseable becomes unset rather than an error.
    pub fn parse(lat: &str, lon: &str) -> LatLon {
        LatLon {
            lat: parse_coordinate(lat, 'N', 'S'),
            lon: parse_coordinate(lon, 'E', 'W'),
        }
    }

    /// Parse a `"lat,lon"` string.
    pub fn from_pair_str(s: &str) -> LatLon {
        let mut parts = s.split(',');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(lat), Some(lon), None) => LatLon::parse(lat, lon),
            _ => LatLon::none(),
        }
    }

    /// The latitude, if set.
    pub fn lat(&self) -> Option<f64> {
        self.lat
    }

    /// The longitude, if set.
    pub fn lon(&self) -> Option<f64> {
        self.lon
    }

    /// Are both coordinates present and inside the usual geodetic ranges?
    pub fn is_valid(&self) -> bool {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => {
                (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
            }
            _ => false,
        }
    }

    /// The latitude formatted for a CSV cell, or an empty string.
    pub fn lat_str(&self) -> String {
        self.lat.map(|v| v.to_string()).unwrap_or_default()
    }

    /// The longitude formatted for a CSV cell, or an empty string.
    pub fn lon_str(&self) -> String {
        self.lon.map(|v| v.to_string()).unwrap_or_default()
    }
}

impl fmt::Display for LatLon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => write!(f, "({},{})", lat, lon),
            _ => write!(f, "(none)"),
        }
    }
}

/// Parse one coordinate, with an optional leading hemisphere letter.
fn parse_coordinate(s: &str, positive: char, negative: char) -> Option<f64> {
    let s = s.trim();
    let first = s.chars().next()?;
    let value = match first.to_ascii_uppercase() {
        c if c == positive => s[1..].trim().parse::<f64>().ok()?,
        c if c == negative => -s[1..].trim().parse::<f64>().ok()?,
        _ => s.parse::<f64>().ok()?,
    };
    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}

/// Is `s` empty, or the literal placeholder `"none"` (in any case)?
pub(crate) fn is_blank(s: &str) -> bool {
    let s = s.trim();
    s.is_empty() || s.eq_ignore_ascii_case("none")
}

/// One resolved (or attempted) geocoding result for a place string.
#[derive(Clone, Debug, PartialEq)]
pub struct Location {
    /// The place string this location was resolved for.
    pub address: String,
    /// A user-supplied substitute name, used for future lookups.
    pub alt_addr: Option<String>,
    /// Coordinates, possibly unset if geocoding failed.
    pub latlon: LatLon,
    /// ISO 3166 alpha-2 code, or `"none"`.
    pub country_code: String,
    pub country_name: String,
    pub continent: String,
    /// Was the country detected in the place string itself (rather than
    /// assumed from the configured default)?
    pub found_country: bool,
    /// How many times this place has been referenced in this session.
    pub used: u32,
}

impl Location {
    /// A zero-usage location with nothing resolved yet.
    pub fn new(address: impl Into<String>) -> Location {
        Location {
            address: address.into(),
            alt_addr: None,
            latlon: LatLon::none(),
            country_code: String::new(),
            country_name: String::new(),
            continent: String::new(),
            found_country: false,
            used: 0,
        }
    }

    /// Build a location from a cache row. Usage always starts at zero.
    pub fn from_cache_entry(entry: &CacheEntry) -> Location {
        Location {
            address: entry.address.clone(),
            alt_addr: entry.alt_addr.clone().filter(|alt| !is_blank(alt)),
            latlon: entry.latlon,
            country_code: entry.country_code.clone(),
            country_name: entry.country_name.clone(),
            continent: entry.continent.clone(),
            found_country: entry.found_country,
            used: 0,
        }
    }

    /// The alternate name, if it's set to something meaningful.
    pub fn alt_addr(&self) -> Option<&str> {
        self.alt_addr.as_deref().filter(|alt| !is_blank(alt))
    }

    /// Merge the content fields of `incoming` into `self`. Identity
    /// (`address`) and the usage counter are left alone.
    pub fn merge_from(&mut self, incoming: &Location, strategy: MergeStrategy) {
        let overwrite = strategy == MergeStrategy::Overwrite;
        if let Some(alt) = incoming.alt_addr() {
            if overwrite || self.alt_addr().is_none() {
                self.alt_addr = Some(alt.to_owned());
            }
        }
        if incoming.latlon.is_valid() && (overwrite || !self.latlon.is_valid()) {
            self.latlon = incoming.latlon;
        }
        merge_field(&mut self.country_code, &incoming.country_code, overwrite);
        merge_field(&mut self.continent, &incoming.continent, overwrite);
        if !is_blank(&incoming.country_name) {
            if overwrite {
                self.country_name = incoming.country_name.clone();
                self.found_country = incoming.found_country;
            } else {
                if is_blank(&self.country_name) {
                    self.country_name = incoming.country_name.clone();
                }
                self.found_country |= incoming.found_country;
            }
        }
    }

    /// Flatten this location into a summary row for `address`.
    pub fn summary_row(&self, address: &str) -> SummaryRow {
        SummaryRow {
            address: address.to_owned(),
            alt_addr: self.alt_addr().unwrap_or_default().to_owned(),
            used: self.used,
            latitude: self.latlon.lat_str(),
            longitude: self.latlon.lon_str(),
            found_country: self.found_country,
            country_code: self.country_code.clone(),
            country_name: self.country_name.clone(),
            continent: self.continent.clone(),
        }
    }
}

fn merge_field(existing: &mut String, incoming: &str, overwrite: bool) {
    if !is_blank(incoming) && (overwrite || is_blank(existing)) {
        *existing = incoming.to_owned();
    }
}

/// The columns of a [`SummaryRow`], in output order.
pub static SUMMARY_COLUMNS: &[&str] = &[
    "address",
    "alt_addr",
    "used",
    "latitude",
    "longitude",
    "found_country",
    "country_code",
    "country_name",
    "continent",
];

/// A flattened [`Location`], ready to be written as CSV.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SummaryRow {
    pub address: String,
    pub alt_addr: String,
    pub used: u32,
    pub latitude: String,
    pub longitude: String,
    pub found_country: bool,
    pub country_code: String,
    pub country_name: String,
    pub continent: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latlon_validity_checks_ranges() {
        assert!(LatLon::new(48.8566, 2.3522).is_valid());
        assert!(LatLon::new(0.0, 0.0).is_valid());
        assert!(LatLon::new(-90.0, 180.0).is_valid());
        assert!(!LatLon::new(90.5, 0.0).is_valid());
        assert!(!LatLon::new(0.0, -180.1).is_valid());
        assert!(!LatLon::none().is_valid());
        assert_ne!(LatLon::none(), LatLon::new(0.0, 0.0));
    }

    #[test]
    fn latlon_parses_hemisphere_prefixes() {
        let ll = LatLon::parse("N51.5", "W0.25");
        assert_eq!(ll, LatLon::new(51.5, -0.25));
        let ll = LatLon::parse("s33.75", "e151.25");
        assert_eq!(ll, LatLon::new(-33.75, 151.25));
        assert_eq!(LatLon::parse(" 12.5 ", "-3"), LatLon::new(12.5, -3.0));
    }

    #[test]
    fn latlon_tolerates_garbage() {
        let ll = LatLon::parse("", "2.0");
        assert_eq!(ll.lat(), None);
        assert_eq!(ll.lon(), Some(2.0));
        assert!(!ll.is_valid());
        assert!(!LatLon::parse("north", "NaN").is_valid());
        assert!(!LatLon::from_pair_str("1,2,3").is_valid());
        assert_eq!(LatLon::from_pair_str("N1,E2"), LatLon::new(1.0, 2.0));
    }

    #[test]
    fn blank_alt_addr_is_ignored() {
        let mut loc = Location::new("Londres");
        loc.alt_addr = Some("None".to_owned());
        assert_eq!(loc.alt_addr(), None);
        loc.alt_addr = Some("London, England".to_owned());
        assert_eq!(loc.alt_addr(), Some("London, England"));
    }

    #[test]
    fn merge_strategies_differ_on_present_fields() {
        let mut existing = Location::new("Paris");
        existing.country_name = "France".to_owned();
        existing.latlon = LatLon::new(1.0, 1.0);

        let mut incoming = Location::new("Paris");
        incoming.country_name = "Texas".to_owned();
        incoming.continent = "Europe".to_owned();
        incoming.latlon = LatLon::new(48.8566, 2.3522);

        let mut filled = existing.clone();
        filled.merge_from(&incoming, MergeStrategy::FillMissing);
        assert_eq!(filled.country_name, "France");
        assert_eq!(filled.latlon, LatLon::new(1.0, 1.0));
        assert_eq!(filled.continent, "Europe");

        existing.merge_from(&incoming, MergeStrategy::Overwrite);
        assert_eq!(existing.country_name, "Texas");
        assert_eq!(existing.latlon, LatLon::new(48.8566, 2.3522));
        assert_eq!(existing.address, "Paris");
    }
}
