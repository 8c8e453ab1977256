//! On-disk CSV cache of geocoding results, plus alternate-name overrides.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fs::File,
    io,
    path::{Path, PathBuf},
};

use csv::StringRecord;
use tracing::{debug, error, info, warn};

use crate::{
    errors::GeocodeError,
    location::{is_blank, LatLon, Location},
};

/// The columns we always write, in order. `no_result` and any columns we
/// don't recognize follow these.
pub static CACHE_COLUMNS: &[&str] = &[
    "address",
    "alt_addr",
    "latitude",
    "longitude",
    "country_code",
    "country_name",
    "continent",
    "found_country",
    "used",
];

const NO_RESULT_COLUMN: &str = "no_result";

/// Map a CSV header to the name we use internally, accepting a few
/// historical aliases.
fn canonical_column_name(name: &str) -> String {
    let name = name.trim_start_matches('\u{feff}').trim().to_lowercase();
    match &name[..] {
        "place" => "address".to_owned(),
        "alt_place" => "alt_addr".to_owned(),
        "lat" => "latitude".to_owned(),
        "long" | "lon" | "lng" => "longitude".to_owned(),
        _ => name,
    }
}

/// Parse a boolean cell. We write `True`/`False`, but accept `true` and `1`
/// in any case.
fn parse_bool(s: &str) -> bool {
    let s = s.trim();
    s.eq_ignore_ascii_case("true") || s == "1"
}

fn format_bool(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

/// One CSV row, keyed by canonical column name.
struct Row(BTreeMap<String, String>);

impl Row {
    fn new(headers: &[String], record: &StringRecord) -> Row {
        Row(headers
            .iter()
            .cloned()
            .zip(record.iter().map(|v| v.to_owned()))
            .collect())
    }

    /// Remove and return a field, or an empty string.
    fn take(&mut self, name: &str) -> String {
        self.0.remove(name).unwrap_or_default()
    }

    fn take_opt(&mut self, name: &str) -> Option<String> {
        Some(self.take(name)).filter(|v| !is_blank(v))
    }

    fn take_latlon(&mut self) -> LatLon {
        let lat = self.take("latitude");
        let lon = self.take("longitude");
        LatLon::parse(&lat, &lon)
    }
}

/// A cached geocoding result, as stored in the cache file.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    /// The place string, with its original casing.
    pub address: String,
    pub alt_addr: Option<String>,
    pub latlon: LatLon,
    pub country_code: String,
    pub country_name: String,
    pub continent: String,
    pub found_country: bool,
    /// Session-scoped usage. Always 0 when read from disk.
    pub used: u32,
    /// Did geocoding fail for this place?
    pub no_result: bool,
    /// Columns we don't understand, preserved so that saving doesn't lose
    /// them.
    pub extra: BTreeMap<String, String>,
}

impl CacheEntry {
    /// An empty entry for `address`.
    pub fn new(address: impl Into<String>) -> CacheEntry {
        CacheEntry {
            address: address.into(),
            alt_addr: None,
            latlon: LatLon::none(),
            country_code: String::new(),
            country_name: String::new(),
            continent: String::new(),
            found_country: false,
            used: 0,
            no_result: false,
            extra: BTreeMap::new(),
        }
    }

    /// Build an entry from a resolved location.
    pub fn from_location(address: &str, location: &Location) -> CacheEntry {
        CacheEntry {
            address: address.to_owned(),
            alt_addr: location.alt_addr().map(|alt| alt.to_owned()),
            latlon: location.latlon,
            country_code: location.country_code.clone(),
            country_name: location.country_name.clone(),
            continent: location.continent.clone(),
            found_country: location.found_country,
            used: location.used,
            no_result: false,
            extra: BTreeMap::new(),
        }
    }

    /// Does this entry have coordinates we can use without geocoding?
    pub fn has_coordinates(&self) -> bool {
        !self.no_result && self.latlon.is_valid()
    }

    /// Parse a cache row. Rows without an address are skipped.
    fn from_row(mut row: Row) -> Option<CacheEntry> {
        let address = row.take("address");
        if address.trim().is_empty() {
            return None;
        }
        let latlon = row.take_latlon();
        let found_country = parse_bool(&row.take("found_country"));
        let no_result = parse_bool(&row.take(NO_RESULT_COLUMN));
        // Usage is never carried over between sessions.
        row.take("used");
        Some(CacheEntry {
            address,
            alt_addr: row.take_opt("alt_addr"),
            latlon,
            country_code: row.take("country_code"),
            country_name: row.take("country_name"),
            continent: row.take("continent"),
            found_country,
            used: 0,
            no_result,
            extra: row.0,
        })
    }

    /// Serialize this entry to match `header`.
    fn to_record(&self, header: &[String]) -> StringRecord {
        header
            .iter()
            .map(|column| match &column[..] {
                "address" => self.address.clone(),
                "alt_addr" => self.alt_addr.clone().unwrap_or_default(),
                "latitude" => self.latlon.lat_str(),
                "longitude" => self.latlon.lon_str(),
                "country_code" => self.country_code.clone(),
                "country_name" => self.country_name.clone(),
                "continent" => self.continent.clone(),
                "found_country" => format_bool(self.found_country).to_owned(),
                "used" => self.used.to_string(),
                NO_RESULT_COLUMN => format_bool(self.no_result).to_owned(),
                other => self.extra.get(other).cloned().unwrap_or_default(),
            })
            .collect()
    }
}

/// An override from the alternate-address file.
#[derive(Clone, Debug, PartialEq)]
pub struct AltAddrEntry {
    pub address: String,
    pub alt_addr: Option<String>,
    pub latlon: LatLon,
    pub country_code: String,
    pub country_name: String,
    pub continent: String,
}

impl AltAddrEntry {
    fn from_row(mut row: Row) -> Option<AltAddrEntry> {
        let address = row.take("address");
        if address.trim().is_empty() {
            return None;
        }
        Some(AltAddrEntry {
            address,
            alt_addr: row.take_opt("alt_addr"),
            latlon: row.take_latlon(),
            country_code: row.take("country_code"),
            country_name: row.take("country_name"),
            continent: row.take("continent"),
        })
    }

    /// The alternate name, if it's set to something meaningful.
    pub fn alt_addr(&self) -> Option<&str> {
        self.alt_addr.as_deref().filter(|alt| !is_blank(alt))
    }

    /// A zero-usage, unconfirmed cache entry carrying this override.
    fn to_cache_entry(&self) -> CacheEntry {
        CacheEntry {
            alt_addr: self.alt_addr().map(|alt| alt.to_owned()),
            latlon: self.latlon,
            country_code: self.country_code.clone(),
            country_name: self.country_name.clone(),
            continent: self.continent.clone(),
            ..CacheEntry::new(self.address.clone())
        }
    }
}

/// Read every row of a CSV file, calling `f` with each row. Missing files
/// yield no rows. Malformed rows are skipped with a warning.
fn read_rows(path: &Path, mut f: impl FnMut(Row)) -> Result<usize, GeocodeError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            info!("{} does not exist yet, starting empty", path.display());
            return Ok(0);
        }
        Err(source) => {
            return Err(GeocodeError::CacheIo {
                path: path.to_owned(),
                source,
            })
        }
    };
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(file);
    let headers = rdr
        .headers()
        .map_err(|err| GeocodeError::from_csv(path.to_owned(), err))?
        .iter()
        .map(canonical_column_name)
        .collect::<Vec<_>>();

    let mut count = 0;
    for (idx, record) in rdr.records().enumerate() {
        match record {
            Ok(record) => {
                f(Row::new(&headers, &record));
                count += 1;
            }
            Err(err) if err.is_io_error() => {
                return Err(GeocodeError::from_csv(path.to_owned(), err));
            }
            Err(err) => {
                warn!("skipping bad row {} in {}: {}", idx + 1, path.display(), err);
            }
        }
    }
    Ok(count)
}

/// Geocoding results keyed by lowercased place string.
#[derive(Debug)]
pub struct GeoCache {
    /// Where to load and save the cache, if anywhere.
    cache_file: Option<PathBuf>,

    /// Were cache reads disabled?
    always_geocode: bool,

    /// Cached rows, keyed by lowercased address.
    entries: BTreeMap<String, CacheEntry>,

    /// Alternate-address overrides, keyed by lowercased address.
    alt_addrs: HashMap<String, AltAddrEntry>,
}

impl GeoCache {
    /// Create a cache, loading `cache_file` (unless `always_geocode` is set)
    /// and overlaying `alt_addr_file`. Failures are logged, leaving the cache
    /// empty or partially loaded.
    pub fn new(
        cache_file: Option<PathBuf>,
        always_geocode: bool,
        alt_addr_file: Option<&Path>,
    ) -> GeoCache {
        let mut cache = GeoCache {
            cache_file,
            always_geocode,
            entries: BTreeMap::new(),
            alt_addrs: HashMap::new(),
        };
        if let Err(err) = cache.read_geo_cache() {
            error!("{}", anyhow::Error::new(err));
        }
        if let Some(alt_addr_file) = alt_addr_file {
            if let Err(err) = cache.read_alt_addr_file(alt_addr_file) {
                error!("{}", anyhow::Error::new(err));
            }
        }
        cache.add_alt_addr_to_cache();
        cache
    }

    /// An empty cache which is never saved.
    pub fn in_memory() -> GeoCache {
        GeoCache::new(None, false, None)
    }

    /// The file we save to, if any.
    pub fn cache_file(&self) -> Option<&Path> {
        self.cache_file.as_deref()
    }

    /// Load our cache file into memory. Returns the number of rows read.
    pub fn read_geo_cache(&mut self) -> Result<usize, GeocodeError> {
        let path = match &self.cache_file {
            Some(path) => path.clone(),
            None => return Ok(0),
        };
        if self.always_geocode {
            info!("ignoring {} because we always geocode", path.display());
            return Ok(0);
        }
        let entries = &mut self.entries;
        let count = read_rows(&path, |row| {
            if let Some(entry) = CacheEntry::from_row(row) {
                entries.insert(entry.address.to_lowercase(), entry);
            }
        })?;
        info!("loaded {} cached places from {}", count, path.display());
        Ok(count)
    }

    /// Write every entry to our cache file.
    pub fn save_geo_cache(&self) -> Result<(), GeocodeError> {
        let path = match &self.cache_file {
            Some(path) => path,
            None => {
                debug!("no cache file configured, not saving");
                return Ok(());
            }
        };
        if self.entries.is_empty() {
            info!("geocoding cache is empty, not writing {}", path.display());
            return Ok(());
        }

        let mut header = CACHE_COLUMNS
            .iter()
            .map(|&c| c.to_owned())
            .collect::<Vec<_>>();
        if self.entries.values().any(|e| e.no_result) {
            header.push(NO_RESULT_COLUMN.to_owned());
        }
        let extras = self
            .entries
            .values()
            .flat_map(|e| e.extra.keys())
            .filter(|k| !header.contains(k))
            .cloned()
            .collect::<BTreeSet<_>>();
        header.extend(extras);

        let csv_err = |err| GeocodeError::from_csv(path.to_owned(), err);
        let mut wtr = csv::Writer::from_path(path).map_err(csv_err)?;
        wtr.write_record(&header).map_err(csv_err)?;
        for entry in self.entries.values() {
            wtr.write_record(&entry.to_record(&header)).map_err(csv_err)?;
        }
        wtr.flush().map_err(|source| GeocodeError::CacheIo {
            path: path.to_owned(),
            source,
        })?;
        info!("saved {} cached places to {}", self.entries.len(), path.display());
        Ok(())
    }

    /// Load alternate-address overrides from `path`. Returns the number of
    /// rows read.
    pub fn read_alt_addr_file(&mut self, path: &Path) -> Result<usize, GeocodeError> {
        let alt_addrs = &mut self.alt_addrs;
        let count = read_rows(path, |row| {
            if let Some(alt) = AltAddrEntry::from_row(row) {
                alt_addrs.insert(alt.address.to_lowercase(), alt);
            }
        })?;
        info!("loaded {} alternate addresses from {}", count, path.display());
        Ok(count)
    }

    /// Add a cache entry for every alternate address we don't already have
    /// cached. Returns the number added.
    pub fn add_alt_addr_to_cache(&mut self) -> usize {
        let mut added = 0;
        for (key, alt) in &self.alt_addrs {
            if !self.entries.contains_key(key) {
                self.entries.insert(key.clone(), alt.to_cache_entry());
                added += 1;
            }
        }
        if added > 0 {
            debug!("added {} alternate addresses to the cache", added);
        }
        added
    }

    /// The alternate-address override for `address`, if any.
    pub fn alt_addr_entry(&self, address: &str) -> Option<&AltAddrEntry> {
        self.alt_addrs.get(&address.to_lowercase())
    }

    /// Look up `address` without changing anything.
    pub fn get(&self, address: &str) -> Option<&CacheEntry> {
        self.entries.get(&address.to_lowercase())
    }

    /// Copy the alternate-address override for `address` onto its cache
    /// entry. Returns true if an entry was changed.
    pub fn apply_alt_override(&mut self, address: &str) -> bool {
        let key = address.to_lowercase();
        let (alt, entry) = match (self.alt_addrs.get(&key), self.entries.get_mut(&key)) {
            (Some(alt), Some(entry)) => (alt, entry),
            _ => return false,
        };
        if let Some(alt_addr) = alt.alt_addr() {
            entry.alt_addr = Some(alt_addr.to_owned());
        }
        if alt.latlon.is_valid() {
            entry.latlon = alt.latlon;
        }
        true
    }

    /// Find the cache entry for `address`, applying any alternate-address
    /// override to it first.
    ///
    /// Returns the address which should be geocoded (the alternate name, if
    /// one exists) and a copy of the cache entry.
    pub fn lookup_geo_cache_entry(&mut self, address: &str) -> (String, Option<CacheEntry>) {
        let effective = self
            .alt_addr_entry(address)
            .and_then(|alt| alt.alt_addr())
            .unwrap_or(address)
            .to_owned();
        self.apply_alt_override(address);
        (effective, self.get(address).cloned())
    }

    /// Record a successful geocoding result. Usage restarts at 1.
    pub fn add_geo_cache_entry(&mut self, address: &str, location: &Location) {
        let key = address.to_lowercase();
        let mut entry = CacheEntry::from_location(address, location);
        entry.used = 1;
        if let Some(old) = self.entries.remove(&key) {
            entry.extra = old.extra;
        }
        self.entries.insert(key, entry);
    }

    /// Record that geocoding `address` failed. An entry which already has
    /// usable coordinates is left alone.
    pub fn add_no_result_entry(&mut self, address: &str) {
        let key = address.to_lowercase();
        match self.entries.get_mut(&key) {
            Some(entry) if entry.has_coordinates() => {
                debug!("keeping cached coordinates for {:?} despite failure", address);
            }
            Some(entry) => entry.no_result = true,
            None => {
                let mut entry = CacheEntry::new(address);
                entry.no_result = true;
                self.entries.insert(key, entry);
            }
        }
    }

    /// Is `address` cached (in any case)?
    pub fn contains(&self, address: &str) -> bool {
        self.entries.contains_key(&address.to_lowercase())
    }

    /// Iterate over cached entries, ordered by lowercased address.
    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> + '_ {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn paris() -> Location {
        let mut loc = Location::new("Paris, France");
        loc.latlon = LatLon::new(48.8566, 2.3522);
        loc.country_code = "FR".to_owned();
        loc.country_name = "France".to_owned();
        loc.continent = "Europe".to_owned();
        loc.found_country = true;
        loc.used = 7;
        loc
    }

    #[test]
    fn cache_round_trips_through_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.csv");

        let mut cache = GeoCache::new(Some(path.clone()), false, None);
        cache.add_geo_cache_entry("Paris, France", &paris());
        cache.add_no_result_entry("Atlantis");
        assert_eq!(cache.get("PARIS, FRANCE").unwrap().used, 1);
        cache.save_geo_cache().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(
            "address,alt_addr,latitude,longitude,country_code,country_name,continent,found_country,used,no_result\n"
        ));
        assert!(text.contains("True"));

        let reloaded = GeoCache::new(Some(path), false, None);
        assert_eq!(reloaded.len(), 2);
        let entry = reloaded.get("paris, france").unwrap();
        assert_eq!(entry.address, "Paris, France");
        assert_eq!(entry.latlon, LatLon::new(48.8566, 2.3522));
        assert!(entry.found_country);
        assert_eq!(entry.continent, "Europe");
        assert_eq!(entry.used, 0);
        assert!(!entry.no_result);
        assert!(reloaded.get("atlantis").unwrap().no_result);
    }

    #[test]
    fn reader_accepts_aliases_and_keeps_unknown_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.csv");
        fs::write(
            &path,
            "place,lat,long,found_country,used,source\n\
             Lyon,45.76,4.84,true,12,parish register\n\
             Nice,,,1,3,\n\
             ,1,2,False,0,\n",
        )
        .unwrap();

        let cache = GeoCache::new(Some(path.clone()), false, None);
        assert_eq!(cache.len(), 2);
        let lyon = cache.get("lyon").unwrap();
        assert_eq!(lyon.latlon, LatLon::new(45.76, 4.84));
        assert!(lyon.found_country);
        assert_eq!(lyon.used, 0);
        assert_eq!(lyon.extra["source"], "parish register");
        let nice = cache.get("NICE").unwrap();
        assert!(nice.found_country);
        assert!(!nice.has_coordinates());

        cache.save_geo_cache().unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.lines().next().unwrap().ends_with(",used,source"));
        assert!(text.contains("parish register"));
    }

    #[test]
    fn missing_cache_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.csv");
        let mut cache = GeoCache::new(Some(path.clone()), false, None);
        assert!(cache.is_empty());
        assert_eq!(cache.read_geo_cache().unwrap(), 0);
        // Saving an empty cache doesn't create a file.
        cache.save_geo_cache().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn unreadable_cache_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = GeoCache::new(Some(dir.path().to_owned()), false, None);
        assert!(cache.is_empty());
        assert!(cache.read_geo_cache().is_err());
    }

    #[test]
    fn always_geocode_skips_reading_but_not_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.csv");
        fs::write(&path, "address,latitude,longitude\nLyon,45.76,4.84\n").unwrap();

        let mut cache = GeoCache::new(Some(path.clone()), true, None);
        assert!(cache.is_empty());
        cache.add_geo_cache_entry("Paris, France", &paris());
        cache.save_geo_cache().unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("Paris, France"));
    }

    #[test]
    fn alt_addr_overrides_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("cache.csv");
        let alt_path = dir.path().join("alt.csv");
        fs::write(
            &cache_path,
            "address,alt_addr,latitude,longitude,found_country\nLondres,,1.0,1.0,False\n",
        )
        .unwrap();
        fs::write(
            &alt_path,
            "address,alt_addr,latitude,longitude\n\
             londres,\"London, England\",51.5074,-0.1278\n\
             Paname,\"Paris, France\",,\n",
        )
        .unwrap();

        let mut cache = GeoCache::new(Some(cache_path), false, Some(&alt_path));
        assert_eq!(cache.len(), 2);

        // The alternate-only place was synthesized without usage or country.
        let paname = cache.get("paname").unwrap();
        assert_eq!(paname.alt_addr.as_deref(), Some("Paris, France"));
        assert_eq!(paname.used, 0);
        assert!(!paname.found_country);

        // Plain reads don't apply overrides.
        assert_eq!(cache.get("Londres").unwrap().alt_addr, None);

        let (effective, entry) = cache.lookup_geo_cache_entry("LONDRES");
        assert_eq!(effective, "London, England");
        let entry = entry.unwrap();
        assert_eq!(entry.alt_addr.as_deref(), Some("London, England"));
        assert_eq!(entry.latlon, LatLon::new(51.5074, -0.1278));
        assert_eq!(cache.get("londres").unwrap().latlon, entry.latlon);

        let (effective, entry) = cache.lookup_geo_cache_entry("Marseille");
        assert_eq!(effective, "Marseille");
        assert!(entry.is_none());
    }

    #[test]
    fn failures_do_not_clobber_good_entries() {
        let mut cache = GeoCache::in_memory();
        cache.add_geo_cache_entry("Paris, France", &paris());
        cache.add_no_result_entry("paris, france");
        assert!(cache.get("Paris, France").unwrap().has_coordinates());
        cache.add_no_result_entry("Atlantis");
        assert!(cache.contains("ATLANTIS"));
        assert!(!cache.get("atlantis").unwrap().has_coordinates());
    }
}
