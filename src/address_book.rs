//! A registry of place strings that folds near-duplicates together.

use std::collections::HashMap;

use strum_macros::{Display, EnumString};
use tracing::{debug, trace, warn};

use crate::location::{Location, SummaryRow, SUMMARY_COLUMNS};

/// The default minimum similarity (0-100) for two place strings to be
/// treated as the same place.
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 90.0;

/// How should [`FuzzyAddressBook::add_address`] combine a new occurrence of a
/// place with the location we already have for it?
#[derive(Clone, Copy, Debug, Default, Display, EnumString, Eq, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum MergeStrategy {
    /// Any field supplied by the new occurrence replaces the existing value.
    #[default]
    Overwrite,
    /// Only fields that are currently missing are filled in.
    FillMissing,
}

/// Identifies one shared [`Location`] inside a [`FuzzyAddressBook`]. Several
/// place strings may refer to the same `LocationId`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct LocationId(usize);

/// Place strings mapped to locations, with fuzzy de-duplication and an
/// index from alternate names back to the place strings that use them.
#[derive(Clone, Debug)]
pub struct FuzzyAddressBook {
    /// Place strings, in the order we first saw them.
    keys: Vec<String>,

    /// `keys`, normalized for token-sort comparison. Same order as `keys`.
    sorted_keys: Vec<String>,

    /// Place string to location.
    index: HashMap<String, LocationId>,

    /// Location storage. Never shrinks.
    locations: Vec<Location>,

    /// Alternate name to the place strings which use it.
    alt_addr_index: HashMap<String, Vec<String>>,

    /// Alternate names, in the order we first saw them.
    alt_addr_order: Vec<String>,

    /// Minimum token-sort-ratio for a fuzzy match.
    threshold: f64,

    /// How `add_address` merges into an existing location.
    merge_strategy: MergeStrategy,
}

impl Default for FuzzyAddressBook {
    fn default() -> Self {
        FuzzyAddressBook::new()
    }
}

impl FuzzyAddressBook {
    /// Create an empty address book with the default threshold and merge
    /// strategy.
    pub fn new() -> FuzzyAddressBook {
        FuzzyAddressBook::with_options(DEFAULT_FUZZY_THRESHOLD, MergeStrategy::default())
    }

    /// Create an empty address book.
    pub fn with_options(threshold: f64, merge_strategy: MergeStrategy) -> FuzzyAddressBook {
        FuzzyAddressBook {
            keys: vec![],
            sorted_keys: vec![],
            index: HashMap::new(),
            locations: vec![],
            alt_addr_index: HashMap::new(),
            alt_addr_order: vec![],
            threshold,
            merge_strategy,
        }
    }

    /// The number of distinct place strings.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The merge strategy used by `add_address`.
    pub fn merge_strategy(&self) -> MergeStrategy {
        self.merge_strategy
    }

    /// Look up a place string exactly.
    pub fn get_address(&self, key: &str) -> Option<&Location> {
        self.index.get(key).map(|&id| &self.locations[id.0])
    }

    /// Which shared location does `key` refer to?
    pub fn location_id(&self, key: &str) -> Option<LocationId> {
        self.index.get(key).copied()
    }

    /// Iterate over `(place string, location)` pairs in insertion order.
    pub fn addresses(&self) -> impl Iterator<Item = (&str, &Location)> + '_ {
        self.keys
            .iter()
            .map(move |key| (&key[..], &self.locations[self.index[key].0]))
    }

    /// Place strings grouped by the location they share. Groups are ordered
    /// by their first place string, and keys within a group by insertion.
    pub fn address_groups(&self) -> Vec<(&Location, Vec<&str>)> {
        let mut slots = HashMap::new();
        let mut groups: Vec<(&Location, Vec<&str>)> = vec![];
        for key in &self.keys {
            let id = self.index[key];
            let slot = *slots.entry(id).or_insert_with(|| {
                groups.push((&self.locations[id.0], vec![]));
                groups.len() - 1
            });
            groups[slot].1.push(key.as_str());
        }
        groups
    }

    /// All place strings, in insertion order.
    pub fn get_address_list(&self) -> &[String] {
        &self.keys
    }

    /// All alternate names in use, in the order we first saw them.
    pub fn get_alt_addr_list(&self) -> &[String] {
        &self.alt_addr_order
    }

    /// The place strings which use `alt_addr` as their alternate name.
    pub fn get_address_list_for_alt_addr(&self, alt_addr: &str) -> &[String] {
        self.alt_addr_index
            .get(alt_addr)
            .map(|keys| &keys[..])
            .unwrap_or(&[])
    }

    /// Find the existing place string most similar to `address`, if any
    /// scores at least our configured threshold.
    pub fn fuzzy_lookup_address(&self, address: &str) -> Option<&str> {
        self.fuzzy_lookup_address_with_threshold(address, self.threshold)
    }

    /// Like `fuzzy_lookup_address`, with an explicit threshold (0-100).
    ///
    /// An exact match always wins. Otherwise, ties go to the place string
    /// we saw first.
    pub fn fuzzy_lookup_address_with_threshold(
        &self,
        address: &str,
        threshold: f64,
    ) -> Option<&str> {
        if let Some((key, _)) = self.index.get_key_value(address) {
            return Some(key.as_str());
        }
        let query = sort_tokens(address);
        let mut best: Option<(usize, f64)> = None;
        for (i, candidate) in self.sorted_keys.iter().enumerate() {
            let score = sorted_token_ratio(&query, candidate);
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((i, score));
            }
        }
        match best {
            Some((i, score)) if score >= threshold => {
                trace!("fuzzy matched {:?} to {:?} ({:.1})", address, self.keys[i], score);
                Some(self.keys[i].as_str())
            }
            _ => None,
        }
    }

    /// Record an occurrence of `key`, as seen while scanning source records.
    ///
    /// An exact repeat merges `location` into the existing entry and bumps its
    /// usage. A fuzzy repeat becomes a new key which shares the matched
    /// entry's location (and therefore its alternate name). Anything else is
    /// a new entry.
    pub fn add_address(&mut self, key: &str, location: Option<Location>) {
        let existing = self.fuzzy_lookup_address(key).map(|k| k.to_owned());
        match existing {
            Some(existing) => {
                let id = self.index[&existing];
                match &location {
                    Some(incoming) => {
                        self.locations[id.0].merge_from(incoming, self.merge_strategy)
                    }
                    None if existing == key => {
                        warn!("no location supplied for existing address {:?}", key);
                    }
                    None => {}
                }
                self.locations[id.0].used += 1;
                if existing != key {
                    debug!("treating {:?} as a variant of {:?}", key, existing);
                    self.insert_key(key, id);
                }
                self.reindex_alt_addr(id);
            }
            None => {
                let location = location.unwrap_or_else(|| Location::new(key));
                let id = self.push_location(location);
                self.insert_key(key, id);
                self.reindex_alt_addr(id);
            }
        }
    }

    /// Record a resolved location for `address`.
    ///
    /// If a similar place string already exists, its alternate name is
    /// carried onto `location`, which then replaces the existing entry. An
    /// exact repeat also continues the existing usage count.
    pub fn fuzzy_add_address(&mut self, address: &str, location: Option<Location>) {
        let mut location = location.unwrap_or_else(|| Location::new(address));
        let existing = self.fuzzy_lookup_address(address).map(|k| k.to_owned());
        match existing {
            Some(existing) => {
                let id = self.index[&existing];
                let current = &self.locations[id.0];
                if existing == address {
                    location.used = current.used + 1;
                }
                if let Some(alt) = current.alt_addr() {
                    location.alt_addr = Some(alt.to_owned());
                }
                self.locations[id.0] = location;
                self.reindex_alt_addr(id);
            }
            None => {
                let id = self.push_location(location);
                self.insert_key(address, id);
                self.reindex_alt_addr(id);
            }
        }
    }

    /// The column names produced by `get_summary_row`.
    pub fn summary_columns(&self) -> &'static [&'static str] {
        SUMMARY_COLUMNS
    }

    /// Flatten the location for `address` into a summary row.
    pub fn get_summary_row(&self, address: &str) -> Option<SummaryRow> {
        self.get_address(address)
            .map(|location| location.summary_row(address))
    }

    fn push_location(&mut self, location: Location) -> LocationId {
        self.locations.push(location);
        LocationId(self.locations.len() - 1)
    }

    fn insert_key(&mut self, key: &str, id: LocationId) {
        if self.index.insert(key.to_owned(), id).is_none() {
            self.keys.push(key.to_owned());
            self.sorted_keys.push(sort_tokens(key));
        }
    }

    /// Bring the alternate-name index up to date for every key that refers
    /// to `id`.
    fn reindex_alt_addr(&mut self, id: LocationId) {
        let alt = self.locations[id.0].alt_addr().map(|alt| alt.to_owned());
        let keys = self
            .keys
            .iter()
            .filter(|key| self.index[*key] == id)
            .cloned()
            .collect::<Vec<_>>();

        for key in &keys {
            for (group_alt, group) in self.alt_addr_index.iter_mut() {
                if Some(group_alt) != alt.as_ref() {
                    group.retain(|k| k != key);
                }
            }
        }
        self.alt_addr_index.retain(|_, group| !group.is_empty());
        let index = &self.alt_addr_index;
        self.alt_addr_order.retain(|alt| index.contains_key(alt));

        if let Some(alt) = alt {
            if !self.alt_addr_index.contains_key(&alt) {
                self.alt_addr_order.push(alt.clone());
            }
            let group = self.alt_addr_index.entry(alt).or_default();
            for key in keys {
                if !group.contains(&key) {
                    group.push(key);
                }
            }
        }
    }
}

/// Lowercase `s`, turn punctuation into spaces, and sort the words.
fn sort_tokens(s: &str) -> String {
    let cleaned = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect::<String>();
    let mut tokens = cleaned.split_whitespace().collect::<Vec<_>>();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Similarity (0-100) of two strings already passed through `sort_tokens`.
///
/// This is normalized Indel similarity: `2 * lcs / (len(a) + len(b))`, where
/// only insertions and deletions count as edits.
fn sorted_token_ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let a = a.chars().collect::<Vec<_>>();
    let b = b.chars().collect::<Vec<_>>();
    let lcs = longest_common_subsequence(&a, &b);
    200.0 * lcs as f64 / (a.len() + b.len()) as f64
}

/// Length of the longest common subsequence of `a` and `b`.
fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    // One row of the DP matrix at a time.
    let mut prev = vec![0; b.len() + 1];
    let mut row = vec![0; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            row[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                row[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[b.len()]
}

/// Token-sort-ratio similarity (0-100) of two place strings.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    sorted_token_ratio(&sort_tokens(a), &sort_tokens(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::LatLon;

    fn located(address: &str, lat: f64, lon: f64) -> Location {
        let mut location = Location::new(address);
        location.latlon = LatLon::new(lat, lon);
        location
    }

    #[test]
    fn token_sort_ratio_ignores_case_punctuation_and_order() {
        assert_eq!(token_sort_ratio("Paris, France", "paris,france"), 100.0);
        assert_eq!(token_sort_ratio("France, Paris", "Paris France"), 100.0);
        assert!(token_sort_ratio("Springfeld, Illinois", "Springfield, Illinois") >= 90.0);
        assert!(token_sort_ratio("Paris, France", "Lyon, France") < 90.0);
        assert_eq!(token_sort_ratio("", ""), 0.0);
    }

    #[test]
    fn token_sort_ratio_only_counts_insertions_and_deletions() {
        // 2 * 8 / (8 + 9)
        assert!((token_sort_ratio("Wakefeld", "Wakefield") - 1600.0 / 17.0).abs() < 1e-9);
        assert!(token_sort_ratio("Cornwal", "Cornwall") > 93.0);
        // A substitution costs one deletion plus one insertion.
        assert_eq!(token_sort_ratio("abcd", "abxd"), 75.0);
        assert_eq!(longest_common_subsequence(&['a', 'b', 'c'], &[]), 0);
    }

    #[test]
    fn misspelled_places_share_one_location() {
        let mut book = FuzzyAddressBook::new();
        book.add_address("Wakefield", None);
        book.add_address("Wakefeld", None);
        assert_eq!(book.len(), 2);
        assert_eq!(book.location_id("Wakefield"), book.location_id("Wakefeld"));
        assert_eq!(book.fuzzy_lookup_address("Cornwal"), None);
        book.add_address("Cornwall", None);
        assert_eq!(book.fuzzy_lookup_address("Cornwal"), Some("Cornwall"));
    }

    #[test]
    fn exact_repeats_increment_usage_without_new_entries() {
        let mut book = FuzzyAddressBook::new();
        let loc = located("Paris, France", 48.8566, 2.3522);
        book.fuzzy_add_address("Paris, France", Some(loc.clone()));
        let first = book.get_address("Paris, France").unwrap().used;
        book.fuzzy_add_address("Paris, France", Some(loc.clone()));
        assert_eq!(book.get_address("Paris, France").unwrap().used, first + 1);
        book.fuzzy_add_address("Paris, France", Some(loc));
        assert_eq!(book.get_address("Paris, France").unwrap().used, first + 2);
        assert_eq!(book.len(), 1);

        let mut book = FuzzyAddressBook::new();
        book.add_address("Lyon", None);
        book.add_address("Lyon", None);
        book.add_address("Lyon", None);
        assert_eq!(book.len(), 1);
        assert_eq!(book.get_address("Lyon").unwrap().used, 2);
    }

    #[test]
    fn fuzzy_variants_share_one_location() {
        let mut book = FuzzyAddressBook::new();
        book.add_address("Paris, France", Some(located("Paris, France", 48.8566, 2.3522)));
        book.add_address("paris,france", None);
        assert_eq!(book.len(), 2);
        assert_eq!(
            book.location_id("Paris, France"),
            book.location_id("paris,france")
        );
        let loc = book.get_address("paris,france").unwrap();
        assert_eq!(loc.latlon, LatLon::new(48.8566, 2.3522));
        assert_eq!(loc.used, 1);
    }

    #[test]
    fn address_groups_follow_shared_locations() {
        let mut book = FuzzyAddressBook::new();
        book.add_address("Paris, France", None);
        book.add_address("Lyon, France", None);
        book.add_address("paris,france", None);
        let groups = book
            .address_groups()
            .into_iter()
            .map(|(_, keys)| keys)
            .collect::<Vec<_>>();
        assert_eq!(
            groups,
            vec![vec!["Paris, France", "paris,france"], vec!["Lyon, France"]]
        );
    }

    #[test]
    fn unrelated_places_get_their_own_entries() {
        let mut book = FuzzyAddressBook::new();
        book.add_address("Paris, France", None);
        book.add_address("Lyon, France", None);
        assert_ne!(
            book.location_id("Paris, France"),
            book.location_id("Lyon, France")
        );
        assert_eq!(book.fuzzy_lookup_address("Marseille"), None);
        assert_eq!(book.fuzzy_lookup_address("lyon france"), Some("Lyon, France"));
    }

    #[test]
    fn alt_addr_propagates_to_fuzzy_matches() {
        let mut book = FuzzyAddressBook::new();
        let mut londres = Location::new("Londres");
        londres.alt_addr = Some("London, England".to_owned());
        book.add_address("Londres", Some(londres));
        book.add_address("londres", None);
        assert_eq!(
            book.get_address("londres").unwrap().alt_addr(),
            Some("London, England")
        );
        assert_eq!(book.get_alt_addr_list(), &["London, England".to_owned()]);
        assert_eq!(
            book.get_address_list_for_alt_addr("London, England"),
            &["Londres".to_owned(), "londres".to_owned()]
        );
        assert!(book.get_address_list_for_alt_addr("Paris").is_empty());
    }

    #[test]
    fn fuzzy_add_address_copies_alt_addr_onto_incoming_location() {
        let mut book = FuzzyAddressBook::new();
        let mut londres = Location::new("Londres");
        londres.alt_addr = Some("London, England".to_owned());
        book.fuzzy_add_address("Londres", Some(londres));

        let replacement = located("Londres", 51.5074, -0.1278);
        book.fuzzy_add_address("londres.", Some(replacement));
        assert_eq!(book.len(), 1);
        let loc = book.get_address("Londres").unwrap();
        assert_eq!(loc.alt_addr(), Some("London, England"));
        assert_eq!(loc.latlon, LatLon::new(51.5074, -0.1278));
        // Fuzzy (not exact) replacement doesn't continue the usage count.
        assert_eq!(loc.used, 0);
    }

    #[test]
    fn none_alt_addr_is_not_indexed() {
        let mut book = FuzzyAddressBook::new();
        let mut loc = Location::new("Rome");
        loc.alt_addr = Some("NONE".to_owned());
        book.add_address("Rome", Some(loc));
        assert!(book.get_alt_addr_list().is_empty());
    }

    #[test]
    fn fill_missing_keeps_existing_content() {
        let mut book = FuzzyAddressBook::with_options(90.0, MergeStrategy::FillMissing);
        let mut first = located("Paris", 48.8566, 2.3522);
        first.country_name = "France".to_owned();
        book.add_address("Paris", Some(first));

        let mut second = located("Paris", 33.6609, -95.5555);
        second.country_name = "United States".to_owned();
        second.continent = "Europe".to_owned();
        book.add_address("Paris", Some(second));

        let loc = book.get_address("Paris").unwrap();
        assert_eq!(loc.country_name, "France");
        assert_eq!(loc.latlon, LatLon::new(48.8566, 2.3522));
        assert_eq!(loc.continent, "Europe");
        assert_eq!(loc.used, 1);
    }

    #[test]
    fn summary_rows_follow_summary_columns() {
        let mut book = FuzzyAddressBook::new();
        let mut loc = located("Paris", 48.5, 2.25);
        loc.country_code = "FR".to_owned();
        book.add_address("Paris", Some(loc));
        let row = book.get_summary_row("Paris").unwrap();
        assert_eq!(row.address, "Paris");
        assert_eq!(row.latitude, "48.5");
        assert_eq!(row.country_code, "FR");
        assert_eq!(book.summary_columns()[0], "address");
        assert!(book.get_summary_row("Nowhere").is_none());
    }

    #[test]
    fn merge_strategy_parses_from_kebab_case() {
        assert_eq!(
            "fill-missing".parse::<MergeStrategy>().unwrap(),
            MergeStrategy::FillMissing
        );
        assert_eq!(MergeStrategy::Overwrite.to_string(), "overwrite");
    }
}
