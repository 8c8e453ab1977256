//! Country names, ISO 3166 alpha-2 codes and continents.

use std::collections::HashMap;

use tracing::debug;

use crate::config::GeoConfig;

/// ISO 3166-1 countries: `(name, alpha-2 code, continent code)`.
///
/// Names and codes are the 249 ISO 3166-1 short names from the Debian
/// `iso-codes` data set (`iso_3166-1.json`, release 4.15). Continent codes
/// use the Wikipedia country-to-continent list.
static COUNTRIES: &[(&str, &str, &str)] = &[
    ("Afghanistan", "AF", "AS"),
    ("Åland Islands", "AX", "EU"),
    ("Albania", "AL", "EU"),
    ("Algeria", "DZ", "AF"),
    ("American Samoa", "AS", "OC"),
    ("Andorra", "AD", "EU"),
    ("Angola", "AO", "AF"),
    ("Anguilla", "AI", "NA"),
    ("Antarctica", "AQ", "AN"),
    ("Antigua and Barbuda", "AG", "NA"),
    ("Argentina", "AR", "SA"),
    ("Armenia", "AM", "AS"),
    ("Aruba", "AW", "NA"),
    ("Australia", "AU", "OC"),
    ("Austria", "AT", "EU"),
    ("Azerbaijan", "AZ", "AS"),
    ("Bahamas", "BS", "NA"),
    ("Bahrain", "BH", "AS"),
    ("Bangladesh", "BD", "AS"),
    ("Barbados", "BB", "NA"),
    ("Belarus", "BY", "EU"),
    ("Belgium", "BE", "EU"),
    ("Belize", "BZ", "NA"),
    ("Benin", "BJ", "AF"),
    ("Bermuda", "BM", "NA"),
    ("Bhutan", "BT", "AS"),
    ("Bolivia, Plurinational State of", "BO", "SA"),
    ("Bonaire, Sint Eustatius and Saba", "BQ", "NA"),
    ("Bosnia and Herzegovina", "BA", "EU"),
    ("Botswana", "BW", "AF"),
    ("Bouvet Island", "BV", "AN"),
    ("Brazil", "BR", "SA"),
    ("British Indian Ocean Territory", "IO", "AS"),
    ("Brunei Darussalam", "BN", "AS"),
    ("Bulgaria", "BG", "EU"),
    ("Burkina Faso", "BF", "AF"),
    ("Burundi", "BI", "AF"),
    ("Cabo Verde", "CV", "AF"),
    ("Cambodia", "KH", "AS"),
    ("Cameroon", "CM", "AF"),
    ("Canada", "CA", "NA"),
    ("Cayman Islands", "KY", "NA"),
    ("Central African Republic", "CF", "AF"),
    ("Chad", "TD", "AF"),
    ("Chile", "CL", "SA"),
    ("China", "CN", "AS"),
    ("Christmas Island", "CX", "AS"),
    ("Cocos (Keeling) Islands", "CC", "AS"),
    ("Colombia", "CO", "SA"),
    ("Comoros", "KM", "AF"),
    ("Congo", "CG", "AF"),
    ("Congo, The Democratic Republic of the", "CD", "AF"),
    ("Cook Islands", "CK", "OC"),
    ("Costa Rica", "CR", "NA"),
    ("Côte d'Ivoire", "CI", "AF"),
    ("Croatia", "HR", "EU"),
    ("Cuba", "CU", "NA"),
    ("Curaçao", "CW", "NA"),
    ("Cyprus", "CY", "AS"),
    ("Czechia", "CZ", "EU"),
    ("Denmark", "DK", "EU"),
    ("Djibouti", "DJ", "AF"),
    ("Dominica", "DM", "NA"),
    ("Dominican Republic", "DO", "NA"),
    ("Ecuador", "EC", "SA"),
    ("Egypt", "EG", "AF"),
    ("El Salvador", "SV", "NA"),
    ("Equatorial Guinea", "GQ", "AF"),
    ("Eritrea", "ER", "AF"),
    ("Estonia", "EE", "EU"),
    ("Eswatini", "SZ", "AF"),
    ("Ethiopia", "ET", "AF"),
    ("Falkland Islands (Malvinas)", "FK", "SA"),
    ("Faroe Islands", "FO", "EU"),
    ("Fiji", "FJ", "OC"),
    ("Finland", "FI", "EU"),
    ("France", "FR", "EU"),
    ("French Guiana", "GF", "SA"),
    ("French Polynesia", "PF", "OC"),
    ("French Southern Territories", "TF", "AN"),
    ("Gabon", "GA", "AF"),
    ("Gambia", "GM", "AF"),
    ("Georgia", "GE", "AS"),
    ("Germany", "DE", "EU"),
    ("Ghana", "GH", "AF"),
    ("Gibraltar", "GI", "EU"),
    ("Greece", "GR", "EU"),
    ("Greenland", "GL", "NA"),
    ("Grenada", "GD", "NA"),
    ("Guadeloupe", "GP", "NA"),
    ("Guam", "GU", "OC"),
    ("Guatemala", "GT", "NA"),
    ("Guernsey", "GG", "EU"),
    ("Guinea", "GN", "AF"),
    ("Guinea-Bissau", "GW", "AF"),
    ("Guyana", "GY", "SA"),
    ("Haiti", "HT", "NA"),
    ("Heard Island and McDonald Islands", "HM", "AN"),
    ("Holy See (Vatican City State)", "VA", "EU"),
    ("Honduras", "HN", "NA"),
    ("Hong Kong", "HK", "AS"),
    ("Hungary", "HU", "EU"),
    ("Iceland", "IS", "EU"),
    ("India", "IN", "AS"),
    ("Indonesia", "ID", "AS"),
    ("Iran, Islamic Republic of", "IR", "AS"),
    ("Iraq", "IQ", "AS"),
    ("Ireland", "IE", "EU"),
    ("Isle of Man", "IM", "EU"),
    ("Israel", "IL", "AS"),
    ("Italy", "IT", "EU"),
    ("Jamaica", "JM", "NA"),
    ("Japan", "JP", "AS"),
    ("Jersey", "JE", "EU"),
    ("Jordan", "JO", "AS"),
    ("Kazakhstan", "KZ", "AS"),
    ("Kenya", "KE", "AF"),
    ("Kiribati", "KI", "OC"),
    ("Korea, Democratic People's Republic of", "KP", "AS"),
    ("Korea, Republic of", "KR", "AS"),
    ("Kuwait", "KW", "AS"),
    ("Kyrgyzstan", "KG", "AS"),
    ("Lao People's Democratic Republic", "LA", "AS"),
    ("Latvia", "LV", "EU"),
    ("Lebanon", "LB", "AS"),
    ("Lesotho", "LS", "AF"),
    ("Liberia", "LR", "AF"),
    ("Libya", "LY", "AF"),
    ("Liechtenstein", "LI", "EU"),
    ("Lithuania", "LT", "EU"),
    ("Luxembourg", "LU", "EU"),
    ("Macao", "MO", "AS"),
    ("Madagascar", "MG", "AF"),
    ("Malawi", "MW", "AF"),
    ("Malaysia", "MY", "AS"),
    ("Maldives", "MV", "AS"),
    ("Mali", "ML", "AF"),
    ("Malta", "MT", "EU"),
    ("Marshall Islands", "MH", "OC"),
    ("Martinique", "MQ", "NA"),
    ("Mauritania", "MR", "AF"),
    ("Mauritius", "MU", "AF"),
    ("Mayotte", "YT", "AF"),
    ("Mexico", "MX", "NA"),
    ("Micronesia, Federated States of", "FM", "OC"),
    ("Moldova, Republic of", "MD", "EU"),
    ("Monaco", "MC", "EU"),
    ("Mongolia", "MN", "AS"),
    ("Montenegro", "ME", "EU"),
    ("Montserrat", "MS", "NA"),
    ("Morocco", "MA", "AF"),
    ("Mozambique", "MZ", "AF"),
    ("Myanmar", "MM", "AS"),
    ("Namibia", "NA", "AF"),
    ("Nauru", "NR", "OC"),
    ("Nepal", "NP", "AS"),
    ("Netherlands", "NL", "EU"),
    ("New Caledonia", "NC", "OC"),
    ("New Zealand", "NZ", "OC"),
    ("Nicaragua", "NI", "NA"),
    ("Niger", "NE", "AF"),
    ("Nigeria", "NG", "AF"),
    ("Niue", "NU", "OC"),
    ("Norfolk Island", "NF", "OC"),
    ("North Macedonia", "MK", "EU"),
    ("Northern Mariana Islands", "MP", "OC"),
    ("Norway", "NO", "EU"),
    ("Oman", "OM", "AS"),
    ("Pakistan", "PK", "AS"),
    ("Palau", "PW", "OC"),
    ("Palestine, State of", "PS", "AS"),
    ("Panama", "PA", "NA"),
    ("Papua New Guinea", "PG", "OC"),
    ("Paraguay", "PY", "SA"),
    ("Peru", "PE", "SA"),
    ("Philippines", "PH", "AS"),
    ("Pitcairn", "PN", "OC"),
    ("Poland", "PL", "EU"),
    ("Portugal", "PT", "EU"),
    ("Puerto Rico", "PR", "NA"),
    ("Qatar", "QA", "AS"),
    ("Réunion", "RE", "AF"),
    ("Romania", "RO", "EU"),
    ("Russian Federation", "RU", "EU"),
    ("Rwanda", "RW", "AF"),
    ("Saint Barthélemy", "BL", "NA"),
    ("Saint Helena, Ascension and Tristan da Cunha", "SH", "AF"),
    ("Saint Kitts and Nevis", "KN", "NA"),
    ("Saint Lucia", "LC", "NA"),
    ("Saint Martin (French part)", "MF", "NA"),
    ("Saint Pierre and Miquelon", "PM", "NA"),
    ("Saint Vincent and the Grenadines", "VC", "NA"),
    ("Samoa", "WS", "OC"),
    ("San Marino", "SM", "EU"),
    ("Sao Tome and Principe", "ST", "AF"),
    ("Saudi Arabia", "SA", "AS"),
    ("Senegal", "SN", "AF"),
    ("Serbia", "RS", "EU"),
    ("Seychelles", "SC", "AF"),
    ("Sierra Leone", "SL", "AF"),
    ("Singapore", "SG", "AS"),
    ("Sint Maarten (Dutch part)", "SX", "NA"),
    ("Slovakia", "SK", "EU"),
    ("Slovenia", "SI", "EU"),
    ("Solomon Islands", "SB", "OC"),
    ("Somalia", "SO", "AF"),
    ("South Africa", "ZA", "AF"),
    ("South Georgia and the South Sandwich Islands", "GS", "AN"),
    ("South Sudan", "SS", "AF"),
    ("Spain", "ES", "EU"),
    ("Sri Lanka", "LK", "AS"),
    ("Sudan", "SD", "AF"),
    ("Suriname", "SR", "SA"),
    ("Svalbard and Jan Mayen", "SJ", "EU"),
    ("Sweden", "SE", "EU"),
    ("Switzerland", "CH", "EU"),
    ("Syrian Arab Republic", "SY", "AS"),
    ("Taiwan, Province of China", "TW", "AS"),
    ("Tajikistan", "TJ", "AS"),
    ("Tanzania, United Republic of", "TZ", "AF"),
    ("Thailand", "TH", "AS"),
    ("Timor-Leste", "TL", "AS"),
    ("Togo", "TG", "AF"),
    ("Tokelau", "TK", "OC"),
    ("Tonga", "TO", "OC"),
    ("Trinidad and Tobago", "TT", "NA"),
    ("Tunisia", "TN", "AF"),
    ("Türkiye", "TR", "AS"),
    ("Turkmenistan", "TM", "AS"),
    ("Turks and Caicos Islands", "TC", "NA"),
    ("Tuvalu", "TV", "OC"),
    ("Uganda", "UG", "AF"),
    ("Ukraine", "UA", "EU"),
    ("United Arab Emirates", "AE", "AS"),
    ("United Kingdom", "GB", "EU"),
    ("United States", "US", "NA"),
    ("United States Minor Outlying Islands", "UM", "OC"),
    ("Uruguay", "UY", "SA"),
    ("Uzbekistan", "UZ", "AS"),
    ("Vanuatu", "VU", "OC"),
    ("Venezuela, Bolivarian Republic of", "VE", "SA"),
    ("Viet Nam", "VN", "AS"),
    ("Virgin Islands, British", "VG", "NA"),
    ("Virgin Islands, U.S.", "VI", "NA"),
    ("Wallis and Futuna", "WF", "OC"),
    ("Western Sahara", "EH", "AF"),
    ("Yemen", "YE", "AS"),
    ("Zambia", "ZM", "AF"),
    ("Zimbabwe", "ZW", "AF"),
];

/// The name of the continent with the given two-letter continent code.
fn continent_name(continent_code: &str) -> Option<&'static str> {
    match continent_code {
        "AF" => Some("Africa"),
        "AN" => Some("Antarctica"),
        "AS" => Some("Asia"),
        "EU" => Some("Europe"),
        "NA" => Some("North America"),
        "OC" => Some("Oceania"),
        "SA" => Some("South America"),
        _ => None,
    }
}

/// The continent we report when we can't work one out.
pub const UNKNOWN_CONTINENT: &str = "Unknown";

/// The country code we report when we can't work one out.
pub const UNKNOWN_COUNTRY_CODE: &str = "none";

/// Country lookup tables: the built-in ISO list plus configured additions,
/// substitutions and continent overrides.
#[derive(Clone, Debug)]
pub struct CountryTable {
    /// Lowercased country name to its canonical spelling.
    names_by_lower: HashMap<String, String>,

    /// Lowercased country name to alpha-2 code.
    codes_by_lower_name: HashMap<String, String>,

    /// Lowercased substitution key to replacement country name.
    substitutions: HashMap<String, String>,

    /// Alpha-2 code to continent name, overriding the built-in list.
    fallback_continents: HashMap<String, String>,

    /// Alpha-2 code to continent name, for every code we know.
    continents_by_code: HashMap<String, String>,
}

impl CountryTable {
    /// Build lookup tables from the built-in country list and `geo`.
    pub fn new(geo: &GeoConfig) -> CountryTable {
        let mut names_by_lower = HashMap::new();
        let mut codes_by_lower_name = HashMap::new();
        for &(name, code, _) in COUNTRIES {
            names_by_lower.insert(name.to_lowercase(), name.to_owned());
            codes_by_lower_name.insert(name.to_lowercase(), code.to_owned());
        }
        for (name, code) in &geo.additional_countries_codes_dict_to_add {
            names_by_lower.insert(name.to_lowercase(), name.to_owned());
            codes_by_lower_name.insert(name.to_lowercase(), code.to_uppercase());
        }

        let substitutions = geo
            .country_substitutions
            .iter()
            .map(|(from, to)| (from.trim().to_lowercase(), to.to_owned()))
            .collect();
        let fallback_continents = geo
            .fallback_continent_map
            .iter()
            .map(|(code, continent)| (code.to_uppercase(), continent.to_owned()))
            .collect::<HashMap<_, _>>();

        let mut table = CountryTable {
            names_by_lower,
            codes_by_lower_name,
            substitutions,
            fallback_continents,
            continents_by_code: HashMap::new(),
        };
        let codes = table
            .codes_by_lower_name
            .values()
            .cloned()
            .collect::<Vec<_>>();
        for code in codes {
            let continent = table.country_code_to_continent(&code);
            table.continents_by_code.insert(code, continent);
        }
        table
    }

    /// If `name` is a country we know, return its canonical spelling.
    pub fn canonical_name(&self, name: &str) -> Option<&str> {
        self.names_by_lower
            .get(&name.trim().to_lowercase())
            .map(|s| &s[..])
    }

    /// The configured replacement for `name`, if any.
    pub fn substitution(&self, name: &str) -> Option<&str> {
        self.substitutions
            .get(&name.trim().to_lowercase())
            .map(|s| &s[..])
    }

    /// The alpha-2 code for a country name, or `"none"`.
    pub fn country_code(&self, name: &str) -> String {
        self.codes_by_lower_name
            .get(&name.trim().to_lowercase())
            .cloned()
            .unwrap_or_else(|| UNKNOWN_COUNTRY_CODE.to_owned())
    }

    /// Map a country code to a continent name. Configured fallbacks win,
    /// then the built-in list; anything else is `"Unknown"`.
    pub fn country_code_to_continent(&self, country_code: &str) -> String {
        let code = country_code.trim().to_uppercase();
        if let Some(continent) = self.fallback_continents.get(&code) {
            debug!("using fallback continent for {:?}: {}", code, continent);
            return continent.to_owned();
        }
        COUNTRIES
            .iter()
            .find(|&&(_, c, _)| c == code)
            .and_then(|&(_, _, continent)| continent_name(continent))
            .unwrap_or(UNKNOWN_CONTINENT)
            .to_owned()
    }

    /// The precomputed continent for `country_code`, or `"Unknown"`.
    pub fn continent_for(&self, country_code: &str) -> String {
        self.continents_by_code
            .get(&country_code.trim().to_uppercase())
            .cloned()
            .unwrap_or_else(|| UNKNOWN_CONTINENT.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CountryTable {
        let mut geo = GeoConfig::empty();
        geo.additional_countries_codes_dict_to_add
            .insert("England".to_owned(), "gb".to_owned());
        geo.country_substitutions
            .insert("USA".to_owned(), "United States".to_owned());
        geo.fallback_continent_map
            .insert("AQ".to_owned(), "Antarctic".to_owned());
        CountryTable::new(&geo)
    }

    #[test]
    fn country_codes_table_is_well_formed() {
        assert_eq!(COUNTRIES.len(), 249);
        let mut seen = std::collections::HashSet::new();
        for &(name, code, continent) in COUNTRIES {
            assert_eq!(code.len(), 2, "{}", name);
            assert!(seen.insert(code), "duplicate code {}", code);
            assert!(continent_name(continent).is_some(), "{}", name);
        }
    }

    #[test]
    fn names_are_case_insensitive() {
        let table = table();
        assert_eq!(table.canonical_name("france"), Some("France"));
        assert_eq!(table.canonical_name(" ENGLAND "), Some("England"));
        assert_eq!(table.canonical_name("Atlantis"), None);
        assert_eq!(table.country_code("france"), "FR");
        assert_eq!(table.country_code("England"), "GB");
        assert_eq!(table.country_code("Atlantis"), "none");
        assert_eq!(table.substitution("usa"), Some("United States"));
    }

    #[test]
    fn continents_prefer_fallbacks() {
        let table = table();
        assert_eq!(table.country_code_to_continent("fr"), "Europe");
        assert_eq!(table.country_code_to_continent("AQ"), "Antarctic");
        assert_eq!(table.country_code_to_continent("XX"), "Unknown");
        assert_eq!(table.country_code_to_continent("none"), "Unknown");
        assert_eq!(table.continent_for("GB"), "Europe");
        assert_eq!(table.continent_for(""), "Unknown");
    }
}
