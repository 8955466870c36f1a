//! Country lookup tables.
//!
//! The aggregator only depends on the [`CountryIndex`] trait. The static
//! index here carries the country names that appear in the threat actor
//! datasets, their ISO alpha-2/alpha-3 codes and the known spelling variants.

use crate::analysis::aggregator::{canonicalize_location, GeoLookup};
use crate::models::CountryKey;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::debug;

/// Resolves a canonicalized location string to a country identity.
pub trait CountryIndex {
    fn resolve(&self, canonical: &str) -> Option<CountryKey>;
}

impl<F> CountryIndex for F
where
    F: Fn(&str) -> Option<CountryKey>,
{
    fn resolve(&self, canonical: &str) -> Option<CountryKey> {
        self(canonical)
    }
}

/// Errors raised while building an index.
#[derive(Debug, Error, PartialEq)]
pub enum CountryIndexError {
    #[error("synonym '{alias}' points at unknown country code '{code}'")]
    UnknownCode { alias: String, code: String },
}

/// (alpha-2, alpha-3, display name, extra spellings)
const COUNTRIES: &[(&str, &str, &str, &[&str])] = &[
    ("RU", "RUS", "Russia", &["Russian Federation"]),
    ("CN", "CHN", "China", &["People's Republic of China", "PRC"]),
    ("IR", "IRN", "Iran", &["Islamic Republic of Iran"]),
    ("IQ", "IRQ", "Iraq", &[]),
    ("LB", "LBN", "Lebanon", &[]),
    ("KP", "PRK", "North Korea", &["DPRK"]),
    ("KR", "KOR", "South Korea", &["Korea", "Republic of Korea"]),
    ("VN", "VNM", "Vietnam", &["Viet Nam"]),
    ("PK", "PAK", "Pakistan", &[]),
    ("IN", "IND", "India", &[]),
    ("TR", "TUR", "Turkey", &["Türkiye", "Turkiye"]),
    ("IT", "ITA", "Italy", &[]),
    ("BY", "BLR", "Belarus", &[]),
    ("UA", "UKR", "Ukraine", &[]),
    ("BR", "BRA", "Brazil", &[]),
    ("MX", "MEX", "Mexico", &[]),
    ("NG", "NGA", "Nigeria", &[]),
    ("IL", "ISR", "Israel", &[]),
    ("AE", "ARE", "United Arab Emirates", &["UAE"]),
    ("AT", "AUT", "Austria", &[]),
    ("FR", "FRA", "France", &[]),
    ("ES", "ESP", "Spain", &[]),
    ("TN", "TUN", "Tunisia", &[]),
    ("DZ", "DZA", "Algeria", &[]),
    ("SA", "SAU", "Saudi Arabia", &[]),
    ("LY", "LBY", "Libya", &[]),
    ("GE", "GEO", "Georgia", &[]),
    ("AM", "ARM", "Armenia", &[]),
    ("TW", "TWN", "Taiwan", &[]),
    ("ID", "IDN", "Indonesia", &[]),
    ("KZ", "KAZ", "Kazakhstan", &[]),
    ("SY", "SYR", "Syria", &[]),
    ("VE", "VEN", "Venezuela", &[]),
    ("PH", "PHL", "Philippines", &[]),
    ("SG", "SGP", "Singapore", &[]),
    ("RO", "ROU", "Romania", &[]),
    ("UZ", "UZB", "Uzbekistan", &[]),
    ("CA", "CAN", "Canada", &[]),
    (
        "US",
        "USA",
        "United States",
        &["United States of America", "U.S.", "U.S.A."],
    ),
    ("PS", "PSE", "Palestine", &["Gaza"]),
    ("DE", "DEU", "Germany", &[]),
    ("PL", "POL", "Poland", &[]),
    ("GB", "GBR", "United Kingdom", &["UK", "Great Britain"]),
    ("NL", "NLD", "Netherlands", &["The Netherlands"]),
];

/// ISO 3166-1 alpha-2 codes, plus XK for Kosovo. Sorted.
const ISO_ALPHA2: &[&str] = &[
    "AD", "AE", "AF", "AG", "AI", "AL", "AM", "AO", "AQ", "AR", "AS", "AT", "AU", "AW", "AX", "AZ",
    "BA", "BB", "BD", "BE", "BF", "BG", "BH", "BI", "BJ", "BL", "BM", "BN", "BO", "BQ", "BR", "BS", "BT", "BV", "BW", "BY", "BZ",
    "CA", "CC", "CD", "CF", "CG", "CH", "CI", "CK", "CL", "CM", "CN", "CO", "CR", "CU", "CV", "CW", "CX", "CY", "CZ",
    "DE", "DJ", "DK", "DM", "DO", "DZ",
    "EC", "EE", "EG", "EH", "ER", "ES", "ET",
    "FI", "FJ", "FK", "FM", "FO", "FR",
    "GA", "GB", "GD", "GE", "GF", "GG", "GH", "GI", "GL", "GM", "GN", "GP", "GQ", "GR", "GS", "GT", "GU", "GW", "GY",
    "HK", "HM", "HN", "HR", "HT", "HU",
    "ID", "IE", "IL", "IM", "IN", "IO", "IQ", "IR", "IS", "IT",
    "JE", "JM", "JO", "JP",
    "KE", "KG", "KH", "KI", "KM", "KN", "KP", "KR", "KW", "KY", "KZ",
    "LA", "LB", "LC", "LI", "LK", "LR", "LS", "LT", "LU", "LV", "LY",
    "MA", "MC", "MD", "ME", "MF", "MG", "MH", "MK", "ML", "MM", "MN", "MO", "MP", "MQ", "MR", "MS", "MT", "MU", "MV", "MW", "MX", "MY", "MZ",
    "NA", "NC", "NE", "NF", "NG", "NI", "NL", "NO", "NP", "NR", "NU", "NZ",
    "OM",
    "PA", "PE", "PF", "PG", "PH", "PK", "PL", "PM", "PN", "PR", "PS", "PT", "PW", "PY",
    "QA",
    "RE", "RO", "RS", "RU", "RW",
    "SA", "SB", "SC", "SD", "SE", "SG", "SH", "SI", "SJ", "SK", "SL", "SM", "SN", "SO", "SR", "SS", "ST", "SV", "SX", "SY", "SZ",
    "TC", "TD", "TF", "TG", "TH", "TJ", "TK", "TL", "TM", "TN", "TO", "TR", "TT", "TV", "TW", "TZ",
    "UA", "UG", "UM", "US", "UY", "UZ",
    "VA", "VC", "VE", "VG", "VI", "VN", "VU",
    "WF", "WS",
    "XK",
    "YE", "YT",
    "ZA", "ZM", "ZW",
];

/// Whether `code` is a known ISO 3166-1 alpha-2 code (upper case).
pub fn is_iso_alpha2(code: &str) -> bool {
    ISO_ALPHA2.binary_search(&code).is_ok()
}

/// In-memory, case-insensitive country index.
#[derive(Debug, Clone, Default)]
pub struct StaticCountryIndex {
    aliases: HashMap<String, CountryKey>,
}

impl StaticCountryIndex {
    /// Index holding the built-in country table.
    pub fn builtin() -> Self {
        let mut index = Self::default();

        for (alpha2, alpha3, name, spellings) in COUNTRIES {
            let key = CountryKey::new(*alpha2, *name);
            index.insert(name, &key);
            index.insert(alpha2, &key);
            index.insert(alpha3, &key);
            for spelling in spellings.iter() {
                index.insert(spelling, &key);
            }
        }

        index
    }

    /// Built-in table extended with configured synonyms (alias -> alpha-2).
    pub fn with_synonyms(synonyms: &BTreeMap<String, String>) -> Result<Self, CountryIndexError> {
        let mut index = Self::builtin();
        index.extend(synonyms)?;
        Ok(index)
    }

    /// Add or override aliases. Every target code must already be known.
    pub fn extend(&mut self, synonyms: &BTreeMap<String, String>) -> Result<(), CountryIndexError> {
        for (alias, code) in synonyms {
            let key = self
                .key_for_code(code)
                .ok_or_else(|| CountryIndexError::UnknownCode {
                    alias: alias.clone(),
                    code: code.clone(),
                })?;
            debug!("Adding country synonym {} -> {}", alias, key.code);
            self.insert(alias, &key);
        }
        Ok(())
    }

    /// Number of distinct countries known to the index.
    pub fn country_count(&self) -> usize {
        let mut codes: Vec<&str> = self.aliases.values().map(|k| k.code.as_str()).collect();
        codes.sort_unstable();
        codes.dedup();
        codes.len()
    }

    fn key_for_code(&self, code: &str) -> Option<CountryKey> {
        self.aliases
            .values()
            .find(|k| k.code.eq_ignore_ascii_case(code.trim()))
            .cloned()
    }

    fn insert(&mut self, alias: &str, key: &CountryKey) {
        let alias = canonicalize_location(alias).to_lowercase();
        if !alias.is_empty() {
            self.aliases.insert(alias, key.clone());
        }
    }
}

impl CountryIndex for StaticCountryIndex {
    fn resolve(&self, canonical: &str) -> Option<CountryKey> {
        self.aliases.get(&canonical.to_lowercase()).cloned()
    }
}

/// Index for the country codes returned by IP geolocation.
///
/// Accepts every ISO alpha-2 code. The display name comes from the static
/// table when it knows the country, then from the geolocation response,
/// and falls back to the code itself.
pub struct IsoCodeIndex<'a> {
    known: &'a StaticCountryIndex,
    lookup: &'a GeoLookup,
}

impl<'a> IsoCodeIndex<'a> {
    pub fn new(known: &'a StaticCountryIndex, lookup: &'a GeoLookup) -> Self {
        Self { known, lookup }
    }
}

impl CountryIndex for IsoCodeIndex<'_> {
    fn resolve(&self, canonical: &str) -> Option<CountryKey> {
        let code = canonical.to_ascii_uppercase();
        if !is_iso_alpha2(&code) {
            return None;
        }

        let name = self
            .known
            .key_for_code(&code)
            .map(|key| key.name)
            .or_else(|| self.lookup.country_name(&code).map(str::to_string))
            .unwrap_or_else(|| code.clone());
        Some(CountryKey::new(code, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_names_and_codes() {
        let index = StaticCountryIndex::builtin();

        let russia = index.resolve("Russia").unwrap();
        assert_eq!(russia.code, "RU");
        assert_eq!(russia.name, "Russia");

        assert_eq!(index.resolve("RU"), Some(russia.clone()));
        assert_eq!(index.resolve("RUS"), Some(russia.clone()));
        assert_eq!(index.resolve("russia"), Some(russia));
        assert_eq!(index.resolve("Atlantis"), None);
    }

    #[test]
    fn test_united_states_synonyms() {
        let index = StaticCountryIndex::builtin();
        for spelling in ["United States", "United States of America", "USA", "US", "U.S."] {
            let key = index.resolve(spelling).unwrap();
            assert_eq!(key.code, "US", "spelling {spelling}");
            assert_eq!(key.name, "United States");
        }
    }

    #[test]
    fn test_korea_variants() {
        let index = StaticCountryIndex::builtin();
        assert_eq!(index.resolve("Korea").unwrap().code, "KR");
        assert_eq!(index.resolve("Republic of Korea").unwrap().code, "KR");
        assert_eq!(index.resolve("North Korea").unwrap().code, "KP");
        assert_eq!(index.resolve("Türkiye").unwrap().code, "TR");
    }

    #[test]
    fn test_configured_synonyms() {
        let mut synonyms = BTreeMap::new();
        synonyms.insert("Persia".to_string(), "IR".to_string());
        synonyms.insert("Holland".to_string(), "nl".to_string());

        let index = StaticCountryIndex::with_synonyms(&synonyms).unwrap();
        assert_eq!(index.resolve("persia").unwrap().name, "Iran");
        assert_eq!(index.resolve("Holland").unwrap().code, "NL");
    }

    #[test]
    fn test_synonym_with_unknown_code_is_rejected() {
        let mut synonyms = BTreeMap::new();
        synonyms.insert("Atlantis".to_string(), "XX".to_string());

        let err = StaticCountryIndex::with_synonyms(&synonyms).unwrap_err();
        assert_eq!(
            err,
            CountryIndexError::UnknownCode {
                alias: "Atlantis".to_string(),
                code: "XX".to_string(),
            }
        );
    }

    #[test]
    fn test_country_count() {
        let index = StaticCountryIndex::builtin();
        assert_eq!(index.country_count(), COUNTRIES.len());
    }

    #[test]
    fn test_iso_alpha2_table() {
        assert!(ISO_ALPHA2.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ISO_ALPHA2.len(), 250);
        assert!(is_iso_alpha2("JP"));
        assert!(is_iso_alpha2("XK"));
        assert!(!is_iso_alpha2("ZZ"));
        assert!(!is_iso_alpha2("jp"));
    }

    #[test]
    fn test_iso_code_index_names() {
        use crate::models::GeoLocation;

        let known = StaticCountryIndex::builtin();
        let lookup = GeoLookup::from_locations(&[
            GeoLocation::resolved("1.1.1.1", "JP".to_string(), Some("Japan".to_string())),
            GeoLocation::resolved(
                "2.2.2.2",
                "US".to_string(),
                Some("United States of America".to_string()),
            ),
        ]);
        let index = IsoCodeIndex::new(&known, &lookup);

        assert_eq!(index.resolve("JP").unwrap().name, "Japan");
        assert_eq!(index.resolve("jp").unwrap().code, "JP");
        assert_eq!(index.resolve("US").unwrap().name, "United States");
        assert_eq!(index.resolve("SE").unwrap().name, "SE");
        assert_eq!(index.resolve("ZZ"), None);
        assert_eq!(index.resolve("Japan"), None);
    }

    #[test]
    fn test_closure_index() {
        let only_russia = |s: &str| (s == "Russia").then(|| CountryKey::new("RU", "Russia"));
        assert!(only_russia.resolve("Russia").is_some());
        assert!(only_russia.resolve("China").is_none());
    }
}
