//! Data models for the threat map.
//!
//! This module contains the core data structures shared by the dataset
//! loaders, the country aggregator, the geolocation client and the report
//! generator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single flat indicator or threat actor record.
///
/// Field values are kept verbatim; only the field chosen as the location
/// signal is ever interpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndicatorRecord {
    fields: BTreeMap<String, String>,
}

impl IndicatorRecord {
    /// Creates an empty record.
    #[allow(dead_code)] // Used by tests
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of a field, if present.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// Sets a field, replacing any previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Returns the first non-empty value among the given fields.
    pub fn first_of<'a>(&'a self, fields: &[String]) -> Option<&'a str> {
        fields
            .iter()
            .filter_map(|f| self.get(f))
            .map(str::trim)
            .find(|v| !v.is_empty())
    }
}

impl<K, V> FromIterator<(K, V)> for IndicatorRecord
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Normalized country identity.
///
/// Two keys are equal when their ISO 3166-1 alpha-2 codes match, whatever
/// spelling they were resolved from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountryKey {
    /// ISO 3166-1 alpha-2 code, upper case.
    pub code: String,
    /// Display name.
    pub name: String,
}

impl CountryKey {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into().to_ascii_uppercase(),
            name: name.into(),
        }
    }
}

impl PartialEq for CountryKey {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl Eq for CountryKey {}

impl Hash for CountryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code.hash(state);
    }
}

impl fmt::Display for CountryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.code)
    }
}

/// Per-country aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountrySummary {
    /// Country identity.
    pub key: CountryKey,
    /// Number of records that resolved to this country (always >= 1).
    pub count: usize,
    /// Records in input order.
    pub records: Vec<IndicatorRecord>,
    /// `count / max count` across all summaries, in `[0, 1]`.
    pub normalized_intensity: f64,
}

/// A record whose location could not be mapped to a country.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmappedLocation {
    /// The canonicalized location string.
    pub location: String,
    /// The record it came from.
    pub record: IndicatorRecord,
}

/// Output of one aggregation call.
///
/// Summaries keep the order in which each country was first seen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    /// Per-country summaries in first-seen order.
    pub summaries: Vec<CountrySummary>,
    /// Locations with no country mapping, in input order.
    pub unmapped: Vec<UnmappedLocation>,
}

impl AggregationResult {
    /// Look up the summary for a country.
    #[allow(dead_code)] // Lookup utility for rendering surfaces
    pub fn get(&self, key: &CountryKey) -> Option<&CountrySummary> {
        self.summaries.iter().find(|s| &s.key == key)
    }

    /// Look up a summary by alpha-2 code.
    #[allow(dead_code)] // Lookup utility for rendering surfaces
    pub fn get_by_code(&self, code: &str) -> Option<&CountrySummary> {
        self.summaries
            .iter()
            .find(|s| s.key.code.eq_ignore_ascii_case(code))
    }

    /// Total number of records that resolved to a country.
    pub fn mapped_count(&self) -> usize {
        self.summaries.iter().map(|s| s.count).sum()
    }

    /// Whether nothing was aggregated at all.
    #[allow(dead_code)] // Utility for callers
    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty() && self.unmapped.is_empty()
    }

    /// Summaries sorted by descending count for display.
    ///
    /// Ties keep first-seen order.
    pub fn sorted_by_count(&self) -> Vec<&CountrySummary> {
        let mut sorted: Vec<&CountrySummary> = self.summaries.iter().collect();
        sorted.sort_by_key(|s| std::cmp::Reverse(s.count));
        sorted
    }

    /// Distinct unmapped locations with how often each occurred,
    /// most frequent first.
    pub fn unmapped_counts(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for entry in &self.unmapped {
            match counts.iter_mut().find(|(loc, _)| *loc == entry.location) {
                Some((_, n)) => *n += 1,
                None => counts.push((entry.location.clone(), 1)),
            }
        }
        counts.sort_by_key(|(_, n)| std::cmp::Reverse(*n));
        counts
    }
}

/// Outcome of geolocating one IP address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoLocation {
    pub ip: String,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GeoLocation {
    /// A successful resolution.
    pub fn resolved(ip: impl Into<String>, code: String, name: Option<String>) -> Self {
        Self {
            ip: ip.into(),
            country_code: Some(code),
            country_name: name,
            success: true,
            error: None,
        }
    }

    /// An explicit "could not resolve" outcome.
    pub fn unresolved(ip: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            country_code: None,
            country_name: None,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Which overlay a result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayKind {
    /// Threat actor profiles aggregated by country of origin.
    ThreatActors,
    /// Threat intel IP indicators aggregated by geolocated country.
    ThreatIntel,
}

impl fmt::Display for OverlayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlayKind::ThreatActors => write!(f, "Threat Actors"),
            OverlayKind::ThreatIntel => write!(f, "Threat Intel IPs"),
        }
    }
}

/// How the rendering surface should present an overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// One weighted point per country.
    #[default]
    Heatmap,
    /// Country polygons shaded by intensity.
    Country,
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayMode::Heatmap => write!(f, "heatmap"),
            DisplayMode::Country => write!(f, "country"),
        }
    }
}

/// One overlay's section of the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayReport {
    pub kind: OverlayKind,
    pub mode: DisplayMode,
    /// Records fed into the aggregator.
    pub total_records: usize,
    /// Records that carried no usable location signal.
    pub skipped_records: usize,
    pub result: AggregationResult,
}

/// Metadata about a report run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Human-readable list of the dataset sources used.
    pub sources: Vec<String>,
    /// Wall-clock duration of the run in seconds.
    pub duration_seconds: f64,
}

/// The complete map report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapReport {
    pub metadata: ReportMetadata,
    pub overlays: Vec<OverlayReport>,
}

impl MapReport {
    /// Total unmapped entries across all overlays.
    pub fn unmapped_total(&self) -> usize {
        self.overlays.iter().map(|o| o.result.unmapped.len()).sum()
    }
}
