//! Country aggregation.
//!
//! This module turns flat indicator or actor records into a country-keyed
//! summary that every map overlay consumes. Aggregation is pure: all
//! location resolution is supplied by the caller.

use crate::analysis::country_index::CountryIndex;
use crate::models::{
    AggregationResult, CountryKey, CountrySummary, IndicatorRecord, UnmappedLocation,
};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Errors raised by the aggregator itself.
#[derive(Debug, Error, PartialEq)]
pub enum AggregateError {
    /// The records argument was not a sequence of flat objects.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Normalize a raw location string.
///
/// Non-breaking spaces become plain spaces, whitespace runs collapse to a
/// single space and the result is trimmed.
pub fn canonicalize_location(raw: &str) -> String {
    raw.replace('\u{00A0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Aggregate records by country.
///
/// `extract` returns the raw location signal for a record, or `None` when
/// the record has none. Records without a signal are skipped entirely;
/// records whose signal the index cannot resolve go to `unmapped`.
pub fn aggregate<'a, I, E, C>(records: I, extract: E, index: &C) -> AggregationResult
where
    I: IntoIterator<Item = &'a IndicatorRecord>,
    E: Fn(&IndicatorRecord) -> Option<String>,
    C: CountryIndex + ?Sized,
{
    let mut summaries: Vec<CountrySummary> = Vec::new();
    let mut positions: HashMap<CountryKey, usize> = HashMap::new();
    let mut unmapped = Vec::new();
    let mut skipped = 0usize;

    for record in records {
        let canonical = match extract(record) {
            Some(raw) => canonicalize_location(&raw),
            None => String::new(),
        };

        if canonical.is_empty() {
            skipped += 1;
            continue;
        }

        match index.resolve(&canonical) {
            Some(key) => match positions.get(&key).copied() {
                Some(pos) => {
                    let summary = &mut summaries[pos];
                    summary.count += 1;
                    summary.records.push(record.clone());
                }
                None => {
                    positions.insert(key.clone(), summaries.len());
                    summaries.push(CountrySummary {
                        key,
                        count: 1,
                        records: vec![record.clone()],
                        normalized_intensity: 0.0,
                    });
                }
            },
            None => unmapped.push(UnmappedLocation {
                location: canonical,
                record: record.clone(),
            }),
        }
    }

    // Empty summaries must not fault here
    let max_count = summaries.iter().map(|s| s.count).max().unwrap_or(0);
    for summary in &mut summaries {
        summary.normalized_intensity = if max_count > 0 {
            summary.count as f64 / max_count as f64
        } else {
            0.0
        };
    }

    debug!(
        "Aggregated {} countries, {} unmapped, {} skipped",
        summaries.len(),
        unmapped.len(),
        skipped
    );

    AggregationResult {
        summaries,
        unmapped,
    }
}

/// Aggregate records that arrive as untyped JSON.
///
/// The value must be an array of objects; anything else is rejected with
/// [`AggregateError::InvalidInput`] before any aggregation happens.
#[allow(dead_code)] // Entry point for callers holding raw JSON
pub fn aggregate_value<E, C>(
    records: &Value,
    extract: E,
    index: &C,
) -> Result<AggregationResult, AggregateError>
where
    E: Fn(&IndicatorRecord) -> Option<String>,
    C: CountryIndex + ?Sized,
{
    let records = records_from_value(records)?;
    Ok(aggregate(&records, extract, index))
}

/// Convert a JSON array of objects into records.
///
/// Strings are kept as-is, other scalars are stringified, `null` fields are
/// dropped and nested values keep their compact JSON text.
pub fn records_from_value(value: &Value) -> Result<Vec<IndicatorRecord>, AggregateError> {
    let items = value.as_array().ok_or_else(|| {
        AggregateError::InvalidInput(format!("expected an array of records, got {}", kind(value)))
    })?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| -> Result<IndicatorRecord, AggregateError> {
            let object = item.as_object().ok_or_else(|| {
                AggregateError::InvalidInput(format!(
                    "record {} is {}, expected an object",
                    i,
                    kind(item)
                ))
            })?;

            Ok(object
                .iter()
                .filter_map(|(field, v)| {
                    let text = match v {
                        Value::Null => return None,
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    Some((field.clone(), text))
                })
                .collect())
        })
        .collect()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Extractor that reads one named field.
pub fn field_extractor(field: &str) -> impl Fn(&IndicatorRecord) -> Option<String> + '_ {
    move |record: &IndicatorRecord| record.get(field).map(str::to_string)
}

/// Resolved IP address -> country code lookup.
///
/// Only successful resolutions are stored, so a failed lookup reads as
/// "no signal". Country names reported by the service are kept per code.
#[derive(Debug, Clone, Default)]
pub struct GeoLookup {
    codes: HashMap<String, String>,
    names: HashMap<String, String>,
}

impl GeoLookup {
    /// Build the lookup from geolocation outcomes.
    pub fn from_locations(locations: &[crate::models::GeoLocation]) -> Self {
        let mut lookup = Self::default();

        for loc in locations.iter().filter(|loc| loc.success) {
            let Some(code) = loc.country_code.as_deref().map(str::trim) else {
                continue;
            };
            let code = code.to_ascii_uppercase();
            if let Some(name) = loc.country_name.as_deref().map(str::trim) {
                if !name.is_empty() {
                    lookup.names.entry(code.clone()).or_insert_with(|| name.to_string());
                }
            }
            lookup.codes.insert(loc.ip.trim().to_string(), code);
        }

        lookup
    }

    /// Country code for an IP, if it was resolved.
    pub fn code_for(&self, ip: &str) -> Option<&str> {
        self.codes.get(ip.trim()).map(String::as_str)
    }

    /// Name the service reported for a country code, if any.
    pub fn country_name(&self, code: &str) -> Option<&str> {
        self.names
            .get(&code.trim().to_ascii_uppercase())
            .map(String::as_str)
    }

    /// Number of resolved addresses.
    pub fn len(&self) -> usize {
        self.codes.len()
    }
}

/// Extractor that maps a record's IP field to its resolved country code.
pub fn resolved_ip_extractor<'a>(
    field: &'a str,
    lookup: &'a GeoLookup,
) -> impl Fn(&IndicatorRecord) -> Option<String> + 'a {
    move |record: &IndicatorRecord| {
        record
            .get(field)
            .and_then(|ip| lookup.code_for(ip))
            .map(str::to_string)
    }
}
