//! Dataset loading.
//!
//! Threat actor profiles come from a tab-separated file with a header row;
//! threat intel indicators come from a JSON feed, either fetched over HTTP
//! or read from disk.

use crate::analysis::{records_from_value, AggregateError};
use crate::models::IndicatorRecord;
use serde_json::Value;
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised while loading a dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed TSV: {0}")]
    Tsv(#[from] csv::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("threat intel API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected dataset shape: {0}")]
    Shape(String),
}

impl From<AggregateError> for DatasetError {
    fn from(err: AggregateError) -> Self {
        match err {
            AggregateError::InvalidInput(msg) => DatasetError::Shape(msg),
        }
    }
}

/// Load threat actor rows from a TSV file.
pub fn load_actor_tsv(path: &Path) -> Result<Vec<IndicatorRecord>, DatasetError> {
    let text = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let rows = parse_actor_tsv(&text)?;
    info!("Loaded {} threat actor rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// Parse tab-separated text with a header row.
///
/// Header names and values are trimmed; short rows are padded with empty
/// strings and blank lines are ignored.
pub fn parse_actor_tsv(text: &str) -> Result<Vec<IndicatorRecord>, DatasetError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_owned())
        .collect();

    if headers.iter().all(String::is_empty) {
        return Ok(Vec::new());
    }

    let mut rows = Vec::new();
    for result in reader.records() {
        let row = result?;
        if row.iter().all(|v| v.trim().is_empty()) {
            continue;
        }

        let record: IndicatorRecord = headers
            .iter()
            .enumerate()
            .map(|(i, header)| (header.clone(), row.get(i).unwrap_or("").trim().to_owned()))
            .collect();
        rows.push(record);
    }

    debug!("Parsed {} TSV rows with {} columns", rows.len(), headers.len());
    Ok(rows)
}

/// Parse a threat intel indicator payload.
///
/// Accepts the API envelope `{"indicators": [...]}` or a bare array.
pub fn parse_indicators_json(text: &str) -> Result<Vec<IndicatorRecord>, DatasetError> {
    let value: Value = serde_json::from_str(text)?;

    let items = match &value {
        Value::Array(_) => &value,
        Value::Object(map) => match map.get("indicators") {
            Some(items) => items,
            None => {
                return Err(DatasetError::Shape(
                    "object has no 'indicators' field".to_string(),
                ))
            }
        },
        _ => {
            return Err(DatasetError::Shape(
                "expected an indicator array or envelope object".to_string(),
            ))
        }
    };

    if let Some(message) = value.get("message").and_then(Value::as_str) {
        debug!("Indicator feed message: {}", message);
    }

    Ok(records_from_value(items)?)
}

/// Load indicators from a local JSON file.
pub fn load_indicators(path: &Path) -> Result<Vec<IndicatorRecord>, DatasetError> {
    let text = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let indicators = parse_indicators_json(&text)?;
    info!("Loaded {} indicators from {}", indicators.len(), path.display());
    Ok(indicators)
}

/// Fetch indicators from the threat intel endpoint.
pub async fn fetch_indicators(
    client: &reqwest::Client,
    url: &str,
) -> Result<Vec<IndicatorRecord>, DatasetError> {
    info!("Fetching threat intel indicators from {}", url);

    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(DatasetError::Status { status, body });
    }

    let text = response.text().await?;
    let indicators = parse_indicators_json(&text)?;
    if indicators.is_empty() {
        warn!("No threat intelligence indicators returned");
    }
    Ok(indicators)
}

/// Check whether a string is a syntactically valid IPv4 or IPv6 address.
pub fn is_valid_ip(candidate: &str) -> bool {
    candidate.trim().parse::<IpAddr>().is_ok()
}

/// Unique valid IP addresses from a field, in first-seen order.
pub fn unique_ips(records: &[IndicatorRecord], field: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ips = Vec::new();
    let mut invalid = 0usize;

    for value in records.iter().filter_map(|r| r.get(field)) {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        if !is_valid_ip(value) {
            invalid += 1;
            continue;
        }
        if seen.insert(value.to_string()) {
            ips.push(value.to_string());
        }
    }

    if invalid > 0 {
        debug!("Skipped {} non-IP observable values", invalid);
    }

    ips
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_actor_tsv() {
        let text = "Name\tLocation\tMotivation\r\nAPT28\tRussia\tEspionage\r\nLazarus\tNorth Korea\r\n\r\n";
        let rows = parse_actor_tsv(text).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("Name"), Some("APT28"));
        assert_eq!(rows[0].get("Location"), Some("Russia"));
        assert_eq!(rows[1].get("Location"), Some("North Korea"));
        assert_eq!(rows[1].get("Motivation"), Some(""));
    }

    #[test]
    fn test_parse_actor_tsv_keeps_quotes() {
        let text = "Name\tDescription\nAPT1\t\"Comment Crew\" group\n";
        let rows = parse_actor_tsv(text).unwrap();
        assert_eq!(rows[0].get("Description"), Some("\"Comment Crew\" group"));
    }

    #[test]
    fn test_parse_empty_tsv() {
        assert!(parse_actor_tsv("").unwrap().is_empty());
    }

    #[test]
    fn test_load_actor_tsv() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, " Name \t Location ").unwrap();
        writeln!(file, "Sandworm\t Russia ").unwrap();

        let rows = load_actor_tsv(file.path()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("Location"), Some("Russia"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_actor_tsv(Path::new("/definitely/not/here.tsv")).unwrap_err();
        assert!(matches!(err, DatasetError::Io { .. }));
    }

    #[test]
    fn test_parse_indicator_envelope() {
        let text = r#"{"indicators": [{"ObservableValue": "8.8.8.8", "Confidence": 90}], "count": 1}"#;
        let indicators = parse_indicators_json(text).unwrap();

        assert_eq!(indicators.len(), 1);
        assert_eq!(indicators[0].get("ObservableValue"), Some("8.8.8.8"));
        assert_eq!(indicators[0].get("Confidence"), Some("90"));
    }

    #[test]
    fn test_parse_indicator_array() {
        let indicators = parse_indicators_json(r#"[{"ObservableValue": "1.1.1.1"}]"#).unwrap();
        assert_eq!(indicators.len(), 1);
    }

    #[test]
    fn test_parse_indicator_bad_shape() {
        assert!(matches!(
            parse_indicators_json(r#"{"count": 0}"#),
            Err(DatasetError::Shape(_))
        ));
        assert!(matches!(
            parse_indicators_json(r#""nope""#),
            Err(DatasetError::Shape(_))
        ));
        assert!(matches!(
            parse_indicators_json(r#"{"indicators": [1, 2]}"#),
            Err(DatasetError::Shape(_))
        ));
        assert!(matches!(
            parse_indicators_json("{"),
            Err(DatasetError::Json(_))
        ));
    }

    #[test]
    fn test_is_valid_ip() {
        assert!(is_valid_ip("192.168.1.1"));
        assert!(is_valid_ip("2001:db8::1"));
        assert!(!is_valid_ip("evil.example.com"));
        assert!(!is_valid_ip("999.1.1.1"));
        assert!(!is_valid_ip(""));
    }

    #[test]
    fn test_unique_ips() {
        let record = |v: &str| -> IndicatorRecord { [("ObservableValue", v)].into_iter().collect() };
        let records = vec![
            record("1.1.1.1"),
            record("example.com"),
            record(" 1.1.1.1 "),
            record("2.2.2.2"),
            IndicatorRecord::new(),
        ];

        assert_eq!(
            unique_ips(&records, "ObservableValue"),
            vec!["1.1.1.1".to_string(), "2.2.2.2".to_string()]
        );
    }
}
