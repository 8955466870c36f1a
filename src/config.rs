//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.threatmap.toml` files.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = ".threatmap.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Dataset locations and field names.
    #[serde(default)]
    pub dataset: DatasetConfig,

    /// IP geolocation settings.
    #[serde(default)]
    pub geolocation: GeolocationConfig,

    /// Country lookup extensions.
    #[serde(default)]
    pub countries: CountriesConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
        }
    }
}

fn default_output() -> String {
    "threatmap_report.md".to_string()
}

/// Where the datasets live and which fields carry the location signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Threat actor TSV file.
    #[serde(default = "default_actors_path")]
    pub actors_path: String,

    /// Column holding the actor's country.
    #[serde(default = "default_location_field")]
    pub location_field: String,

    /// Fields used to label records in reports, first non-empty wins.
    #[serde(default = "default_label_fields")]
    pub label_fields: Vec<String>,

    /// Threat intel feed URL (empty to disable).
    #[serde(default)]
    pub indicators_url: String,

    /// Local threat intel JSON file (empty to disable).
    #[serde(default)]
    pub indicators_path: String,

    /// Indicator field holding the IP address.
    #[serde(default = "default_observable_field")]
    pub observable_field: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            actors_path: default_actors_path(),
            location_field: default_location_field(),
            label_fields: default_label_fields(),
            indicators_url: String::new(),
            indicators_path: String::new(),
            observable_field: default_observable_field(),
        }
    }
}

fn default_actors_path() -> String {
    "data/threat-actors.tsv".to_string()
}

fn default_location_field() -> String {
    "Location".to_string()
}

fn default_label_fields() -> Vec<String> {
    vec!["Name".to_string(), "ObservableValue".to_string()]
}

fn default_observable_field() -> String {
    "ObservableValue".to_string()
}

/// IP geolocation service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeolocationConfig {
    /// Maps service base URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Geolocation API version.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Requests issued concurrently per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Subscription key. Prefer THREATMAP_MAPS_KEY over committing it.
    #[serde(default)]
    pub subscription_key: String,
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_version: default_api_version(),
            batch_size: default_batch_size(),
            timeout_seconds: default_timeout(),
            subscription_key: String::new(),
        }
    }
}

fn default_endpoint() -> String {
    "https://atlas.microsoft.com".to_string()
}

fn default_api_version() -> String {
    "1.0".to_string()
}

fn default_batch_size() -> usize {
    50
}

fn default_timeout() -> u64 {
    5
}

/// Extra country spellings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountriesConfig {
    /// Alias -> ISO alpha-2 code.
    #[serde(default)]
    pub synonyms: BTreeMap<String, String>,
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// List the records behind each country.
    #[serde(default = "default_true")]
    pub include_records: bool,

    /// Include the unmapped locations section.
    #[serde(default = "default_true")]
    pub include_unmapped: bool,

    /// Maximum records listed per country.
    #[serde(default = "default_max_records")]
    pub max_records_per_country: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            include_records: true,
            include_unmapped: true,
            max_records_per_country: default_max_records(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_records() -> usize {
    25
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were actually given.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if let Some(ref actors) = args.actors {
            self.dataset.actors_path = actors.display().to_string();
        }
        if let Some(ref indicators) = args.indicators {
            self.dataset.indicators_path = indicators.display().to_string();
        }
        if let Some(ref url) = args.indicators_url {
            self.dataset.indicators_url = url.clone();
        }
        if let Some(ref key) = args.maps_key {
            self.geolocation.subscription_key = key.clone();
        }
        if let Some(batch_size) = args.batch_size {
            self.geolocation.batch_size = batch_size;
        }
        if let Some(timeout) = args.timeout {
            self.geolocation.timeout_seconds = timeout;
        }
    }

    /// Reject settings that cannot work, whether they came from the file or
    /// the command line.
    pub fn validate(&self) -> Result<()> {
        if self.geolocation.batch_size == 0 {
            bail!("geolocation.batch_size must be at least 1");
        }
        if self.geolocation.timeout_seconds == 0 {
            bail!("geolocation.timeout_seconds must be at least 1");
        }
        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.dataset.location_field, "Location");
        assert_eq!(config.geolocation.batch_size, 50);
        assert_eq!(config.geolocation.timeout_seconds, 5);
        assert!(config.countries.synonyms.is_empty());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "custom_report.md"

[dataset]
actors_path = "actors.tsv"
location_field = "Country"

[geolocation]
batch_size = 10

[countries.synonyms]
"Republic of Korea" = "KR"
Persia = "IR"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, "custom_report.md");
        assert_eq!(config.dataset.actors_path, "actors.tsv");
        assert_eq!(config.dataset.location_field, "Country");
        assert_eq!(config.dataset.observable_field, "ObservableValue");
        assert_eq!(config.geolocation.batch_size, 10);
        assert_eq!(config.geolocation.timeout_seconds, 5);
        assert_eq!(
            config.countries.synonyms.get("Persia").map(String::as_str),
            Some("IR")
        );
        assert!(config.report.include_unmapped);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[dataset]"));
        assert!(toml_str.contains("[geolocation]"));

        let reparsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(reparsed.geolocation.batch_size, 50);
    }

    #[test]
    fn test_validate_rejects_zero_values_from_file() {
        let config: Config = toml::from_str("[geolocation]\ntimeout_seconds = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("timeout_seconds"));

        let config: Config = toml::from_str("[geolocation]\nbatch_size = 0\n").unwrap();
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[report]\ninclude_records = false\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert!(!config.report.include_records);
        assert_eq!(config.report.max_records_per_country, 25);
    }
}
