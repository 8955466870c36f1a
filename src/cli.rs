//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::{DisplayMode, OverlayKind};
use clap::Parser;
use std::path::PathBuf;

/// Threatmap - country-level threat intelligence overlays
///
/// Aggregates threat actor profiles and threat intel IP indicators by
/// country and writes the per-country summaries that map overlays render.
///
/// Examples:
///   threatmap --actors data/threat-actors.tsv
///   threatmap --overlay intel --indicators-url https://example.net/api/threatIntel
///   threatmap --overlay actors --overlay intel --indicators feed.json --format json
///   threatmap --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Threat actor TSV file
    ///
    /// Overrides dataset.actors_path from the config file.
    #[arg(short, long, value_name = "FILE")]
    pub actors: Option<PathBuf>,

    /// Threat intel indicators JSON file
    #[arg(short, long, value_name = "FILE", conflicts_with = "indicators_url")]
    pub indicators: Option<PathBuf>,

    /// Threat intel API URL returning {"indicators": [...]}
    #[arg(long, value_name = "URL")]
    pub indicators_url: Option<String>,

    /// Overlays to build (repeatable)
    #[arg(long, value_name = "OVERLAY", default_values_t = vec![OverlayArg::Actors])]
    pub overlay: Vec<OverlayArg>,

    /// Display mode the overlays are prepared for
    #[arg(long, default_value = "heatmap", value_name = "MODE")]
    pub mode: ModeArg,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .threatmap.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Maps subscription key for IP geolocation
    #[arg(long, value_name = "KEY", env = "THREATMAP_MAPS_KEY", hide_env_values = true)]
    pub maps_key: Option<String>,

    /// Geolocation requests per concurrent batch
    #[arg(long, value_name = "NUM")]
    pub batch_size: Option<usize>,

    /// Per-request geolocation timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Exit with code 2 if any location could not be mapped to a country
    #[arg(long)]
    pub fail_on_unmapped: bool,

    /// Generate a default .threatmap.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Overlay selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OverlayArg {
    /// Threat actors by country of origin
    Actors,
    /// Threat intel IPs by geolocated country
    Intel,
}

impl std::fmt::Display for OverlayArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverlayArg::Actors => write!(f, "actors"),
            OverlayArg::Intel => write!(f, "intel"),
        }
    }
}

impl From<OverlayArg> for OverlayKind {
    fn from(arg: OverlayArg) -> Self {
        match arg {
            OverlayArg::Actors => OverlayKind::ThreatActors,
            OverlayArg::Intel => OverlayKind::ThreatIntel,
        }
    }
}

/// Display mode selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ModeArg {
    /// Weighted point per country
    #[default]
    Heatmap,
    /// Shaded country polygons
    Country,
}

impl From<ModeArg> for DisplayMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Heatmap => DisplayMode::Heatmap,
            ModeArg::Country => DisplayMode::Country,
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref url) = self.indicators_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Indicators URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.batch_size == Some(0) {
            return Err("Batch size must be at least 1".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if let Some(ref actors) = self.actors {
            if !actors.is_file() {
                return Err(format!("Actor dataset not found: {}", actors.display()));
            }
        }

        if let Some(ref indicators) = self.indicators {
            if !indicators.is_file() {
                return Err(format!(
                    "Indicators file not found: {}",
                    indicators.display()
                ));
            }
        }

        Ok(())
    }

    /// Overlays requested, deduplicated, in command-line order.
    pub fn overlays(&self) -> Vec<OverlayKind> {
        let mut kinds: Vec<OverlayKind> = Vec::new();
        for arg in &self.overlay {
            let kind = OverlayKind::from(*arg);
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        kinds
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
