//! Threatmap - country-level threat intelligence overlays
//!
//! A CLI tool that loads threat actor profiles and threat intel IP
//! indicators, resolves each record to a country and writes the
//! per-country summaries that the map overlays render.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (config, dataset, feed failure, etc.)
//!   2 - Unmapped locations found with --fail-on-unmapped

mod analysis;
mod cli;
mod config;
mod dataset;
mod geolocate;
mod models;
mod overlay;
mod report;

use analysis::{
    aggregate, field_extractor, resolved_ip_extractor, GeoLookup, IsoCodeIndex, StaticCountryIndex,
};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE};
use geolocate::{GeolocatorConfig, IpGeolocator};
use models::{
    AggregationResult, DisplayMode, IndicatorRecord, MapReport, OverlayKind, OverlayReport,
    ReportMetadata,
};
use overlay::{OverlayState, ToggleOutcome};
use report::ReportOptions;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("Threatmap v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .threatmap.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to set dataset paths, the threat intel feed and country synonyms.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Records loaded for one overlay, with resolution already done.
struct PreparedOverlay {
    source: String,
    records: Vec<IndicatorRecord>,
    /// Present for IP overlays once geolocation has finished.
    lookup: Option<GeoLookup>,
}

/// Run the complete workflow. Returns exit code (0 or 2).
async fn run(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate()?;

    let index = StaticCountryIndex::with_synonyms(&config.countries.synonyms)
        .context("Invalid [countries.synonyms] entry")?;
    debug!("Country index knows {} countries", index.country_count());

    let mode = DisplayMode::from(args.mode);
    let kinds = args.overlays();
    let mut state = OverlayState::new();
    let mut sources = Vec::new();
    let mut totals = Vec::new();

    // Step 1: load and resolve each overlay's records, then aggregate
    for &kind in &kinds {
        println!("📥 Loading {} data...", kind);
        let prepared = prepare_overlay(kind, &config, args.quiet).await?;
        sources.push(prepared.source.clone());

        let location_field = config.dataset.location_field.as_str();
        let observable_field = config.dataset.observable_field.as_str();
        let outcome = state.toggle(kind, true, mode, || -> Result<AggregationResult> {
            Ok(match prepared.lookup {
                Some(ref lookup) => aggregate(
                    &prepared.records,
                    resolved_ip_extractor(observable_field, lookup),
                    &IsoCodeIndex::new(&index, lookup),
                ),
                None => aggregate(&prepared.records, field_extractor(location_field), &index),
            })
        })?;

        if outcome == ToggleOutcome::Enabled {
            println!("   {} records aggregated", prepared.records.len());
        }
        totals.push((kind, prepared.records.len()));
    }

    // Step 2: build the report from the overlay state
    println!("\n📝 Generating report...");

    let overlays: Vec<OverlayReport> = totals
        .into_iter()
        .filter_map(|(kind, total_records)| {
            state.take(kind).map(|active| {
                let resolved = active.result.mapped_count() + active.result.unmapped.len();
                OverlayReport {
                    kind,
                    mode: active.mode,
                    total_records,
                    skipped_records: total_records.saturating_sub(resolved),
                    result: active.result,
                }
            })
        })
        .collect();

    let report = MapReport {
        metadata: ReportMetadata {
            generated_at: Utc::now(),
            sources,
            duration_seconds: start_time.elapsed().as_secs_f64(),
        },
        overlays,
    };

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => {
            let options =
                ReportOptions::from_config(&config.report, &config.dataset.label_fields);
            report::generate_markdown_report(&report, &options)
        }
    };

    let output_path = PathBuf::from(&config.general.output);
    report::save_report(&output, &output_path)?;

    // Print summary
    println!("\n📊 Overlay Summary:");
    for overlay in &report.overlays {
        let top = overlay
            .result
            .sorted_by_count()
            .first()
            .map(|s| format!("{} ({})", s.key.name, s.count))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "   {}: {} countries | {} mapped | {} unmapped | top: {}",
            overlay.kind,
            overlay.result.summaries.len(),
            overlay.result.mapped_count(),
            overlay.result.unmapped.len(),
            top
        );
    }
    println!(
        "\n✅ Done in {:.1}s. Report saved to: {}",
        report.metadata.duration_seconds,
        output_path.display()
    );

    let unmapped = report.unmapped_total();
    if unmapped > 0 {
        warn!("{} records had locations with no country mapping", unmapped);
        if args.fail_on_unmapped {
            eprintln!(
                "\n⛔ {} unmapped locations found. Failing (exit code 2).",
                unmapped
            );
            return Ok(2);
        }
    }

    Ok(0)
}

/// Load an overlay's records and, for IP overlays, geolocate them.
async fn prepare_overlay(kind: OverlayKind, config: &Config, quiet: bool) -> Result<PreparedOverlay> {
    match kind {
        OverlayKind::ThreatActors => {
            let path = Path::new(&config.dataset.actors_path);
            let records = dataset::load_actor_tsv(path)
                .with_context(|| format!("Could not load {}", path.display()))?;
            Ok(PreparedOverlay {
                source: path.display().to_string(),
                records,
                lookup: None,
            })
        }
        OverlayKind::ThreatIntel => {
            let (source, records) = load_indicator_records(config).await?;

            let ips = dataset::unique_ips(&records, &config.dataset.observable_field);
            if ips.is_empty() {
                warn!("No valid IP addresses found in indicators");
                return Ok(PreparedOverlay {
                    source,
                    records,
                    lookup: Some(GeoLookup::default()),
                });
            }

            if config.geolocation.subscription_key.is_empty() {
                bail!("IP geolocation needs a maps subscription key (--maps-key or THREATMAP_MAPS_KEY)");
            }

            println!("🌍 Geolocating {} unique IP addresses...", ips.len());
            let geolocator = IpGeolocator::new(GeolocatorConfig {
                endpoint: config.geolocation.endpoint.clone(),
                api_version: config.geolocation.api_version.clone(),
                subscription_key: config.geolocation.subscription_key.clone(),
                batch_size: config.geolocation.batch_size,
                timeout_seconds: config.geolocation.timeout_seconds,
                show_progress: !quiet,
            })?;
            let locations = geolocator.geolocate_all(&ips).await;
            let lookup = GeoLookup::from_locations(&locations);

            if lookup.len() < ips.len() {
                warn!(
                    "{} of {} IP addresses could not be geolocated",
                    ips.len() - lookup.len(),
                    ips.len()
                );
            }

            Ok(PreparedOverlay {
                source,
                records,
                lookup: Some(lookup),
            })
        }
    }
}

/// Load threat intel indicators from the configured file or feed.
async fn load_indicator_records(config: &Config) -> Result<(String, Vec<IndicatorRecord>)> {
    if !config.dataset.indicators_path.is_empty() {
        let path = Path::new(&config.dataset.indicators_path);
        let records = dataset::load_indicators(path)
            .with_context(|| format!("Could not load {}", path.display()))?;
        return Ok((path.display().to_string(), records));
    }

    if !config.dataset.indicators_url.is_empty() {
        let url = config.dataset.indicators_url.as_str();
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        let records = dataset::fetch_indicators(&client, url)
            .await
            .with_context(|| format!("Failed to fetch threat intel from {}", url))?;
        return Ok((url.to_string(), records));
    }

    bail!("No threat intel source configured (use --indicators or --indicators-url)")
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
