//! Markdown and JSON report generation.
//!
//! This module renders the per-country aggregation results of each
//! enabled overlay into a report file.

use crate::models::{CountrySummary, MapReport, OverlayReport, ReportMetadata};
use anyhow::{Context, Result};
use std::path::Path;

/// Options controlling report content.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    /// List the records behind each country.
    pub include_records: bool,
    /// Include the unmapped locations section.
    pub include_unmapped: bool,
    /// Maximum records listed per country.
    pub max_records_per_country: usize,
    /// Fields used to label a record, first non-empty wins.
    pub label_fields: Vec<String>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            include_records: true,
            include_unmapped: true,
            max_records_per_country: 25,
            label_fields: vec!["Name".to_string(), "ObservableValue".to_string()],
        }
    }
}

impl ReportOptions {
    pub fn from_config(report: &crate::config::ReportConfig, label_fields: &[String]) -> Self {
        Self {
            include_records: report.include_records,
            include_unmapped: report.include_unmapped,
            max_records_per_country: report.max_records_per_country,
            label_fields: label_fields.to_vec(),
        }
    }
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &MapReport, options: &ReportOptions) -> String {
    let mut output = String::new();

    output.push_str("# Threat Map Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));

    if report.overlays.is_empty() {
        output.push_str("No overlays were enabled.\n\n");
    }

    for overlay in &report.overlays {
        output.push_str(&generate_overlay_section(overlay, options));
    }

    output.push_str(&generate_footer());
    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    for source in &metadata.sources {
        section.push_str(&format!("- **Source:** {}\n", source));
    }
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// Generate the section for one overlay.
fn generate_overlay_section(overlay: &OverlayReport, options: &ReportOptions) -> String {
    let mut section = String::new();
    let result = &overlay.result;

    section.push_str(&format!("## {} ({})\n\n", overlay.kind, overlay.mode));
    section.push_str(&format!(
        "*Records: {} | Countries: {} | Mapped: {} | Unmapped: {} | No location: {}*\n\n",
        overlay.total_records,
        result.summaries.len(),
        result.mapped_count(),
        result.unmapped.len(),
        overlay.skipped_records
    ));

    if result.summaries.is_empty() {
        section.push_str("No records could be placed on the map.\n\n");
    } else {
        section.push_str(&generate_country_table(&result.sorted_by_count()));

        if options.include_records {
            for summary in result.sorted_by_count() {
                section.push_str(&generate_country_records(summary, options));
            }
        }
    }

    if options.include_unmapped && !result.unmapped.is_empty() {
        section.push_str("### Unmapped Locations\n\n");
        section.push_str("| Location | Records |\n");
        section.push_str("|:---|:---:|\n");
        for (location, count) in result.unmapped_counts() {
            section.push_str(&format!("| {} | {} |\n", escape_cell(&location), count));
        }
        section.push('\n');
    }

    section
}

/// Generate the country table, already sorted for display.
fn generate_country_table(summaries: &[&CountrySummary]) -> String {
    let mut table = String::new();

    table.push_str("| # | Country | Code | Count | Intensity |\n");
    table.push_str("|:---:|:---|:---:|:---:|:---:|\n");
    for (rank, summary) in summaries.iter().enumerate() {
        table.push_str(&format!(
            "| {} | {} | {} | {} | {:.2} |\n",
            rank + 1,
            escape_cell(&summary.key.name),
            escape_cell(&summary.key.code),
            summary.count,
            summary.normalized_intensity
        ));
    }
    table.push('\n');

    table
}

/// Make text safe for a Markdown table cell.
fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}

/// Generate the record listing for one country.
fn generate_country_records(summary: &CountrySummary, options: &ReportOptions) -> String {
    let mut block = String::new();

    block.push_str(&format!("### {} ({})\n\n", summary.key.name, summary.count));

    for record in summary.records.iter().take(options.max_records_per_country) {
        let label = record.first_of(&options.label_fields).unwrap_or("(unnamed)");
        block.push_str(&format!("- {}\n", label));
    }

    let hidden = summary
        .records
        .len()
        .saturating_sub(options.max_records_per_country);
    if hidden > 0 {
        block.push_str(&format!("- *... and {} more*\n", hidden));
    }
    block.push('\n');

    block
}

/// Generate the report footer.
fn generate_footer() -> String {
    "---\n\n*Report generated by threatmap*\n".to_string()
}

/// Generate a JSON report.
pub fn generate_json_report(report: &MapReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write rendered report content to a file.
pub fn save_report(content: &str, path: &Path) -> Result<()> {
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}
