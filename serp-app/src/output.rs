//! Result and query-log writers.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serp_scrape::export::{ad_rows, ai_overview_rows, organic_rows, paa_rows, related_rows};
use serp_scrape::{QueryLogEntry, UnifiedItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Unified items as one JSON array.
    Json,
    /// One organic row per line.
    Jsonl,
    /// Organic rows with a header line.
    Csv,
}

impl OutputFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("json") => Ok(OutputFormat::Json),
            Some("jsonl") | Some("ndjson") => Ok(OutputFormat::Jsonl),
            Some("csv") => Ok(OutputFormat::Csv),
            other => bail!(
                "unsupported output extension {:?} for {} (use .json, .jsonl or .csv)",
                other.unwrap_or(""),
                path.display()
            ),
        }
    }
}

/// Write `items` to `path` and return the number of rows/items written.
///
/// Row formats put side categories (People Also Ask, related searches, ads,
/// AI overview) in sibling files such as `results.paa.csv`, written only when
/// the category has rows.
pub fn write_results(path: &Path, items: &[UnifiedItem], fetched_at: DateTime<Utc>) -> Result<usize> {
    let format = OutputFormat::from_path(path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    if format == OutputFormat::Json {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, items)?;
        out.write_all(b"\n")?;
        out.flush()?;
        return Ok(items.len());
    }

    let written = write_rows(path, format, &organic_rows(items, fetched_at))?;
    write_side_rows(path, format, "paa", &paa_rows(items, fetched_at))?;
    write_side_rows(path, format, "related", &related_rows(items, fetched_at))?;
    write_side_rows(path, format, "ads", &ad_rows(items, fetched_at))?;
    write_side_rows(path, format, "ai_overview", &ai_overview_rows(items, fetched_at))?;
    Ok(written)
}

/// `results.csv` + `paa` gives `results.paa.csv`.
fn sibling_path(path: &Path, category: &str) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("results");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    path.with_file_name(format!("{stem}.{category}.{ext}"))
}

fn write_side_rows<T: Serialize>(path: &Path, format: OutputFormat, category: &str, rows: &[T]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let side = sibling_path(path, category);
    let written = write_rows(&side, format, rows)?;
    tracing::info!(action = "write_results", category, rows = written, path = %side.display(), "side rows written");
    Ok(())
}

fn write_rows<T: Serialize>(path: &Path, format: OutputFormat, rows: &[T]) -> Result<usize> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    match format {
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(&mut out);
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        OutputFormat::Jsonl | OutputFormat::Json => {
            for row in rows {
                serde_json::to_writer(&mut out, row)?;
                out.write_all(b"\n")?;
            }
        }
    }
    out.flush()?;
    Ok(rows.len())
}

/// Append entries to the JSON-lines query log.
pub fn append_query_log(path: &Path, entries: &[QueryLogEntry]) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening query log {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for entry in entries {
        serde_json::to_writer(&mut out, entry)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}
