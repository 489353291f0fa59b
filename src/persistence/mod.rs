//! CSV Persistence Module
//!
//! Reads raw market exports, writes the filtered settlement-window series back
//! out with the original header order, and keeps the per-date archive and
//! metadata files in the data directory.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::types::{NormalizationResult, RawPriceRow};

/// Default suffix appended to the stem of a filtered export
pub const FILTERED_SUFFIX: &str = "_16h_filtered";

/// Prefix of archived exports, followed by `YYYYMMDD_`
pub const ARCHIVE_PREFIX: &str = "bitcoin_market_";

/// Version tag written into metadata files
pub const COLLECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A raw export as read from disk
#[derive(Debug, Clone, Default)]
pub struct RawExport {
    /// Column names in file order
    pub headers: Vec<String>,
    pub rows: Vec<RawPriceRow>,
}

/// Load a raw export CSV
pub fn load_export(path: &Path) -> Result<RawExport> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open export {}", path.display()))?;
    parse_export(file).with_context(|| format!("Failed to read export {}", path.display()))
}

/// Parse a raw export from any reader.
///
/// Records shorter than the header simply lack the trailing columns; cells
/// are kept verbatim.
pub fn parse_export<R: Read>(reader: R) -> Result<RawExport> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::Headers)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("Failed to read CSV record")?;
        rows.push(
            headers
                .iter()
                .zip(record.iter())
                .map(|(column, value)| (column.as_str(), value))
                .collect::<RawPriceRow>(),
        );
    }

    Ok(RawExport { headers, rows })
}

/// `dir/name.csv` -> `dir/name{suffix}.csv`
pub fn filtered_path(original: &Path, suffix: &str) -> PathBuf {
    let stem = original
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("export");
    original.with_file_name(format!("{}{}.csv", stem, suffix))
}

/// Write the window rows of `result` as CSV using the export's header order.
///
/// The timestamp cell is written exactly as exported.
pub fn write_filtered(path: &Path, headers: &[String], result: &NormalizationResult) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create filtered CSV {}", path.display()))?;
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);

    writer
        .write_record(headers)
        .context("Failed to write filtered CSV header")?;

    let timestamp_column = result.timestamp_column.as_deref();
    let price_column = result.price_column.as_deref();

    for row in &result.rows {
        let record: Vec<String> = headers
            .iter()
            .map(|column| {
                if Some(column.as_str()) == timestamp_column {
                    row.raw_timestamp.clone()
                } else if Some(column.as_str()) == price_column {
                    row.price.to_string()
                } else {
                    row.extra_fields
                        .iter()
                        .find(|(name, _)| name == column)
                        .map(|(_, value)| value.clone())
                        .unwrap_or_default()
                }
            })
            .collect();
        writer
            .write_record(&record)
            .context("Failed to write filtered CSV row")?;
    }

    writer.flush().context("Failed to flush filtered CSV")?;
    Ok(())
}

/// Pretty-printed JSON dump of any serializable value
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[derive(Serialize)]
struct CollectionMetadata<'a, T: Serialize> {
    collection_date: String,
    target_date: NaiveDate,
    time_range: String,
    result: &'a T,
    collector_version: &'static str,
}

/// Per-date files in the collector data directory
#[derive(Debug, Clone)]
pub struct ExportStore {
    data_dir: PathBuf,
    filtered_suffix: String,
}

impl ExportStore {
    /// Open the store, creating the data directory if needed
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        Ok(Self {
            data_dir,
            filtered_suffix: FILTERED_SUFFIX.to_string(),
        })
    }

    pub fn with_filtered_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.filtered_suffix = suffix.into();
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn filtered_suffix(&self) -> &str {
        &self.filtered_suffix
    }

    fn date_prefix(target_date: NaiveDate) -> String {
        format!("{}{}_", ARCHIVE_PREFIX, target_date.format("%Y%m%d"))
    }

    fn archive_target(&self, source: &Path, target_date: NaiveDate) -> Result<PathBuf> {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .context("Export path has no file name")?;
        let prefix = Self::date_prefix(target_date);
        let archived_name = if name.starts_with(&prefix) {
            name.to_string()
        } else {
            format!("{}{}", prefix, name)
        };
        Ok(self.data_dir.join(archived_name))
    }

    /// Copy a caller-owned export into the data directory under its dated
    /// name, leaving the source in place.
    pub fn copy_export(&self, source: &Path, target_date: NaiveDate) -> Result<PathBuf> {
        let target = self.archive_target(source, target_date)?;
        if target == source {
            return Ok(target);
        }
        fs::copy(source, &target).with_context(|| {
            format!("Failed to copy {} to {}", source.display(), target.display())
        })?;
        info!(file = %target.display(), "📁 Export copied into archive");
        Ok(target)
    }

    /// Move a downloaded export into the data directory under its dated name.
    ///
    /// Falls back to copy when rename crosses filesystems, and to the
    /// original path when both fail.
    pub fn archive_export(&self, download: &Path, target_date: NaiveDate) -> Result<PathBuf> {
        let target = self.archive_target(download, target_date)?;
        if target == download {
            return Ok(target);
        }

        match fs::rename(download, &target) {
            Ok(()) => {}
            Err(rename_err) => {
                debug!(error = %rename_err, "rename failed, copying export instead");
                if let Err(copy_err) = fs::copy(download, &target) {
                    warn!(
                        file = %download.display(),
                        error = %copy_err,
                        "Could not archive export, keeping original location"
                    );
                    return Ok(download.to_path_buf());
                }
                if let Err(remove_err) = fs::remove_file(download) {
                    warn!(
                        file = %download.display(),
                        error = %remove_err,
                        "Export archived but the download could not be removed"
                    );
                }
            }
        }

        info!(file = %target.display(), "📁 Export archived");
        Ok(target)
    }

    /// Archived raw exports for a date, newest name first. Filtered outputs
    /// are not listed.
    pub fn existing_exports(&self, target_date: NaiveDate) -> Vec<PathBuf> {
        let prefix = Self::date_prefix(target_date);
        let mut files: Vec<PathBuf> = Vec::new();
        let Ok(entries) = fs::read_dir(&self.data_dir) else {
            return files;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with(&prefix) || !name.ends_with(".csv") {
                continue;
            }
            if name.ends_with(&format!("{}.csv", self.filtered_suffix)) {
                continue;
            }
            files.push(path);
        }
        files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
        files
    }

    pub fn metadata_path(&self, target_date: NaiveDate) -> PathBuf {
        self.data_dir
            .join(format!("metadata_{}.json", target_date.format("%Y%m%d")))
    }

    /// Write `metadata_YYYYMMDD.json` describing one collection run
    pub fn save_metadata<T: Serialize>(&self, target_date: NaiveDate, result: &T) -> Result<PathBuf> {
        let window = crate::normalizer::compute_window(target_date);
        let metadata = CollectionMetadata {
            collection_date: Utc::now().to_rfc3339(),
            target_date,
            time_range: window.to_string(),
            result,
            collector_version: COLLECTOR_VERSION,
        };
        let path = self.metadata_path(target_date);
        save_json(&path, &metadata)?;
        info!(file = %path.display(), "Collection metadata saved");
        Ok(path)
    }
}
