//! Daily collector
//!
//! One collection run for one target date: obtain the export, archive it,
//! normalize it into the settlement window, write the filtered series,
//! cross-check against spot and record metadata.
//!
//! This is the reporting layer: the normalizer returns structured results
//! and everything user-facing is logged here.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::exporter::{MarketExporter, MarketRef};
use crate::normalizer::WindowNormalizer;
use crate::oracle::{PriceIndexClient, SpotCrossCheck};
use crate::persistence::{self, ExportStore};
use crate::types::{NormalizationResult, NormalizationSummary};

/// Hours listed when a window comes back empty
const HOUR_DISTRIBUTION_PREVIEW: usize = 10;

/// The date a scheduled run collects: the day before `today`
pub fn default_target_date(today: NaiveDate) -> NaiveDate {
    today.pred_opt().unwrap_or(today)
}

/// Outcome of one collection run, also stored in the metadata file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionReport {
    pub run_id: Uuid,
    pub success: bool,
    pub skipped: bool,
    pub date: NaiveDate,
    pub url: String,
    pub original_file: Option<PathBuf>,
    pub processed_file: Option<PathBuf>,
    pub result_file: Option<PathBuf>,
    pub file_size: Option<u64>,
    #[serde(default)]
    pub existing_files: Vec<PathBuf>,
    pub summary: Option<NormalizationSummary>,
    pub cross_check: Option<SpotCrossCheck>,
    pub error: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

impl CollectionReport {
    fn new(market: &MarketRef) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            success: false,
            skipped: false,
            date: market.target_date,
            url: market.url.clone(),
            original_file: None,
            processed_file: None,
            result_file: None,
            file_size: None,
            existing_files: Vec::new(),
            summary: None,
            cross_check: None,
            error: None,
            scraped_at: Utc::now(),
        }
    }
}

/// Files and result produced by processing one export
#[derive(Debug, Clone)]
pub struct ProcessedExport {
    pub result: NormalizationResult,
    pub filtered_file: PathBuf,
    pub result_file: PathBuf,
}

/// Normalize an export file and write `<stem><suffix>.csv` plus the JSON
/// result into `output_dir`.
pub fn process_export(
    normalizer: &WindowNormalizer,
    input: &Path,
    target_date: NaiveDate,
    output_dir: &Path,
    suffix: &str,
) -> Result<ProcessedExport> {
    let export = persistence::load_export(input)?;
    info!(
        file = %input.display(),
        rows = export.rows.len(),
        columns = ?export.headers,
        "📊 Processing export"
    );

    let result = normalizer
        .normalize(&export.rows, target_date)
        .with_context(|| format!("Cannot normalize {}", input.display()))?;
    log_result(&result);

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let file_name = input.file_name().context("Export path has no file name")?;
    let filtered_file = persistence::filtered_path(&output_dir.join(file_name), suffix);
    persistence::write_filtered(&filtered_file, &export.headers, &result)?;
    let result_file = filtered_file.with_extension("json");
    persistence::save_json(&result_file, &result)?;
    info!(file = %filtered_file.display(), "💾 Filtered data saved");

    Ok(ProcessedExport {
        result,
        filtered_file,
        result_file,
    })
}

fn log_result(result: &NormalizationResult) {
    info!(
        column = result.timestamp_column.as_deref().unwrap_or("-"),
        price_column = result.price_column.as_deref().unwrap_or("-"),
        window = %result.window,
        "🕐 Timestamp column resolved"
    );
    if let Some(range) = result.observed_range {
        info!(
            from = %range.first.format("%m/%d %H:%M"),
            to = %range.last.format("%m/%d %H:%M"),
            "📅 Original range (UTC)"
        );
    }

    info!(
        filtered = result.filtered_row_count,
        original = result.original_row_count,
        coverage_pct = %format!("{:.1}", result.coverage_ratio * 100.0),
        outside_window = result.outside_window,
        "✂️ Filtered to settlement window"
    );

    if result.unparseable_rows() > 0 {
        warn!(
            bad_price = result.price_parse_failures,
            bad_timestamp = result.timestamp_parse_failures,
            "Dropped unparseable rows"
        );
        for issue in &result.row_issues {
            debug!(row = issue.row_index, error = %issue.error, "Row dropped");
        }
    }

    if result.filtered_row_count == 0 && result.original_row_count > 0 {
        warn!("⚠️ No data found in target time range");
        for (hour, count) in result.hour_distribution.iter().take(HOUR_DISTRIBUTION_PREVIEW) {
            info!(hour = *hour, records = *count, "Available time distribution");
        }
    }

    if let (Some(first), Some(last)) = (result.first_price, result.last_price) {
        info!(
            first = %format!("{:.3}", first),
            last = %format!("{:.3}", last),
            delta_pct = ?result.price_delta_percent,
            "💰 Price movement"
        );
    }
}

/// Runs daily collections against an exporter and optional price index
pub struct DailyCollector {
    store: ExportStore,
    normalizer: WindowNormalizer,
    exporter: Box<dyn MarketExporter>,
    price_index: Option<Box<dyn PriceIndexClient>>,
    event_base_url: String,
}

impl DailyCollector {
    pub fn new(
        store: ExportStore,
        normalizer: WindowNormalizer,
        exporter: Box<dyn MarketExporter>,
        event_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            normalizer,
            exporter,
            price_index: None,
            event_base_url: event_base_url.into(),
        }
    }

    pub fn with_price_index(mut self, client: Box<dyn PriceIndexClient>) -> Self {
        self.price_index = Some(client);
        self
    }

    /// Collect `target_date`. Failures are reported in the returned report,
    /// not as errors.
    pub async fn run(&self, target_date: NaiveDate, force: bool) -> CollectionReport {
        let market = MarketRef::for_date(&self.event_base_url, target_date);
        info!(
            date = %target_date,
            window = %crate::normalizer::compute_window(target_date),
            url = %market.url,
            exporter = self.exporter.name(),
            "🚀 Collecting daily market data"
        );

        let mut report = CollectionReport::new(&market);
        match self.collect(&market, force, &mut report).await {
            Ok(()) => {
                report.success = true;
                if report.skipped {
                    info!(date = %target_date, "✅ Collection completed (skipped - data exists)");
                } else {
                    info!(date = %target_date, "✅ Collection completed successfully");
                }
            }
            Err(e) => {
                error!(date = %target_date, error = %format!("{:#}", e), "❌ Collection failed");
                report.success = false;
                report.error = Some(format!("{:#}", e));
            }
        }
        report
    }

    async fn collect(
        &self,
        market: &MarketRef,
        force: bool,
        report: &mut CollectionReport,
    ) -> Result<()> {
        let target_date = market.target_date;

        let existing = self.store.existing_exports(target_date);
        if !existing.is_empty() {
            info!(
                date = %target_date,
                files = existing.len(),
                "Data already collected"
            );
            if !force {
                report.skipped = true;
                report.existing_files = existing;
                return Ok(());
            }
        }

        let download = self.exporter.export(market).await?;
        let original = if self.exporter.consumes_export() {
            self.store.archive_export(&download, target_date)?
        } else {
            self.store.copy_export(&download, target_date)?
        };
        report.original_file = Some(original.clone());

        let processed = process_export(
            &self.normalizer,
            &original,
            target_date,
            self.store.data_dir(),
            self.store.filtered_suffix(),
        )?;
        report.file_size = fs::metadata(&processed.filtered_file).ok().map(|m| m.len());
        report.processed_file = Some(processed.filtered_file.clone());
        report.result_file = Some(processed.result_file.clone());
        report.summary = Some(processed.result.summary());
        report.cross_check = self.cross_check(&processed.result).await;
        report.success = true;

        self.store.save_metadata(target_date, &*report)?;
        Ok(())
    }

    async fn cross_check(&self, result: &NormalizationResult) -> Option<SpotCrossCheck> {
        let client = self.price_index.as_ref()?;
        let spot = match client.spot_prices(&result.window).await {
            Ok(spot) => spot,
            Err(e) => {
                warn!(source = client.name(), error = %e, "Spot price fetch failed, skipping cross-check");
                return None;
            }
        };

        let check = SpotCrossCheck::evaluate(client.name(), &spot, result);
        match &check {
            Some(c) => info!(
                source = %c.source,
                spot_open = c.spot_open,
                spot_close = c.spot_close,
                spot_change_pct = %format!("{:+.2}", c.spot_change_percent),
                spot = %c.spot_direction,
                market = %c.market_direction,
                agrees = c.agrees,
                "₿ Spot cross-check"
            ),
            None => warn!(source = client.name(), "Not enough data for spot cross-check"),
        }
        check
    }
}
