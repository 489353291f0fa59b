//! Up-or-Down Collector CLI
//!
//! Provides commands for:
//! - `collect`: Run the daily collection for one target date
//! - `normalize`: Filter an existing export to a settlement window

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use updown_collector::collector::{self, DailyCollector};
use updown_collector::config::AppConfig;
use updown_collector::exporter::{DownloadDirExporter, FileExporter, MarketExporter};
use updown_collector::normalizer::WindowNormalizer;
use updown_collector::oracle::CoinGeckoClient;
use updown_collector::persistence::ExportStore;

#[derive(Parser)]
#[command(name = "updown-collector", version, about = "Polymarket BTC up-or-down daily collector")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect, archive and normalize the export for one market
    Collect(CollectArgs),
    /// Filter an export file to the settlement window of a date
    Normalize(NormalizeArgs),
}

#[derive(Args)]
struct CollectArgs {
    /// Market date (YYYY-MM-DD), defaults to yesterday
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Use this export file instead of waiting on the download directory.
    /// The file is copied into the data directory and left in place
    #[arg(long)]
    input: Option<PathBuf>,

    /// Collect even if the date already has an archived export
    #[arg(long)]
    force: bool,

    /// Skip the spot price cross-check
    #[arg(long)]
    no_spot: bool,
}

#[derive(Args)]
struct NormalizeArgs {
    /// Raw export CSV
    file: PathBuf,

    /// Market date (YYYY-MM-DD)
    #[arg(long)]
    date: NaiveDate,

    /// Output directory, defaults to the export's directory
    #[arg(long)]
    output: Option<PathBuf>,
}

fn init_logging(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("updown_collector=info"))
        .context("Invalid log filter")?;

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs)?;

    let config = AppConfig::load()?;
    info!(config = %config, "⚙️ Configuration loaded");

    let ok = match cli.command {
        Commands::Collect(args) => collect(&config, args).await?,
        Commands::Normalize(args) => normalize(&config, args)?,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

async fn collect(config: &AppConfig, args: CollectArgs) -> Result<bool> {
    let target_date = args
        .date
        .unwrap_or_else(|| collector::default_target_date(Local::now().date_naive()));

    let exporter: Box<dyn MarketExporter> = match args.input {
        Some(path) => Box::new(FileExporter::new(path)),
        None => Box::new(DownloadDirExporter::arm(
            &config.exporter.download_dir,
            config.exporter.timeout(),
            config.exporter.poll_interval(),
        )?),
    };

    let store = ExportStore::new(&config.collector.data_dir)?
        .with_filtered_suffix(config.collector.filtered_suffix.clone());
    let normalizer = WindowNormalizer::with_candidates(config.collector.timestamp_candidates.clone());
    let mut daily = DailyCollector::new(store, normalizer, exporter, &config.market.event_base_url);

    if config.price_index.enabled && !args.no_spot {
        let client = CoinGeckoClient::new(
            &config.price_index.base_url,
            config.price_index.timeout(),
            config.price_index.rate_limit_delay(),
        )?;
        daily = daily.with_price_index(Box::new(client));
    }

    let report = daily.run(target_date, args.force).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize report")?
    );
    Ok(report.success)
}

fn normalize(config: &AppConfig, args: NormalizeArgs) -> Result<bool> {
    let output_dir = match args.output {
        Some(dir) => dir,
        None => args
            .file
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let normalizer = WindowNormalizer::with_candidates(config.collector.timestamp_candidates.clone());

    let processed = collector::process_export(
        &normalizer,
        &args.file,
        args.date,
        &output_dir,
        &config.collector.filtered_suffix,
    )?;

    println!(
        "{}",
        serde_json::to_string_pretty(&processed.result.summary())
            .context("Failed to serialize summary")?
    );
    Ok(true)
}
