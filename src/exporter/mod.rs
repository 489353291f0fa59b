//! Market exporters
//!
//! Sources of raw price exports. The browser session that actually clicks
//! "export" lives outside this crate; here we only pick up the file it
//! produces, either handed over directly or dropped into a download
//! directory.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::market;

/// Extensions browsers use for downloads still in flight
const PARTIAL_EXTENSIONS: [&str; 3] = ["crdownload", "part", "tmp"];

/// The market an export is requested for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketRef {
    pub target_date: NaiveDate,
    pub slug: String,
    pub url: String,
}

impl MarketRef {
    pub fn for_date(base_url: &str, target_date: NaiveDate) -> Self {
        Self {
            target_date,
            slug: market::market_slug(target_date),
            url: market::event_url(base_url, target_date),
        }
    }
}

/// Trait for raw export sources
#[async_trait]
pub trait MarketExporter: Send + Sync {
    /// Get the exporter name
    fn name(&self) -> &'static str;

    /// Produce a raw export CSV for the market and return its path
    async fn export(&self, market: &MarketRef) -> Result<PathBuf>;

    /// Whether the returned file may be moved into the archive. Exporters
    /// handing back a caller's own file return false so it is copied.
    fn consumes_export(&self) -> bool {
        true
    }
}

/// Exporter backed by a file that already exists
#[derive(Debug, Clone)]
pub struct FileExporter {
    path: PathBuf,
}

impl FileExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MarketExporter for FileExporter {
    fn name(&self) -> &'static str {
        "file"
    }

    fn consumes_export(&self) -> bool {
        false
    }

    async fn export(&self, market: &MarketRef) -> Result<PathBuf> {
        if !self.path.is_file() {
            bail!(
                "Export file {} for {} does not exist",
                self.path.display(),
                market.slug
            );
        }
        Ok(self.path.clone())
    }
}

/// Terminal states of a download wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Found(PathBuf),
    TimedOut,
}

/// Files present in a download directory at one point in time
#[derive(Debug, Clone, Default)]
pub struct DownloadSnapshot {
    files: HashSet<PathBuf>,
}

impl DownloadSnapshot {
    pub fn take(dir: &Path) -> Result<Self> {
        let mut files = HashSet::new();
        if dir.exists() {
            for entry in fs::read_dir(dir)
                .with_context(|| format!("Failed to list {}", dir.display()))?
                .flatten()
            {
                files.insert(entry.path());
            }
        }
        Ok(Self { files })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Completed CSV files in `dir` that were not in the snapshot
    pub fn new_exports(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        if !dir.exists() {
            return Ok(found);
        }
        for entry in fs::read_dir(dir)
            .with_context(|| format!("Failed to list {}", dir.display()))?
            .flatten()
        {
            let path = entry.path();
            if self.files.contains(&path) || !path.is_file() {
                continue;
            }
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if PARTIAL_EXTENSIONS.iter().any(|p| ext.eq_ignore_ascii_case(p)) {
                continue;
            }
            if ext.eq_ignore_ascii_case("csv") {
                found.push(path);
            }
        }
        Ok(found)
    }
}

fn newest(paths: Vec<PathBuf>) -> Option<PathBuf> {
    paths.into_iter().max_by_key(|p| {
        let modified = fs::metadata(p)
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        (modified, p.file_name().map(|n| n.to_os_string()))
    })
}

/// Waits for a new export to land in a download directory.
///
/// The directory is snapshotted when the exporter is armed; any CSV that
/// appears afterwards counts as the export.
#[derive(Debug, Clone)]
pub struct DownloadDirExporter {
    download_dir: PathBuf,
    snapshot: DownloadSnapshot,
    timeout: Duration,
    poll_interval: Duration,
}

impl DownloadDirExporter {
    pub fn arm(
        download_dir: impl Into<PathBuf>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self> {
        let download_dir = download_dir.into();
        fs::create_dir_all(&download_dir).context("Failed to create download directory")?;
        let snapshot = DownloadSnapshot::take(&download_dir)?;
        debug!(
            dir = %download_dir.display(),
            existing = snapshot.len(),
            "Download directory snapshot taken"
        );
        Ok(Self {
            download_dir,
            snapshot,
            timeout,
            poll_interval,
        })
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Poll until a new export appears or the timeout elapses
    pub async fn wait_for_download(&self) -> Result<DownloadOutcome> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let candidates = self.snapshot.new_exports(&self.download_dir)?;
            if let Some(path) = newest(candidates) {
                return Ok(DownloadOutcome::Found(path));
            }
            if Instant::now() >= deadline {
                return Ok(DownloadOutcome::TimedOut);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl MarketExporter for DownloadDirExporter {
    fn name(&self) -> &'static str {
        "download-dir"
    }

    async fn export(&self, market: &MarketRef) -> Result<PathBuf> {
        info!(
            url = %market.url,
            dir = %self.download_dir.display(),
            timeout_secs = self.timeout.as_secs(),
            "⏳ Waiting for market export"
        );
        match self.wait_for_download().await? {
            DownloadOutcome::Found(path) => {
                info!(file = %path.display(), "📥 Export downloaded");
                Ok(path)
            }
            DownloadOutcome::TimedOut => bail!(
                "No export for {} appeared in {} within {}s",
                market.slug,
                self.download_dir.display(),
                self.timeout.as_secs()
            ),
        }
    }
}
