//! Run persistence — append-only JSONL store with summary and detail queries.
//!
//! Each finished run is written as one `{"asset": ..., "run": ...}` object per
//! line. Reads skip malformed lines, and an append first terminates a torn
//! final line so the new run lands on a line of its own. "Latest" means last
//! written. Pruning rewrites the file without runs older than a cutoff.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use backcast_core::{BacktestRun, Window};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::scheduler::AssetRef;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to serialize run: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("no successful backtests found for {asset_class}:{symbol}")]
    NotFound { asset_class: String, symbol: String },
}

/// Accepts finished runs, keyed by run key and tied to an asset.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn persist(&self, asset: &AssetRef, run: BacktestRun) -> Result<(), StoreError>;
}

/// One persisted line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRun {
    pub asset: AssetRef,
    pub run: BacktestRun,
}

/// Latest successful run of one asset, without its windows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub symbol: String,
    pub name: Option<String>,
    pub run_key: String,
    pub mape: f64,
    pub mae: f64,
    pub total_points: usize,
    pub forecast_window: String,
    pub frequency: String,
    pub created_at: DateTime<Utc>,
}

impl RunSummary {
    fn from_stored(stored: &StoredRun) -> Self {
        let run = &stored.run;
        Self {
            symbol: stored.asset.symbol.clone(),
            name: stored.asset.name.clone(),
            run_key: run.run_key().to_string(),
            mape: run.mape(),
            mae: run.mae(),
            total_points: run.total_points(),
            forecast_window: run.forecast_window_label().to_string(),
            frequency: run.frequency_label().to_string(),
            created_at: run.created_at(),
        }
    }
}

/// Latest successful run of one asset with its windows ordered by target start.
#[derive(Debug, Clone, PartialEq)]
pub struct RunDetail {
    pub asset: AssetRef,
    pub run: BacktestRun,
    pub windows: Vec<Window>,
}

// ─── Queries ─────────────────────────────────────────────────────────

/// Newest successful run per symbol of `asset_class`, newest first.
pub fn summarize(runs: &[StoredRun], asset_class: &str, limit: Option<usize>) -> Vec<RunSummary> {
    let mut latest: HashMap<&str, (usize, &StoredRun)> = HashMap::new();
    for (pos, stored) in runs.iter().enumerate() {
        if stored.asset.asset_class == asset_class && stored.run.is_success() {
            latest.insert(stored.asset.symbol.as_str(), (pos, stored));
        }
    }

    let mut picked: Vec<(usize, &StoredRun)> = latest.into_values().collect();
    picked.sort_by(|a, b| b.1.run.created_at().cmp(&a.1.run.created_at()).then(b.0.cmp(&a.0)));

    picked
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|(_, stored)| RunSummary::from_stored(stored))
        .collect()
}

/// Latest successful run of `symbol`, windows capped at `window_limit`.
pub fn detail(
    runs: &[StoredRun],
    asset_class: &str,
    symbol: &str,
    window_limit: Option<usize>,
) -> Result<RunDetail, StoreError> {
    let stored = runs
        .iter()
        .rev()
        .find(|s| {
            s.asset.asset_class == asset_class && s.asset.symbol == symbol && s.run.is_success()
        })
        .ok_or_else(|| StoreError::NotFound {
            asset_class: asset_class.to_string(),
            symbol: symbol.to_string(),
        })?;

    let mut windows = stored.run.windows().to_vec();
    windows.sort_by_key(|w| w.target_range().0);
    if let Some(limit) = window_limit {
        windows.truncate(limit);
    }

    Ok(RunDetail {
        asset: stored.asset.clone(),
        run: stored.run.clone(),
        windows,
    })
}

// ─── JSONL ───────────────────────────────────────────────────────────

pub struct JsonlRunStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlRunStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every well-formed line, in write order.
    pub fn read_all(&self) -> Result<Vec<StoredRun>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = io::BufReader::new(fs::File::open(&self.path)?);
        let mut runs = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredRun>(&line) {
                Ok(stored) => runs.push(stored),
                Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "skipping malformed run line"),
            }
        }
        Ok(runs)
    }

    pub fn summaries(&self, asset_class: &str, limit: Option<usize>) -> Result<Vec<RunSummary>, StoreError> {
        Ok(summarize(&self.read_all()?, asset_class, limit))
    }

    pub fn detail(
        &self,
        asset_class: &str,
        symbol: &str,
        window_limit: Option<usize>,
    ) -> Result<RunDetail, StoreError> {
        detail(&self.read_all()?, asset_class, symbol, window_limit)
    }

    /// Remove runs created more than `retain_weeks` weeks ago. `None` prunes
    /// every asset class. Returns the number of runs removed.
    pub async fn prune_older_than(
        &self,
        asset_class: Option<&str>,
        retain_weeks: u32,
    ) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::weeks(i64::from(retain_weeks));
        self.prune_before(asset_class, cutoff).await
    }

    /// Rewrite the file without runs of `asset_class` created before `cutoff`.
    ///
    /// Malformed lines are dropped by the rewrite. The file is replaced via a
    /// sibling temp file and a rename.
    pub async fn prune_before(
        &self,
        asset_class: Option<&str>,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().await;
        let runs = self.read_all()?;
        let total = runs.len();
        let kept: Vec<StoredRun> = runs
            .into_iter()
            .filter(|stored| {
                let in_scope = asset_class.map_or(true, |class| stored.asset.asset_class == class);
                !(in_scope && stored.run.created_at() < cutoff)
            })
            .collect();
        let removed = total - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        let mut body = String::new();
        for stored in &kept {
            body.push_str(&serde_json::to_string(stored)?);
            body.push('\n');
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::info!(
            asset_class = asset_class.unwrap_or("all"),
            %cutoff,
            removed,
            kept = kept.len(),
            "pruned old runs"
        );
        Ok(removed)
    }
}

/// Whether `path` is missing, empty, or ends with a newline.
async fn ends_with_newline(path: &Path) -> io::Result<bool> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e),
    };
    if file.metadata().await?.len() == 0 {
        return Ok(true);
    }
    file.seek(io::SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}

#[async_trait]
impl RunStore for JsonlRunStore {
    async fn persist(&self, asset: &AssetRef, run: BacktestRun) -> Result<(), StoreError> {
        let stored = StoredRun {
            asset: asset.clone(),
            run,
        };
        let mut line = serde_json::to_string(&stored)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        if !ends_with_newline(&self.path).await? {
            line.insert(0, '\n');
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

// ─── Memory ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: Mutex<Vec<StoredRun>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> Vec<StoredRun> {
        self.runs.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.runs.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn persist(&self, asset: &AssetRef, run: BacktestRun) -> Result<(), StoreError> {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        runs.push(StoredRun {
            asset: asset.clone(),
            run,
        });
        Ok(())
    }
}
