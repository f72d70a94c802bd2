//! Durable crawl checkpoints.
//!
//! A checkpoint is a JSON snapshot of everything needed to resume a crawl:
//! the visited set, the pending frontier (with attempt counts), the
//! controller state, and progress counters. Saves are atomic
//! (`.tmp` + fsync + rename); a fatal signal gets a best-effort
//! `.emergency` write instead, and loading prefers the emergency file when
//! it is newer than the main one. Checkpoint I/O is strictly best-effort
//! from the crawl's perspective: a failed save is logged and retried at the
//! next cadence.

use chrono::{DateTime, Utc};
use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

use super::crawl_types::{FrontierEntry, Outcome};
use crate::urlkit::CanonicalUrl;

/// Format version written to every checkpoint.
pub const CHECKPOINT_VERSION: &str = "1.0";

/// Save at least this often once the interval has elapsed, regardless of
/// page throughput.
const MIN_SAVE_SPACING: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no checkpoint found at {0}")]
    NotFound(PathBuf),
}

/// Controller state carried across a resume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub current_delay_secs: f64,
    pub target_workers: u32,
    #[serde(default)]
    pub window: Vec<WindowSample>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSample {
    pub outcome: Outcome,
    /// Age of the sample at snapshot time.
    pub age_secs: f64,
}

/// The durable snapshot document.
///
/// `checkpoint_time`, `visited`, `pending`, and `pages_visited` are required
/// on load; everything else degrades gracefully so older or partial
/// (emergency) files remain readable. Unknown fields are tolerated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default = "default_checkpoint_version")]
    pub checkpoint_version: String,
    pub checkpoint_time: DateTime<Utc>,
    pub visited: Vec<CanonicalUrl>,
    pub pending: Vec<FrontierEntry>,
    #[serde(default)]
    pub controller: Option<ControllerSnapshot>,
    pub pages_visited: u64,
    #[serde(default)]
    pub config_fingerprint: String,
    /// Tracking parameters that were stripped during canonicalization, so a
    /// resumed run canonicalizes identically.
    #[serde(default)]
    pub stripped_query_params: Vec<String>,
}

fn default_checkpoint_version() -> String {
    CHECKPOINT_VERSION.to_string()
}

impl Checkpoint {
    /// Parse a checkpoint document, enforcing the load invariant
    /// `pending ∩ visited = ∅` by dropping offending pending entries.
    pub fn from_json(data: &str) -> Result<Self, CheckpointError> {
        let mut checkpoint: Self = serde_json::from_str(data)?;
        let visited: std::collections::HashSet<&CanonicalUrl> =
            checkpoint.visited.iter().collect();
        let before = checkpoint.pending.len();
        checkpoint
            .pending
            .retain(|entry| !visited.contains(&entry.url));
        if checkpoint.pending.len() != before {
            warn!(
                "dropped {} pending entries already present in the visited set",
                before - checkpoint.pending.len()
            );
        }
        Ok(checkpoint)
    }
}

struct Cadence {
    last_save: Instant,
    last_save_pages: u64,
}

/// Writes and restores checkpoints for one crawl run.
///
/// Single-writer by construction: only the manager's coordinator task calls
/// the save methods. The cadence state lives behind a mutex so `is_due` can
/// be polled from the coordinator loop without exterior bookkeeping.
pub struct CheckpointManager {
    path: PathBuf,
    interval: Duration,
    keep_backup: bool,
    cadence: Mutex<Cadence>,
}

impl CheckpointManager {
    #[must_use]
    pub fn new(path: PathBuf, interval: Duration, keep_backup: bool) -> Self {
        Self {
            path,
            interval,
            keep_backup,
            cadence: Mutex::new(Cadence {
                last_save: Instant::now(),
                last_save_pages: 0,
            }),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        companion(&self.path, "tmp")
    }

    fn emergency_path(&self) -> PathBuf {
        companion(&self.path, "emergency")
    }

    fn backup_path(&self) -> PathBuf {
        companion(&self.path, "backup")
    }

    /// Whether a periodic save is due.
    ///
    /// Due when the interval has elapsed (rate-limited under tiny page
    /// increments), or when page progress since the last save exceeds
    /// max(10, 20% of the last saved count).
    #[must_use]
    pub fn is_due(&self, pages_visited: u64) -> bool {
        let cadence = self.cadence.lock();
        let elapsed = cadence.last_save.elapsed();
        let pages_since = pages_visited.saturating_sub(cadence.last_save_pages);

        let throughput_floor =
            MIN_SAVE_SPACING.min(Duration::from_millis(pages_since.saturating_mul(100)));
        if elapsed >= self.interval && elapsed >= throughput_floor {
            return true;
        }

        pages_since >= (cadence.last_save_pages / 5).max(10)
    }

    /// Atomically replace the main checkpoint file.
    ///
    /// Writes to `<path>.tmp`, fsyncs, then renames over the main file. The
    /// previous main file is optionally preserved as `<path>.backup`. The
    /// cadence state advances only on success.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let data = serde_json::to_string_pretty(checkpoint)?;
        let tmp = self.tmp_path();
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(data.as_bytes())?;
            file.sync_all()?;
        }

        if self.keep_backup && self.path.exists() {
            if let Err(e) = fs::copy(&self.path, self.backup_path()) {
                warn!("failed to write checkpoint backup: {e}");
            }
        }

        fs::rename(&tmp, &self.path)?;

        let mut cadence = self.cadence.lock();
        cadence.last_save = Instant::now();
        cadence.last_save_pages = checkpoint.pages_visited;
        info!(
            "checkpoint saved: {} visited, {} pending ({})",
            checkpoint.visited.len(),
            checkpoint.pending.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Fast best-effort save for fatal signals: a direct write of the
    /// essential fields to `<path>.emergency`, no tmp/rename dance. A
    /// partial file is acceptable; the loader validates before trusting it.
    pub fn emergency_save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string(checkpoint)?;
        fs::write(self.emergency_path(), data)?;
        info!("emergency checkpoint written: {}", self.emergency_path().display());
        Ok(())
    }

    /// Load the newest valid checkpoint.
    ///
    /// If an emergency file exists and carries a newer `checkpoint_time`
    /// than the main file (or the main file is missing or unreadable), the
    /// emergency file wins.
    pub fn load(&self) -> Result<Checkpoint, CheckpointError> {
        let main = read_checkpoint(&self.path);
        let emergency = read_checkpoint(&self.emergency_path());

        match (main, emergency) {
            (Ok(main), Ok(emergency)) => {
                if emergency.checkpoint_time > main.checkpoint_time {
                    info!("emergency checkpoint is newer than main; resuming from it");
                    Ok(emergency)
                } else {
                    Ok(main)
                }
            }
            (Ok(main), Err(_)) => Ok(main),
            (Err(_), Ok(emergency)) => {
                info!("no readable main checkpoint; resuming from emergency file");
                Ok(emergency)
            }
            (Err(e), Err(_)) => match e {
                CheckpointError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                    Err(CheckpointError::NotFound(self.path.clone()))
                }
                other => Err(other),
            },
        }
    }

    /// Remove companion files; optionally also the backup.
    pub fn cleanup(&self, remove_backup: bool) {
        for path in [self.tmp_path(), self.emergency_path()] {
            if path.exists()
                && let Err(e) = fs::remove_file(&path)
            {
                warn!("failed to remove {}: {e}", path.display());
            }
        }
        if remove_backup {
            let backup = self.backup_path();
            if backup.exists()
                && let Err(e) = fs::remove_file(&backup)
            {
                warn!("failed to remove {}: {e}", backup.display());
            }
        }
    }
}

fn companion(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".");
    os.push(suffix);
    PathBuf::from(os)
}

fn read_checkpoint(path: &Path) -> Result<Checkpoint, CheckpointError> {
    let data = fs::read_to_string(path)?;
    Checkpoint::from_json(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::urlkit::canonicalize;
    use tempfile::TempDir;

    fn canon(raw: &str) -> CanonicalUrl {
        canonicalize(raw, None, &[]).expect("test URL should canonicalize")
    }

    fn sample_checkpoint(pages: u64) -> Checkpoint {
        Checkpoint {
            checkpoint_version: CHECKPOINT_VERSION.to_string(),
            checkpoint_time: Utc::now(),
            visited: vec![canon("https://example.com/a")],
            pending: vec![FrontierEntry::new(canon("https://example.com/b"))],
            controller: Some(ControllerSnapshot {
                current_delay_secs: 1.5,
                target_workers: 3,
                window: vec![WindowSample {
                    outcome: Outcome::Success,
                    age_secs: 0.5,
                }],
            }),
            pages_visited: pages,
            config_fingerprint: "abc123".to_string(),
            stripped_query_params: vec!["utm_source".to_string()],
        }
    }

    fn manager(dir: &TempDir) -> CheckpointManager {
        CheckpointManager::new(
            dir.path().join("crawl.checkpoint.json"),
            Duration::from_secs(600),
            true,
        )
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().expect("tempdir");
        let mgr = manager(&dir);
        let checkpoint = sample_checkpoint(7);
        mgr.save(&checkpoint).expect("save should succeed");

        let loaded = mgr.load().expect("load should succeed");
        assert_eq!(loaded.visited, checkpoint.visited);
        assert_eq!(loaded.pending, checkpoint.pending);
        assert_eq!(loaded.pages_visited, 7);
        assert_eq!(loaded.config_fingerprint, "abc123");
        assert!(!mgr.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn load_rejects_missing_required_fields() {
        let err = Checkpoint::from_json(r#"{"visited": [], "pending": []}"#);
        assert!(matches!(err, Err(CheckpointError::Parse(_))));
    }

    #[test]
    fn load_tolerates_unknown_fields() {
        let data = serde_json::json!({
            "checkpoint_time": Utc::now(),
            "visited": ["https://example.com/a"],
            "pending": [],
            "pages_visited": 1,
            "some_future_field": {"x": 1}
        });
        let checkpoint =
            Checkpoint::from_json(&data.to_string()).expect("unknown fields are tolerated");
        assert_eq!(checkpoint.pages_visited, 1);
        assert_eq!(checkpoint.checkpoint_version, CHECKPOINT_VERSION);
    }

    #[test]
    fn load_filters_pending_visited_overlap() {
        let data = serde_json::json!({
            "checkpoint_time": Utc::now(),
            "visited": ["https://example.com/a"],
            "pending": [
                {"url": "https://example.com/a", "attempts": 1, "enqueued_at": Utc::now()},
                {"url": "https://example.com/b", "attempts": 0, "enqueued_at": Utc::now()}
            ],
            "pages_visited": 1
        });
        let checkpoint = Checkpoint::from_json(&data.to_string()).expect("parses");
        assert_eq!(checkpoint.pending.len(), 1);
        assert_eq!(checkpoint.pending[0].url.as_str(), "https://example.com/b");
    }

    #[test]
    fn emergency_preferred_when_newer() {
        let dir = TempDir::new().expect("tempdir");
        let mgr = manager(&dir);

        let mut older = sample_checkpoint(5);
        older.checkpoint_time = Utc::now() - chrono::Duration::minutes(10);
        mgr.save(&older).expect("save should succeed");

        let newer = sample_checkpoint(9);
        mgr.emergency_save(&newer).expect("emergency save should succeed");

        let loaded = mgr.load().expect("load should succeed");
        assert_eq!(loaded.pages_visited, 9);
    }

    #[test]
    fn stale_emergency_is_ignored() {
        let dir = TempDir::new().expect("tempdir");
        let mgr = manager(&dir);

        let mut stale = sample_checkpoint(2);
        stale.checkpoint_time = Utc::now() - chrono::Duration::hours(1);
        mgr.emergency_save(&stale).expect("emergency save should succeed");

        let current = sample_checkpoint(8);
        mgr.save(&current).expect("save should succeed");

        let loaded = mgr.load().expect("load should succeed");
        assert_eq!(loaded.pages_visited, 8);
    }

    #[test]
    fn backup_keeps_previous_main() {
        let dir = TempDir::new().expect("tempdir");
        let mgr = manager(&dir);
        mgr.save(&sample_checkpoint(1)).expect("first save");
        mgr.save(&sample_checkpoint(2)).expect("second save");

        let backup = dir.path().join("crawl.checkpoint.json.backup");
        let data = fs::read_to_string(backup).expect("backup should exist");
        let backup_checkpoint = Checkpoint::from_json(&data).expect("backup parses");
        assert_eq!(backup_checkpoint.pages_visited, 1);
    }

    #[test]
    fn cleanup_removes_companions() {
        let dir = TempDir::new().expect("tempdir");
        let mgr = manager(&dir);
        mgr.save(&sample_checkpoint(1)).expect("save");
        mgr.save(&sample_checkpoint(2)).expect("save");
        mgr.emergency_save(&sample_checkpoint(3)).expect("emergency save");

        mgr.cleanup(true);
        assert!(!dir.path().join("crawl.checkpoint.json.emergency").exists());
        assert!(!dir.path().join("crawl.checkpoint.json.backup").exists());
        assert!(dir.path().join("crawl.checkpoint.json").exists());
    }

    #[test]
    fn cadence_progress_trigger() {
        let dir = TempDir::new().expect("tempdir");
        let mgr = manager(&dir);
        // fresh manager: nothing due below the 10-page floor
        assert!(!mgr.is_due(5));
        assert!(mgr.is_due(10));

        mgr.save(&sample_checkpoint(100)).expect("save");
        // 20% of 100 = 20 pages
        assert!(!mgr.is_due(115));
        assert!(mgr.is_due(120));
    }
}
