/// Background sweep for artifacts that escaped normal cleanup.
///
/// Runs on its own interval, independent of request traffic. The first
/// tick fires immediately so leftovers from a crashed previous process are
/// removed at startup. In-flight artifacts are skipped whatever their age.
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::artifact::ArtifactStore;

/// Counters for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Directory entries looked at
    pub scanned: usize,
    pub removed: usize,
    /// Entries that could not be inspected or deleted
    pub failed: usize,
}

/// What happened to a single entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reaped {
    Removed,
    /// In flight, fresh, or not a regular file
    Kept,
    /// Gone before we got to it
    Vanished,
    Failed,
}

pub struct Reaper {
    store: ArtifactStore,
    retention: Duration,
    interval: Duration,
}

impl Reaper {
    pub fn new(store: ArtifactStore, retention: Duration, interval: Duration) -> Self {
        Self {
            store,
            retention,
            interval,
        }
    }

    /// Sweeps every `interval` until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            "Reaper started (interval {}s, retention {}s) on {}",
            self.interval.as_secs(),
            self.retention.as_secs(),
            self.store.dir().display()
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Reaper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let report = self.sweep().await;
                    if report.removed > 0 || report.failed > 0 {
                        info!(
                            "Reaper swept {} entries: {} removed, {} failed",
                            report.scanned, report.removed, report.failed
                        );
                    }
                }
            }
        }
    }

    /// One pass over the artifact directory.
    ///
    /// A failure on one entry is logged and counted; the rest of the
    /// directory is still processed.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let mut entries = match tokio::fs::read_dir(self.store.dir()).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "Reaper cannot list {}: {e}",
                    self.store.dir().display()
                );
                return report;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Reaper failed to read a directory entry: {e}");
                    report.failed += 1;
                    break;
                }
            };
            report.scanned += 1;

            match self.reap(&entry.path()).await {
                Reaped::Removed => report.removed += 1,
                Reaped::Failed => report.failed += 1,
                Reaped::Kept | Reaped::Vanished => {}
            }
        }

        report
    }

    /// Handles one directory entry. Never fails: problems are logged and
    /// reported so the sweep can move on to the next entry.
    async fn reap(&self, path: &Path) -> Reaped {
        if self.store.in_flight().contains(path) {
            debug!("Skipping in-flight artifact {}", path.display());
            return Reaped::Kept;
        }

        let metadata = match tokio::fs::symlink_metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Reaped::Vanished,
            Err(e) => {
                warn!("Reaper cannot stat {}: {e}", path.display());
                return Reaped::Failed;
            }
        };
        if !metadata.is_file() {
            return Reaped::Kept;
        }

        let age = match metadata.modified() {
            Ok(modified) => modified.elapsed().unwrap_or_default(),
            Err(e) => {
                warn!("Reaper cannot read mtime of {}: {e}", path.display());
                return Reaped::Failed;
            }
        };
        if age <= self.retention {
            return Reaped::Kept;
        }

        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!("Reaped {} (age {}s)", path.display(), age.as_secs());
                Reaped::Removed
            }
            // Deleted concurrently; nothing left to do
            Err(e) if e.kind() == ErrorKind::NotFound => Reaped::Vanished,
            Err(e) => {
                warn!("Reaper failed to delete {}: {e}", path.display());
                Reaped::Failed
            }
        }
    }
}
