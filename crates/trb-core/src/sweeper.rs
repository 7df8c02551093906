//! Background eviction of stale scratch files.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{scratch::ScratchDir, Result};

#[derive(Clone, Debug)]
pub struct Sweeper {
    scratch: Arc<ScratchDir>,
    retention: Duration,
}

impl Sweeper {
    pub fn new(scratch: Arc<ScratchDir>, retention: Duration) -> Self {
        Self { scratch, retention }
    }

    /// Remove finished files older than the retention window.
    pub fn sweep(&self) -> Result<usize> {
        self.sweep_at(SystemTime::now())
    }

    pub fn sweep_at(&self, now: SystemTime) -> Result<usize> {
        let mut removed = 0usize;
        for entry in self.scratch.list_complete()? {
            let age = now.duration_since(entry.modified).unwrap_or_default();
            if age <= self.retention {
                continue;
            }
            match std::fs::remove_file(&entry.path) {
                Ok(()) => removed += 1,
                // Dispatcher may have removed it concurrently.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %entry.path.display(), "sweep failed to remove file: {e}"),
            }
        }
        Ok(removed)
    }

    /// Finished files currently held in scratch.
    pub fn stored_files(&self) -> Result<usize> {
        Ok(self.scratch.list_complete()?.len())
    }

    /// Admin trigger: remove every finished file regardless of age.
    pub fn purge(&self) -> Result<usize> {
        let mut removed = 0usize;
        for entry in self.scratch.list_complete()? {
            match std::fs::remove_file(&entry.path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %entry.path.display(), "purge failed to remove file: {e}"),
            }
        }
        info!(removed, "scratch purged");
        Ok(removed)
    }

    /// Run `sweep()` every `interval` until `cancel` fires.
    pub fn spawn(self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {}
                }
                let this = self.clone();
                match tokio::task::spawn_blocking(move || this.sweep()).await {
                    Ok(Ok(0)) => debug!("sweep: nothing to remove"),
                    Ok(Ok(n)) => info!(removed = n, "sweep removed stale scratch files"),
                    Ok(Err(e)) => warn!("sweep failed: {e}"),
                    Err(e) => warn!("sweep task failed: {e}"),
                }
            }
        })
    }
}
