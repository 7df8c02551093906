//! Scratch directory arena.
//!
//! Every transfer job gets its own path derived from a unique token. A job
//! writes to `<name>.part` and renames to `<name>` only after a clean close, so
//! anything without the partial suffix is a finished artifact. A finished file
//! stays leased to its job until the job drops the lease, and leased files are
//! invisible to listings, so a purge cannot pull a file from under an upload.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::SystemTime,
};

use tracing::{info, warn};

use crate::Result;

pub const PARTIAL_SUFFIX: &str = ".part";

static SCRATCH_COUNTER: AtomicUsize = AtomicUsize::new(1);

type Leases = Arc<Mutex<HashSet<PathBuf>>>;

fn lock(leases: &Leases) -> MutexGuard<'_, HashSet<PathBuf>> {
    leases.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A path pair reserved for one transfer job.
#[derive(Debug)]
pub struct ScratchSlot {
    pub partial: PathBuf,
    pub complete: PathBuf,
    pub lease: ScratchLease,
}

/// Hides `path` from listings until dropped.
#[derive(Debug)]
pub struct ScratchLease {
    path: PathBuf,
    leases: Leases,
}

impl Drop for ScratchLease {
    fn drop(&mut self) {
        lock(&self.leases).remove(&self.path);
    }
}

/// A finished file visible in the scratch directory.
#[derive(Clone, Debug)]
pub struct ScratchEntry {
    pub path: PathBuf,
    pub modified: SystemTime,
}

#[derive(Debug)]
pub struct ScratchDir {
    root: PathBuf,
    leases: Leases,
}

impl ScratchDir {
    /// Create the directory if needed and drop partial files left behind by a
    /// previous process. No job can be in flight at this point.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let mut removed = 0usize;
        for ent in std::fs::read_dir(&root)?.flatten() {
            let path = ent.path();
            if is_partial(&path) && path.is_file() {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %path.display(), "failed to remove stale partial: {e}"),
                }
            }
        }
        if removed > 0 {
            info!(removed, dir = %root.display(), "removed stale partial downloads");
        }

        Ok(Self {
            root,
            leases: Leases::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserve a unique slot for a job downloading `display_name`.
    pub fn allocate(&self, display_name: &str) -> ScratchSlot {
        let ts = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let n = SCRATCH_COUNTER.fetch_add(1, Ordering::SeqCst);
        let name = uniquify_filename(display_name, ts, n);
        let complete = self.root.join(&name);
        let partial = self.root.join(format!("{name}{PARTIAL_SUFFIX}"));
        lock(&self.leases).insert(complete.clone());
        ScratchSlot {
            partial,
            lease: ScratchLease {
                path: complete.clone(),
                leases: self.leases.clone(),
            },
            complete,
        }
    }

    /// Finished files no job holds anymore. Partial files and leased
    /// files of in-flight jobs are skipped.
    pub fn list_complete(&self) -> Result<Vec<ScratchEntry>> {
        let leased = lock(&self.leases).clone();
        let mut out = Vec::new();
        for ent in std::fs::read_dir(&self.root)?.flatten() {
            let path = ent.path();
            if is_partial(&path) || leased.contains(&path) {
                continue;
            }
            let Ok(md) = ent.metadata() else {
                continue;
            };
            if !md.is_file() {
                continue;
            }
            let modified = md.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            out.push(ScratchEntry { path, modified });
        }
        Ok(out)
    }
}

pub fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(PARTIAL_SUFFIX))
        .unwrap_or(false)
}

fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    let out = out.trim_start_matches('.').to_string();
    if out.is_empty() {
        "file".to_string()
    } else {
        out.chars().take(80).collect()
    }
}

fn uniquify_filename(name: &str, ts: u128, n: usize) -> String {
    let base = sanitize_filename(name);
    if let Some((stem, ext)) = base.rsplit_once('.') {
        if !stem.is_empty() && !ext.is_empty() {
            return format!("{stem}_{ts}_{n}.{ext}");
        }
    }
    format!("{base}_{ts}_{n}")
}
