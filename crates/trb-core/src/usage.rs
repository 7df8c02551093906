//! Persisted usage counters: distinct users and completed downloads.
//!
//! The store is an explicit object passed to the call sites that need it. Each
//! change rewrites a small JSON document atomically (temp file + rename).

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{domain::UserId, utils::iso_timestamp_utc, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UsageCounters {
    pub total_users: u64,
    pub total_downloads: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct UsageDoc {
    #[serde(default)]
    users: BTreeSet<i64>,
    #[serde(default)]
    downloads: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
}

#[derive(Debug)]
pub struct UsageStore {
    path: PathBuf,
    doc: Mutex<UsageDoc>,
}

impl UsageStore {
    /// Open (or start) the store at `path`. A corrupt file is an error rather
    /// than a silent reset, since counters must never decrease.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = match tokio::fs::read_to_string(&path).await {
            Ok(txt) if txt.trim().is_empty() => UsageDoc::default(),
            Ok(txt) => serde_json::from_str(&txt)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => UsageDoc::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true when the user was not seen before.
    pub async fn record_user(&self, user: UserId) -> Result<bool> {
        let mut doc = self.doc.lock().await;
        if !doc.users.insert(user.0) {
            return Ok(false);
        }
        doc.updated_at = Some(iso_timestamp_utc());
        persist(&self.path, &doc).await?;
        Ok(true)
    }

    pub async fn record_download(&self) -> Result<u64> {
        let mut doc = self.doc.lock().await;
        doc.downloads = doc.downloads.saturating_add(1);
        doc.updated_at = Some(iso_timestamp_utc());
        persist(&self.path, &doc).await?;
        Ok(doc.downloads)
    }

    pub async fn snapshot(&self) -> UsageCounters {
        let doc = self.doc.lock().await;
        UsageCounters {
            total_users: doc.users.len() as u64,
            total_downloads: doc.downloads,
        }
    }
}

async fn persist(path: &Path, doc: &UsageDoc) -> Result<()> {
    let json = serde_json::to_vec_pretty(doc)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
