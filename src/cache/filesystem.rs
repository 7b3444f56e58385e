//! On-disk derivative cache.
//!
//! Derivatives live under `<root>/derivatives/ab/cd/<fingerprint>`, sharded
//! by the first two byte pairs of the hex fingerprint. Each file is written
//! to `<root>/tmp/` first and renamed into place, so readers see either the
//! previous content or the complete new one.
//!
//! `<root>/identifiers/<sha256(identifier)>` lists the fingerprints written
//! for one identifier, one per line, and drives [`DerivativeCache::purge`].
//! Fingerprints are stable across restarts, so a new process opened on the
//! same directory serves what an earlier one stored.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{CacheStats, DerivativeCache};
use crate::operation::Fingerprint;

const DERIVATIVES_DIR: &str = "derivatives";
const IDENTIFIERS_DIR: &str = "identifiers";
const TMP_DIR: &str = "tmp";

#[derive(Debug, Default)]
struct Occupancy {
    entries: usize,
    size: usize,
}

/// Derivative cache persisted in a directory.
pub struct FilesystemDerivativeCache {
    root: PathBuf,
    ttl: Option<Duration>,

    /// Guards index files and occupancy figures
    state: Mutex<Occupancy>,

    next_tmp: AtomicU64,
}

impl FilesystemDerivativeCache {
    /// Open (or create) a cache rooted at `root`.
    ///
    /// Existing derivatives are counted; leftovers of interrupted writes are
    /// removed.
    pub async fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        let tmp = root.join(TMP_DIR);
        match fs::remove_dir_all(&tmp).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        fs::create_dir_all(&tmp).await?;
        fs::create_dir_all(root.join(DERIVATIVES_DIR)).await?;
        fs::create_dir_all(root.join(IDENTIFIERS_DIR)).await?;

        let occupancy = scan(&root.join(DERIVATIVES_DIR)).await?;
        debug!(
            root = %root.display(),
            entries = occupancy.entries,
            size = occupancy.size,
            "Opened filesystem derivative cache"
        );

        Ok(Self {
            root,
            ttl: None,
            state: Mutex::new(occupancy),
            next_tmp: AtomicU64::new(0),
        })
    }

    /// Treat derivatives older than `ttl` as missing.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sharded path of the derivative with hex fingerprint `key`.
    fn derivative_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.join(DERIVATIVES_DIR);
        if let (Some(first), Some(second)) = (key.get(0..2), key.get(2..4)) {
            path.push(first);
            path.push(second);
        }
        path.push(key);
        path
    }

    fn index_path(&self, identifier: &str) -> PathBuf {
        let key = hex::encode(Sha256::digest(identifier.as_bytes()));
        self.root.join(IDENTIFIERS_DIR).join(key)
    }

    fn tmp_path(&self) -> PathBuf {
        let n = self.next_tmp.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(TMP_DIR)
            .join(format!("{}-{}", std::process::id(), n))
    }

    fn is_expired(&self, metadata: &std::fs::Metadata) -> bool {
        let Some(ttl) = self.ttl else {
            return false;
        };
        metadata
            .modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > ttl)
    }

    async fn write(&self, fingerprint: &Fingerprint, bytes: &[u8]) -> std::io::Result<Option<u64>> {
        let path = self.derivative_path(fingerprint.as_str());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let previous = match fs::metadata(&path).await {
            Ok(metadata) => Some(metadata.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        let tmp = self.tmp_path();
        let written = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            fs::rename(&tmp, &path).await
        }
        .await;
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(previous)
    }

    async fn append_index(&self, identifier: &str, fingerprint: &Fingerprint) -> std::io::Result<()> {
        let mut index = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.index_path(identifier))
            .await?;
        index
            .write_all(format!("{}\n", fingerprint.as_str()).as_bytes())
            .await
    }
}

#[async_trait]
impl DerivativeCache for FilesystemDerivativeCache {
    async fn get(&self, fingerprint: &Fingerprint) -> Option<Bytes> {
        let path = self.derivative_path(fingerprint.as_str());
        if self.ttl.is_some() {
            let metadata = fs::metadata(&path).await.ok()?;
            if self.is_expired(&metadata) {
                debug!(fingerprint = %fingerprint, "Derivative expired");
                return None;
            }
        }
        match fs::read(&path).await {
            Ok(bytes) => Some(Bytes::from(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read derivative");
                None
            }
        }
    }

    async fn put(&self, fingerprint: &Fingerprint, identifier: &str, bytes: Bytes) {
        let mut state = self.state.lock().await;
        let previous = match self.write(fingerprint, &bytes).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!(fingerprint = %fingerprint, error = %e, "Failed to store derivative");
                return;
            }
        };
        match previous {
            Some(old) => state.size = state.size.saturating_sub(old as usize),
            None => state.entries += 1,
        }
        state.size += bytes.len();

        if previous.is_none() {
            if let Err(e) = self.append_index(identifier, fingerprint).await {
                warn!(identifier, error = %e, "Failed to index derivative");
            }
        }
    }

    async fn purge(&self, identifier: &str) -> usize {
        let mut state = self.state.lock().await;
        let index_path = self.index_path(identifier);
        let index = match fs::read_to_string(&index_path).await {
            Ok(index) => index,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(identifier, error = %e, "Failed to read derivative index");
                }
                return 0;
            }
        };

        let mut removed = 0;
        let fingerprints: HashSet<&str> = index.lines().filter(|l| !l.is_empty()).collect();
        for key in fingerprints {
            let path = self.derivative_path(key);
            let Ok(metadata) = fs::metadata(&path).await else {
                continue;
            };
            match fs::remove_file(&path).await {
                Ok(()) => {
                    state.entries = state.entries.saturating_sub(1);
                    state.size = state.size.saturating_sub(metadata.len() as usize);
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to purge derivative"),
            }
        }
        if let Err(e) = fs::remove_file(&index_path).await {
            warn!(identifier, error = %e, "Failed to remove derivative index");
        }
        removed
    }

    async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        CacheStats {
            entries: state.entries,
            size_bytes: state.size,
            capacity_bytes: 0,
        }
    }
}

/// Count the files under the sharded derivatives directory.
async fn scan(dir: &Path) -> std::io::Result<Occupancy> {
    let mut occupancy = Occupancy::default();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                pending.push(entry.path());
            } else {
                occupancy.entries += 1;
                occupancy.size += metadata.len() as usize;
            }
        }
    }
    Ok(occupancy)
}

// =============================================================================
// Tests
// =============================================================================
