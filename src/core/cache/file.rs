use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::CacheKind;
use crate::core::records::{DirUsage, Project, ProjectDir};
use crate::error::{PesaError, Result};

/// The typed contents of a legacy cache file. The file's key decides which
/// variant its `data` field must decode as.
#[derive(Debug, Clone, PartialEq)]
pub enum CachePayload {
    Projects(Vec<Project>),
    ProjectDirs(Vec<ProjectDir>),
    DirUsage(Vec<DirUsage>),
}

impl CachePayload {
    pub fn kind(&self) -> CacheKind {
        match self {
            CachePayload::Projects(_) => CacheKind::Projects,
            CachePayload::ProjectDirs(_) => CacheKind::ProjectDirs,
            CachePayload::DirUsage(_) => CacheKind::DirUsage,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            CachePayload::Projects(v) => v.len(),
            CachePayload::ProjectDirs(v) => v.len(),
            CachePayload::DirUsage(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// On-disk envelope: `{"timestamp": RFC 3339, "ttl_ms": u64, "data": …}`.
#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    timestamp: DateTime<Utc>,
    ttl_ms: u64,
    data: T,
}

/// A decoded cache file, regardless of whether it has expired.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub timestamp: DateTime<Utc>,
    pub ttl: Duration,
    pub payload: CachePayload,
}

impl CacheEntry {
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.timestamp)
    }

    /// Fresh while `now - timestamp <= ttl`.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        self.age_at(now) <= ttl
    }
}

/// Decode a legacy cache file's bytes as the variant `kind` calls for.
pub fn decode(kind: CacheKind, bytes: &[u8]) -> std::result::Result<CacheEntry, String> {
    fn typed<T: DeserializeOwned>(
        bytes: &[u8],
        wrap: fn(Vec<T>) -> CachePayload,
    ) -> std::result::Result<CacheEntry, String> {
        let env: Envelope<Vec<T>> = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        Ok(CacheEntry {
            timestamp: env.timestamp,
            ttl: Duration::from_millis(env.ttl_ms),
            payload: wrap(env.data),
        })
    }

    match kind {
        CacheKind::Projects => typed(bytes, CachePayload::Projects),
        CacheKind::ProjectDirs => typed(bytes, CachePayload::ProjectDirs),
        CacheKind::DirUsage => typed(bytes, CachePayload::DirUsage),
    }
}

fn encode(payload: &CachePayload, timestamp: DateTime<Utc>, ttl: Duration) -> serde_json::Result<Vec<u8>> {
    let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    match payload {
        CachePayload::Projects(data) => serde_json::to_vec_pretty(&Envelope { timestamp, ttl_ms, data }),
        CachePayload::ProjectDirs(data) => serde_json::to_vec_pretty(&Envelope { timestamp, ttl_ms, data }),
        CachePayload::DirUsage(data) => serde_json::to_vec_pretty(&Envelope { timestamp, ttl_ms, data }),
    }
}

/// The legacy per-key JSON cache: one `<key>.json` file per [`CacheKind`].
///
/// Last writer wins per key; there is no merge. Kept for data that has not
/// been migrated into the store yet.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, kind: CacheKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    /// Return the payload if a fresh entry exists. Stale entries are deleted;
    /// malformed ones are a miss and stay on disk for migration to report.
    pub fn get(&self, kind: CacheKind) -> Result<Option<CachePayload>> {
        self.get_at(kind, Utc::now())
    }

    pub fn get_at(&self, kind: CacheKind, now: DateTime<Utc>) -> Result<Option<CachePayload>> {
        let entry = match self.read_entry(kind) {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(None),
            Err(PesaError::MalformedEntry { path, reason }) => {
                tracing::warn!(path = %path.display(), %reason, "ignoring malformed cache entry");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if entry.is_fresh_at(now) {
            Ok(Some(entry.payload))
        } else {
            tracing::debug!(key = kind.key(), "cache entry expired, removing");
            self.clear(kind)?;
            Ok(None)
        }
    }

    /// Read and decode an entry without looking at its age.
    pub fn read_entry(&self, kind: CacheKind) -> Result<Option<CacheEntry>> {
        let path = self.path_for(kind);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PesaError::io(&path, e)),
        };
        decode(kind, &bytes)
            .map(Some)
            .map_err(|reason| PesaError::MalformedEntry { path, reason })
    }

    /// Write a timestamped envelope, replacing whatever was there.
    pub fn set(&self, payload: &CachePayload, ttl: Duration) -> Result<()> {
        self.set_at(payload, ttl, Utc::now())
    }

    pub fn set_at(&self, payload: &CachePayload, ttl: Duration, now: DateTime<Utc>) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| PesaError::io(&self.dir, e))?;
        let path = self.path_for(payload.kind());
        let bytes = encode(payload, now, ttl).map_err(|e| PesaError::MalformedEntry {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        // Rename is atomic, so readers never see a half-written file.
        let tmp = path.with_extension(format!("json.tmp-{}", std::process::id()));
        std::fs::write(&tmp, bytes).map_err(|e| PesaError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| PesaError::io(&path, e))?;
        Ok(())
    }

    /// Remove one entry. Absent entries are fine.
    pub fn clear(&self, kind: CacheKind) -> Result<()> {
        let path = self.path_for(kind);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PesaError::io(&path, e)),
        }
    }

    pub fn clear_all(&self) -> Result<()> {
        for kind in CacheKind::ALL {
            self.clear(kind)?;
        }
        Ok(())
    }

    /// Which keys currently have a file on disk.
    pub fn present(&self) -> Vec<CacheKind> {
        CacheKind::ALL
            .into_iter()
            .filter(|k| self.path_for(*k).is_file())
            .collect()
    }
}
