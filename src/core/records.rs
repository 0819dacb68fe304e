use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A discovered local git working copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub path: PathBuf,
    pub name: String,
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub git_objects: u64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// A freshly observed project, named after the last path component.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let now = Utc::now();
        Self {
            path,
            name,
            remote_url: None,
            branch: None,
            last_modified: now,
            git_objects: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A root directory that was scanned for projects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDir {
    pub path: PathBuf,
    pub last_scanned: DateTime<Utc>,
    #[serde(default)]
    pub git_repos_found: u32,
}

/// Visitation history of a directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirUsage {
    pub path: PathBuf,
    pub frequency: u64,
    pub last_seen: DateTime<Utc>,
}

/// Cached remote-repository metadata, keyed by `owner/name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitHubRepo {
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub url: String,
    pub clone_url: String,
    pub ssh_url: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub fork: bool,
    pub updated_at: DateTime<Utc>,
    pub discovered_at: DateTime<Utc>,
}

/// Freshness marker for a named cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub cache_key: String,
    pub last_updated: DateTime<Utc>,
    pub ttl_seconds: i64,
}

impl CacheMetadata {
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.ttl_seconds > 0
            && now.signed_duration_since(self.last_updated)
                <= chrono::Duration::seconds(self.ttl_seconds)
    }
}

/// Timestamps are stored as fixed-width UTC strings so SQL `MAX()` and
/// `ORDER BY` agree with chronological order.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.to_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn project_named_after_dir() {
        let p = Project::new("/home/user/code/api-gateway");
        assert_eq!(p.name, "api-gateway");
        assert!(p.remote_url.is_none());
    }

    #[test]
    fn timestamps_sort_lexicographically() {
        let early = Utc.with_ymd_and_hms(2024, 1, 9, 23, 59, 59).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert!(format_ts(&early) < format_ts(&late));
        assert_eq!(format_ts(&late).len(), format_ts(&early).len());
        assert_eq!(parse_ts(&format_ts(&late)), Some(late));
    }

    #[test]
    fn metadata_freshness() {
        let now = Utc::now();
        let meta = CacheMetadata {
            cache_key: "projects".into(),
            last_updated: now - chrono::Duration::seconds(10),
            ttl_seconds: 5,
        };
        assert!(!meta.is_fresh_at(now));
        assert!(meta.is_fresh_at(now - chrono::Duration::seconds(6)));
    }
}
