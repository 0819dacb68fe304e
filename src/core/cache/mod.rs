mod file;

pub use file::{CacheEntry, CachePayload, FileCache, decode};

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::records::{CacheMetadata, Project, ProjectDir};
use super::store::Store;
use crate::config::types::CacheConfig;
use crate::error::{PesaError, Result};

/// The cached data kinds, shared by the legacy file cache and the store's
/// freshness markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    DirUsage,
    Projects,
    ProjectDirs,
}

impl CacheKind {
    /// Ordered most to least volatile.
    pub const ALL: [CacheKind; 3] = [CacheKind::DirUsage, CacheKind::Projects, CacheKind::ProjectDirs];

    pub fn key(&self) -> &'static str {
        match self {
            CacheKind::DirUsage => "dir_usage",
            CacheKind::Projects => "projects",
            CacheKind::ProjectDirs => "project_dirs",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.key())
    }

    pub fn parse(key: &str) -> Result<Self> {
        serde_plain::from_str(key).map_err(|_| PesaError::UnknownCacheKey(key.to_string()))
    }

    /// Usage changes on every shell visit, projects on every clone, scan
    /// roots hardly ever.
    pub fn default_ttl(&self) -> Duration {
        match self {
            CacheKind::DirUsage => Duration::from_secs(30),
            CacheKind::Projects => Duration::from_secs(5 * 60),
            CacheKind::ProjectDirs => Duration::from_secs(60 * 60),
        }
    }
}

impl std::fmt::Display for CacheKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// TTL front for the store. Its only state is the freshness marker in
/// `cache_metadata`; records are always read back from the store, so two
/// processes never hold diverging copies.
pub struct StoreCache<'a> {
    store: &'a Store,
    ttls: CacheConfig,
}

impl<'a> StoreCache<'a> {
    pub fn new(store: &'a Store, ttls: &CacheConfig) -> Self {
        Self {
            store,
            ttls: ttls.clone(),
        }
    }

    pub fn is_fresh(&self, kind: CacheKind) -> Result<bool> {
        self.is_fresh_at(kind, Utc::now())
    }

    pub fn is_fresh_at(&self, kind: CacheKind, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .store
            .get_cache_metadata(kind.key())?
            .is_some_and(|m| m.is_fresh_at(now)))
    }

    pub fn mark_fresh(&self, kind: CacheKind) -> Result<()> {
        let ttl_seconds = i64::try_from(self.ttls.ttl(kind).as_secs()).unwrap_or(i64::MAX);
        self.store.upsert_cache_metadata(&CacheMetadata {
            cache_key: kind.key().to_string(),
            last_updated: Utc::now(),
            ttl_seconds,
        })
    }

    pub fn invalidate(&self, kind: CacheKind) -> Result<()> {
        self.store.remove_cache_metadata(kind.key())
    }

    pub fn invalidate_all(&self) -> Result<()> {
        for kind in CacheKind::ALL {
            self.invalidate(kind)?;
        }
        Ok(())
    }

    /// Run `refresh` against the store if `kind` is stale, then read with `read`.
    pub fn fetch<T>(
        &self,
        kind: CacheKind,
        refresh: impl FnOnce(&Store) -> Result<()>,
        read: impl FnOnce(&Store) -> Result<T>,
    ) -> Result<T> {
        if self.is_fresh(kind)? {
            tracing::debug!(key = kind.key(), "cache hit");
        } else {
            tracing::debug!(key = kind.key(), "cache miss, refreshing");
            refresh(self.store)?;
            self.mark_fresh(kind)?;
        }
        read(self.store)
    }

    pub fn projects(&self, refresh: impl FnOnce(&Store) -> Result<()>) -> Result<Vec<Project>> {
        self.fetch(CacheKind::Projects, refresh, Store::list_projects)
    }

    pub fn project_dirs(
        &self,
        refresh: impl FnOnce(&Store) -> Result<()>,
    ) -> Result<Vec<ProjectDir>> {
        self.fetch(CacheKind::ProjectDirs, refresh, Store::list_project_dirs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn ttls_ordered_by_volatility() {
        let ttls: Vec<_> = CacheKind::ALL.iter().map(|k| k.default_ttl()).collect();
        assert!(ttls.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn parse_keys() {
        assert_eq!(CacheKind::parse("project_dirs").unwrap(), CacheKind::ProjectDirs);
        assert!(matches!(
            CacheKind::parse("bogus"),
            Err(PesaError::UnknownCacheKey(_))
        ));
    }

    #[test]
    fn refresh_runs_once_within_ttl() {
        let store = Store::open_in_memory().unwrap();
        let cache = StoreCache::new(&store, &CacheConfig::default());
        let calls = Cell::new(0);

        for _ in 0..3 {
            let projects = cache
                .projects(|s| {
                    calls.set(calls.get() + 1);
                    s.upsert_project(&Project::new("/code/a"))
                })
                .unwrap();
            assert_eq!(projects.len(), 1);
        }
        assert_eq!(calls.get(), 1);
        assert!(cache.is_fresh(CacheKind::Projects).unwrap());
        assert!(!cache.is_fresh(CacheKind::ProjectDirs).unwrap());
    }

    #[test]
    fn invalidate_forces_refresh() {
        let store = Store::open_in_memory().unwrap();
        let cache = StoreCache::new(&store, &CacheConfig::default());
        let calls = Cell::new(0);
        let refresh = |_: &Store| {
            calls.set(calls.get() + 1);
            Ok(())
        };

        cache.project_dirs(refresh).unwrap();
        cache.invalidate(CacheKind::ProjectDirs).unwrap();
        cache.project_dirs(refresh).unwrap();
        assert_eq!(calls.get(), 2);

        cache.invalidate_all().unwrap();
        assert!(store.list_cache_metadata().unwrap().is_empty());
    }

    #[test]
    fn reads_come_from_store_not_memory() {
        let store = Store::open_in_memory().unwrap();
        let cache = StoreCache::new(&store, &CacheConfig::default());
        cache.projects(|_| Ok(())).unwrap();

        // a write by someone else is visible on the next read even while fresh
        store.upsert_project(&Project::new("/code/late")).unwrap();
        let projects = cache.projects(|_| panic!("should be fresh")).unwrap();
        assert_eq!(projects.len(), 1);
    }

    #[test]
    fn stale_marker_is_refreshed() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_cache_metadata(&CacheMetadata {
                cache_key: "project_dirs".into(),
                last_updated: Utc::now() - chrono::Duration::hours(2),
                ttl_seconds: 3600,
            })
            .unwrap();
        let cache = StoreCache::new(&store, &CacheConfig::default());
        assert!(!cache.is_fresh(CacheKind::ProjectDirs).unwrap());

        let refreshed = Cell::new(false);
        cache
            .project_dirs(|_| {
                refreshed.set(true);
                Ok(())
            })
            .unwrap();
        assert!(refreshed.get());
        assert!(cache.is_fresh(CacheKind::ProjectDirs).unwrap());
    }
}
