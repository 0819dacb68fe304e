mod types;

pub use types::{StoreStats, Table};
use types::{
    GITHUB_COLUMNS, PROJECT_COLUMNS, cache_metadata_from_row, dir_usage_from_row,
    github_repo_from_row, project_dir_from_row, project_from_row,
};

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{OpenFlags, Transaction, TransactionBehavior, params};

use super::frecency;
use super::records::{CacheMetadata, DirUsage, GitHubRepo, Project, ProjectDir, format_ts};
use super::retry::RetryPolicy;
use crate::config::types::StoreConfig;
use crate::error::{PesaError, Result};

const SCHEMA_VERSION: i32 = 2;

const SCHEMA_V1: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS project_dirs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL UNIQUE,
        last_scanned TEXT NOT NULL,
        git_repos_found INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS projects (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        remote_url TEXT,
        branch TEXT,
        last_modified TEXT NOT NULL,
        git_objects INTEGER NOT NULL DEFAULT 0,
        project_dir_id INTEGER REFERENCES project_dirs(id) ON DELETE SET NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS dir_usage (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL UNIQUE,
        frequency INTEGER NOT NULL DEFAULT 1 CHECK (frequency >= 0),
        last_seen TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS github_repos (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        full_name TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        description TEXT,
        url TEXT NOT NULL,
        clone_url TEXT NOT NULL,
        ssh_url TEXT NOT NULL,
        private INTEGER NOT NULL DEFAULT 0,
        fork INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL,
        discovered_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS cache_metadata (
        cache_key TEXT PRIMARY KEY,
        last_updated TEXT NOT NULL,
        ttl_seconds INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_projects_name ON projects(name);
    CREATE INDEX IF NOT EXISTS idx_projects_updated ON projects(updated_at);
    CREATE INDEX IF NOT EXISTS idx_projects_dir ON projects(project_dir_id);
    CREATE INDEX IF NOT EXISTS idx_github_updated ON github_repos(updated_at);
";

/// At most one row: the manifest of the completed legacy migration.
const SCHEMA_V2: &str = "
    CREATE TABLE IF NOT EXISTS migration (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        migrated_at TEXT NOT NULL,
        manifest TEXT NOT NULL
    );
";

/// Transactional store for projects, scan roots, directory usage, GitHub
/// metadata and cache freshness markers, backed by SQLite in WAL mode.
///
/// Every write is a single `INSERT … ON CONFLICT DO UPDATE` statement keyed by
/// the record's natural key, so concurrent processes never race into a
/// duplicate row or a lost update. Writes that find the writer lock taken are
/// retried with backoff.
pub struct Store {
    conn: rusqlite::Connection,
    retry: RetryPolicy,
}

impl Store {
    /// Open or create the store at the given path. Enables WAL mode.
    pub fn open(path: &Path, config: &StoreConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PesaError::io(parent, e))?;
        }
        let conn = rusqlite::Connection::open(path)?;
        conn.busy_timeout(config.busy_timeout())?;
        let store = Self {
            conn,
            retry: config.retry_policy(),
        };
        store
            .retry
            .run("journal_mode", || Ok(store.conn.pragma_update(None, "journal_mode", "wal")?))?;
        store.conn.pragma_update(None, "foreign_keys", "ON")?;
        store.migrate()?;
        Ok(store)
    }

    /// Open an existing store without write access, for diagnostics.
    pub fn open_read_only(path: &Path, config: &StoreConfig) -> Result<Self> {
        if !path.is_file() {
            return Err(PesaError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "store does not exist"),
            ));
        }
        let conn = rusqlite::Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(config.busy_timeout())?;
        Ok(Self {
            conn,
            retry: config.retry_policy(),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self {
            conn,
            retry: RetryPolicy::default(),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Create or upgrade the schema. Runs under the writer lock so two
    /// processes opening a fresh file at once don't both record a version.
    fn migrate(&self) -> Result<()> {
        self.with_transaction("migrate_schema", |store| {
            let current = store.schema_version()?;
            if current < 1 {
                store.conn.execute_batch(SCHEMA_V1)?;
                store
                    .conn
                    .execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
            }
            if current < 2 {
                store.conn.execute_batch(SCHEMA_V2)?;
                store.conn.execute("UPDATE schema_version SET version = 2", [])?;
            }
            if current < SCHEMA_VERSION {
                tracing::debug!(from = current, to = SCHEMA_VERSION, "store schema upgraded");
            }
            Ok(())
        })
    }

    /// 0 for a file that has no schema yet. Any other failure is an error.
    pub fn schema_version(&self) -> Result<i32> {
        let result = self.conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        });
        match result {
            Ok(version) => Ok(version.unwrap_or(0)),
            Err(rusqlite::Error::SqliteFailure(_, Some(msg))) if msg.starts_with("no such table") => {
                Ok(0)
            }
            Err(e) => Err(storage("schema_version", "schema_version", e)),
        }
    }

    /// Run `f` inside one IMMEDIATE transaction: all of its writes commit
    /// together or not at all. Retried as a whole if the writer lock is held.
    pub fn with_transaction<T>(
        &self,
        op: &'static str,
        mut f: impl FnMut(&Self) -> Result<T>,
    ) -> Result<T> {
        self.retry.run(op, || {
            let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
                .map_err(|e| storage(op, "begin", e))?;
            let out = f(self)?;
            tx.commit().map_err(|e| storage(op, "commit", e))?;
            Ok(out)
        })
    }

    pub(crate) fn conn(&self) -> &rusqlite::Connection {
        &self.conn
    }

    // --- projects ---

    /// Insert or update a project by path. The owning scan root is resolved in
    /// the same statement.
    pub fn upsert_project(&self, project: &Project) -> Result<()> {
        let path = project.path.to_string_lossy();
        self.retry.run("upsert_project", || {
            self.conn
                .execute(
                    "INSERT INTO projects (
                        path, name, remote_url, branch, last_modified, git_objects,
                        project_dir_id, created_at, updated_at
                    ) VALUES (
                        ?1, ?2, ?3, ?4, ?5, ?6,
                        (SELECT id FROM project_dirs
                         WHERE ?1 = path OR substr(?1, 1, length(path) + 1) = path || '/'
                         ORDER BY length(path) DESC LIMIT 1),
                        ?7, ?8
                    )
                    ON CONFLICT(path) DO UPDATE SET
                        name = excluded.name,
                        remote_url = excluded.remote_url,
                        branch = excluded.branch,
                        last_modified = MAX(projects.last_modified, excluded.last_modified),
                        git_objects = excluded.git_objects,
                        project_dir_id = excluded.project_dir_id,
                        updated_at = MAX(projects.updated_at, excluded.updated_at)",
                    params![
                        path,
                        project.name,
                        project.remote_url,
                        project.branch,
                        format_ts(&project.last_modified),
                        project.git_objects,
                        format_ts(&project.created_at),
                        format_ts(&project.updated_at),
                    ],
                )
                .map_err(|e| storage("upsert_project", &path, e))?;
            Ok(())
        })
    }

    pub fn get_project(&self, path: &Path) -> Result<Option<Project>> {
        let key = path.to_string_lossy();
        let result = self.conn.query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE path = ?1"),
            [key.as_ref()],
            project_from_row,
        );
        match result {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(storage("get_project", &key, e)),
        }
    }

    /// All projects, most recently updated first.
    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY updated_at DESC, path"
        ))?;
        let rows = stmt
            .query_map([], project_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| storage("list_projects", "*", e))?;
        Ok(rows)
    }

    /// Every project ranked against `query`: exact name match, then name or
    /// path substring, then the rest. Recency breaks ties within a tier.
    pub fn similar_projects(&self, query: &str, limit: Option<usize>) -> Result<Vec<Project>> {
        self.tiered_projects("similar_projects", query, 2, limit)
    }

    /// Like [`Store::similar_projects`] but only the matching tiers.
    pub fn search_projects(&self, query: &str, limit: Option<usize>) -> Result<Vec<Project>> {
        self.tiered_projects("search_projects", query, 1, limit)
    }

    fn tiered_projects(
        &self,
        op: &'static str,
        query: &str,
        max_tier: i32,
        limit: Option<usize>,
    ) -> Result<Vec<Project>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PROJECT_COLUMNS} FROM (
                SELECT *,
                    CASE
                        WHEN lower(name) = lower(?1) THEN 0
                        WHEN instr(lower(name), lower(?1)) > 0
                          OR instr(lower(path), lower(?1)) > 0 THEN 1
                        ELSE 2
                    END AS tier
                FROM projects
            )
            WHERE tier <= ?2
            ORDER BY tier, updated_at DESC, path
            LIMIT ?3"
        ))?;
        let rows = stmt
            .query_map(params![query, max_tier, limit], project_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| storage(op, query, e))?;
        Ok(rows)
    }

    // --- project dirs ---

    pub fn upsert_project_dir(&self, dir: &ProjectDir) -> Result<()> {
        let path = dir.path.to_string_lossy();
        self.retry.run("upsert_project_dir", || {
            self.conn
                .execute(
                    "INSERT INTO project_dirs (path, last_scanned, git_repos_found)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(path) DO UPDATE SET
                        last_scanned = MAX(project_dirs.last_scanned, excluded.last_scanned),
                        git_repos_found = excluded.git_repos_found",
                    params![path, format_ts(&dir.last_scanned), dir.git_repos_found],
                )
                .map_err(|e| storage("upsert_project_dir", &path, e))?;
            Ok(())
        })
    }

    /// All scan roots, most recently scanned first.
    pub fn list_project_dirs(&self) -> Result<Vec<ProjectDir>> {
        let mut stmt = self.conn.prepare(
            "SELECT path, last_scanned, git_repos_found FROM project_dirs
             ORDER BY last_scanned DESC, path",
        )?;
        let rows = stmt
            .query_map([], project_dir_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| storage("list_project_dirs", "*", e))?;
        Ok(rows)
    }

    // --- dir usage ---

    /// Record one visit to `path`: frequency goes up by exactly one.
    /// Returns the new frequency.
    pub fn record_visit(&self, path: &Path, at: DateTime<Utc>) -> Result<u64> {
        let key = path.to_string_lossy();
        self.retry.run("record_visit", || {
            self.conn
                .query_row(
                    "INSERT INTO dir_usage (path, frequency, last_seen) VALUES (?1, 1, ?2)
                    ON CONFLICT(path) DO UPDATE SET
                        frequency = dir_usage.frequency + 1,
                        last_seen = MAX(dir_usage.last_seen, excluded.last_seen)
                    RETURNING frequency",
                    params![key, format_ts(&at)],
                    |row| row.get(0),
                )
                .map_err(|e| storage("record_visit", &key, e))
        })
    }

    /// Import a usage row. Never lowers a stored frequency, so re-importing is harmless.
    pub fn upsert_dir_usage(&self, usage: &DirUsage) -> Result<()> {
        let key = usage.path.to_string_lossy();
        self.retry.run("upsert_dir_usage", || {
            self.conn
                .execute(
                    "INSERT INTO dir_usage (path, frequency, last_seen) VALUES (?1, ?2, ?3)
                    ON CONFLICT(path) DO UPDATE SET
                        frequency = MAX(dir_usage.frequency, excluded.frequency),
                        last_seen = MAX(dir_usage.last_seen, excluded.last_seen)",
                    params![key, usage.frequency, format_ts(&usage.last_seen)],
                )
                .map_err(|e| storage("upsert_dir_usage", &key, e))?;
            Ok(())
        })
    }

    /// All usage rows in frecency order as of `now`.
    pub fn list_dir_usage(&self, now: DateTime<Utc>) -> Result<Vec<DirUsage>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, frequency, last_seen FROM dir_usage")?;
        let mut rows = stmt
            .query_map([], dir_usage_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| storage("list_dir_usage", "*", e))?;
        frecency::rank(&mut rows, now);
        Ok(rows)
    }

    // --- github repos ---

    /// Insert or update by `full_name`. `discovered_at` keeps the first sighting.
    pub fn upsert_github_repo(&self, repo: &GitHubRepo) -> Result<()> {
        self.retry.run("upsert_github_repo", || {
            self.conn
                .execute(
                    "INSERT INTO github_repos (
                        full_name, name, description, url, clone_url, ssh_url,
                        private, fork, updated_at, discovered_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    ON CONFLICT(full_name) DO UPDATE SET
                        name = excluded.name,
                        description = excluded.description,
                        url = excluded.url,
                        clone_url = excluded.clone_url,
                        ssh_url = excluded.ssh_url,
                        private = excluded.private,
                        fork = excluded.fork,
                        updated_at = MAX(github_repos.updated_at, excluded.updated_at),
                        discovered_at = MIN(github_repos.discovered_at, excluded.discovered_at)",
                    params![
                        repo.full_name,
                        repo.name,
                        repo.description,
                        repo.url,
                        repo.clone_url,
                        repo.ssh_url,
                        repo.private,
                        repo.fork,
                        format_ts(&repo.updated_at),
                        format_ts(&repo.discovered_at),
                    ],
                )
                .map_err(|e| storage("upsert_github_repo", &repo.full_name, e))?;
            Ok(())
        })
    }

    /// All GitHub repos, most recently updated first.
    pub fn list_github_repos(&self) -> Result<Vec<GitHubRepo>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {GITHUB_COLUMNS} FROM github_repos ORDER BY updated_at DESC, full_name"
        ))?;
        let rows = stmt
            .query_map([], github_repo_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| storage("list_github_repos", "*", e))?;
        Ok(rows)
    }

    // --- cache metadata ---

    pub fn upsert_cache_metadata(&self, meta: &CacheMetadata) -> Result<()> {
        self.retry.run("upsert_cache_metadata", || {
            self.conn
                .execute(
                    "INSERT INTO cache_metadata (cache_key, last_updated, ttl_seconds)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(cache_key) DO UPDATE SET
                        last_updated = MAX(cache_metadata.last_updated, excluded.last_updated),
                        ttl_seconds = excluded.ttl_seconds",
                    params![meta.cache_key, format_ts(&meta.last_updated), meta.ttl_seconds],
                )
                .map_err(|e| storage("upsert_cache_metadata", &meta.cache_key, e))?;
            Ok(())
        })
    }

    pub fn get_cache_metadata(&self, key: &str) -> Result<Option<CacheMetadata>> {
        let result = self.conn.query_row(
            "SELECT cache_key, last_updated, ttl_seconds FROM cache_metadata WHERE cache_key = ?1",
            [key],
            cache_metadata_from_row,
        );
        match result {
            Ok(m) => Ok(Some(m)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(storage("get_cache_metadata", key, e)),
        }
    }

    pub fn list_cache_metadata(&self) -> Result<Vec<CacheMetadata>> {
        let mut stmt = self.conn.prepare(
            "SELECT cache_key, last_updated, ttl_seconds FROM cache_metadata ORDER BY cache_key",
        )?;
        let rows = stmt
            .query_map([], cache_metadata_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| storage("list_cache_metadata", "*", e))?;
        Ok(rows)
    }

    /// Drop a freshness marker so the next read refreshes.
    pub fn remove_cache_metadata(&self, key: &str) -> Result<()> {
        self.retry.run("remove_cache_metadata", || {
            self.conn
                .execute("DELETE FROM cache_metadata WHERE cache_key = ?1", [key])
                .map_err(|e| storage("remove_cache_metadata", key, e))?;
            Ok(())
        })
    }

    // --- migration record ---

    /// The recorded migration manifest (as JSON), if a migration completed.
    pub fn migration_manifest(&self) -> Result<Option<String>> {
        let result = self
            .conn
            .query_row("SELECT manifest FROM migration WHERE id = 1", [], |row| row.get(0));
        match result {
            Ok(manifest) => Ok(Some(manifest)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(storage("migration_manifest", "migration", e)),
        }
    }

    /// Record the migration manifest, replacing any earlier one.
    /// Callers that merge with an existing record do so inside `with_transaction`.
    pub fn put_migration_manifest(&self, migrated_at: DateTime<Utc>, manifest: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO migration (id, migrated_at, manifest) VALUES (1, ?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET
                     migrated_at = excluded.migrated_at,
                     manifest = excluded.manifest",
                params![format_ts(&migrated_at), manifest],
            )
            .map_err(|e| storage("put_migration_manifest", "migration", e))?;
        Ok(())
    }

    /// Drop the migration record. Returns false if there was none.
    pub fn remove_migration_manifest(&self) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM migration WHERE id = 1", [])
            .map_err(|e| storage("remove_migration_manifest", "migration", e))?;
        Ok(n > 0)
    }

    // --- whole-store ---

    /// Delete every row of the given tables in one transaction.
    /// Returns how many rows each table lost.
    pub fn clear(&self, tables: &[Table]) -> Result<StoreStats> {
        let cleared = self.with_transaction("clear", |store| store.delete_rows(tables))?;
        tracing::info!(?cleared, "tables cleared");
        Ok(cleared)
    }

    /// `clear` without its own transaction, for use inside `with_transaction`.
    pub fn delete_rows(&self, tables: &[Table]) -> Result<StoreStats> {
        let mut cleared = StoreStats::new();
        for table in tables {
            let n = self
                .conn
                .execute(&format!("DELETE FROM {}", table.name()), [])
                .map_err(|e| storage("clear", table.name(), e))?;
            cleared.insert(*table, n);
        }
        Ok(cleared)
    }

    /// Row count per table.
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::new();
        for table in Table::ALL {
            let n: usize = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table.name()), [], |row| {
                    row.get(0)
                })
                .map_err(|e| storage("stats", table.name(), e))?;
            stats.insert(table, n);
        }
        Ok(stats)
    }
}

fn storage(op: &'static str, key: &str, source: rusqlite::Error) -> PesaError {
    PesaError::Storage {
        op,
        key: key.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::path::PathBuf;

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 9, 0, 0).unwrap()
    }

    fn make_project(path: &str, updated: DateTime<Utc>) -> Project {
        let mut p = Project::new(path);
        p.remote_url = Some("git@github.com:initech/api-gateway.git".into());
        p.branch = Some("main".into());
        p.last_modified = updated;
        p.git_objects = 120;
        p.created_at = updated;
        p.updated_at = updated;
        p
    }

    fn make_github(full_name: &str, at: DateTime<Utc>) -> GitHubRepo {
        let name = full_name.split('/').nth(1).unwrap().to_string();
        GitHubRepo {
            name: name.clone(),
            full_name: full_name.to_string(),
            description: Some("a repo".into()),
            url: format!("https://github.com/{full_name}"),
            clone_url: format!("https://github.com/{full_name}.git"),
            ssh_url: format!("git@github.com:{full_name}.git"),
            private: false,
            fork: false,
            updated_at: at,
            discovered_at: at,
        }
    }

    #[test]
    fn open_in_memory_and_migrate() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn reopen_file_store_keeps_single_version_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/pesa.db");
        drop(Store::open(&path, &StoreConfig::default()).unwrap());
        let store = Store::open(&path, &StoreConfig::default()).unwrap();
        let rows: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn version_one_file_is_upgraded_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pesa.db");
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute_batch(SCHEMA_V1).unwrap();
            conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])
                .unwrap();
        }
        let store = Store::open(&path, &StoreConfig::default()).unwrap();
        assert_eq!(store.schema_version().unwrap(), 2);
        assert_eq!(store.migration_manifest().unwrap(), None);
        let rows: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn unreadable_version_table_is_an_error_not_zero() {
        let store = Store::open_in_memory().unwrap();
        store
            .conn
            .execute_batch(
                "DROP TABLE schema_version;
                 CREATE TABLE schema_version (v INTEGER);",
            )
            .unwrap();
        let err = store.schema_version().unwrap_err();
        assert!(err.to_string().contains("schema_version"), "{err}");
    }

    #[test]
    fn migration_record_put_replace_remove() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.migration_manifest().unwrap(), None);
        store.put_migration_manifest(t(1), r#"{"files":[]}"#).unwrap();
        store.put_migration_manifest(t(2), r#"{"files":[1]}"#).unwrap();
        assert_eq!(store.migration_manifest().unwrap().as_deref(), Some(r#"{"files":[1]}"#));
        assert!(store.remove_migration_manifest().unwrap());
        assert!(!store.remove_migration_manifest().unwrap());
        assert_eq!(store.migration_manifest().unwrap(), None);
    }

    #[test]
    fn upsert_project_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let mut p = make_project("/code/api-gateway", t(1));
        store.upsert_project(&p).unwrap();

        p.branch = Some("feature/auth".into());
        p.git_objects = 300;
        p.updated_at = t(2);
        store.upsert_project(&p).unwrap();

        assert_eq!(store.stats().unwrap()[&Table::Projects], 1);
        let loaded = store.get_project(Path::new("/code/api-gateway")).unwrap().unwrap();
        assert_eq!(loaded.branch.as_deref(), Some("feature/auth"));
        assert_eq!(loaded.git_objects, 300);
        assert_eq!(loaded.updated_at, t(2));
    }

    #[test]
    fn upsert_keeps_newest_timestamps_and_created_at() {
        let store = Store::open_in_memory().unwrap();
        let mut p = make_project("/code/a", t(5));
        store.upsert_project(&p).unwrap();

        p.last_modified = t(3);
        p.updated_at = t(3);
        p.created_at = t(4);
        store.upsert_project(&p).unwrap();

        let loaded = store.get_project(Path::new("/code/a")).unwrap().unwrap();
        assert_eq!(loaded.last_modified, t(5));
        assert_eq!(loaded.updated_at, t(5));
        assert_eq!(loaded.created_at, t(5));
    }

    #[test]
    fn project_links_to_longest_containing_dir() {
        let store = Store::open_in_memory().unwrap();
        for path in ["/home/u", "/home/u/code"] {
            store
                .upsert_project_dir(&ProjectDir {
                    path: PathBuf::from(path),
                    last_scanned: t(1),
                    git_repos_found: 1,
                })
                .unwrap();
        }
        store.upsert_project(&make_project("/home/u/code/a", t(1))).unwrap();
        store.upsert_project(&make_project("/home/u/codex", t(1))).unwrap();

        let dir_of = |p: &str| -> Option<String> {
            store
                .conn
                .query_row(
                    "SELECT d.path FROM projects p LEFT JOIN project_dirs d ON d.id = p.project_dir_id
                     WHERE p.path = ?1",
                    [p],
                    |r| r.get(0),
                )
                .unwrap()
        };
        assert_eq!(dir_of("/home/u/code/a").as_deref(), Some("/home/u/code"));
        assert_eq!(dir_of("/home/u/codex").as_deref(), Some("/home/u"));
    }

    #[test]
    fn list_projects_most_recent_first() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_project(&make_project("/code/old", t(1))).unwrap();
        store.upsert_project(&make_project("/code/new", t(9))).unwrap();
        store.upsert_project(&make_project("/code/mid", t(5))).unwrap();

        let names: Vec<_> = store
            .list_projects()
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["new", "mid", "old"]);
    }

    #[test]
    fn similar_projects_three_tiers() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_project(&make_project("/code/web-frontend", t(9))).unwrap();
        store.upsert_project(&make_project("/code/API", t(1))).unwrap();
        store.upsert_project(&make_project("/code/api-gateway", t(3))).unwrap();
        store.upsert_project(&make_project("/code/rapid", t(7))).unwrap();
        store.upsert_project(&make_project("/srv/api/legacy", t(2))).unwrap();

        let names: Vec<_> = store
            .similar_projects("api", None)
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        // exact (case-insensitive), then substring by recency, then the rest
        assert_eq!(names, vec!["API", "rapid", "api-gateway", "legacy", "web-frontend"]);

        let matches = store.search_projects("api", Some(2)).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].name, "API");

        let all_matches = store.search_projects("api", None).unwrap();
        assert_eq!(all_matches.len(), 4);
    }

    #[test]
    fn visits_increment_by_one() {
        let store = Store::open_in_memory().unwrap();
        let path = Path::new("/home/u/code");
        let mut last = 0;
        for i in 0..5 {
            let f = store.record_visit(path, t(1) + Duration::hours(i)).unwrap();
            assert_eq!(f, last + 1);
            last = f;
        }
        let rows = store.list_dir_usage(t(2)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].frequency, 5);
        assert_eq!(rows[0].last_seen, t(1) + Duration::hours(4));
    }

    #[test]
    fn older_visit_does_not_rewind_last_seen() {
        let store = Store::open_in_memory().unwrap();
        let path = Path::new("/tmp/x");
        store.record_visit(path, t(5)).unwrap();
        store.record_visit(path, t(2)).unwrap();
        let rows = store.list_dir_usage(t(6)).unwrap();
        assert_eq!(rows[0].last_seen, t(5));
        assert_eq!(rows[0].frequency, 2);
    }

    #[test]
    fn usage_import_never_lowers_frequency() {
        let store = Store::open_in_memory().unwrap();
        let usage = DirUsage {
            path: PathBuf::from("/code"),
            frequency: 10,
            last_seen: t(1),
        };
        store.upsert_dir_usage(&usage).unwrap();
        store
            .upsert_dir_usage(&DirUsage {
                frequency: 3,
                ..usage.clone()
            })
            .unwrap();
        assert_eq!(store.list_dir_usage(t(2)).unwrap()[0].frequency, 10);
    }

    #[test]
    fn dir_usage_listed_by_frecency() {
        let store = Store::open_in_memory().unwrap();
        for _ in 0..50 {
            store.record_visit(Path::new("/old"), t(1)).unwrap();
        }
        store.record_visit(Path::new("/new"), t(28)).unwrap();
        let now = t(28);
        let rows = store.list_dir_usage(now).unwrap();
        // 50 / (1 + 27) > 1 / 1
        assert_eq!(rows[0].path, PathBuf::from("/old"));
        let rows = store.list_dir_usage(now + Duration::days(300)).unwrap();
        assert_eq!(rows[0].path, PathBuf::from("/old"));
    }

    #[test]
    fn github_resync_preserves_identity_and_discovery() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_github_repo(&make_github("initech/tps", t(1))).unwrap();

        let mut again = make_github("initech/tps", t(8));
        again.description = Some("reports".into());
        again.private = true;
        store.upsert_github_repo(&again).unwrap();

        let repos = store.list_github_repos().unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].full_name, "initech/tps");
        assert_eq!(repos[0].description.as_deref(), Some("reports"));
        assert!(repos[0].private);
        assert_eq!(repos[0].updated_at, t(8));
        assert_eq!(repos[0].discovered_at, t(1));
    }

    #[test]
    fn cache_metadata_roundtrip_and_remove() {
        let store = Store::open_in_memory().unwrap();
        let meta = CacheMetadata {
            cache_key: "projects".into(),
            last_updated: t(3),
            ttl_seconds: 300,
        };
        store.upsert_cache_metadata(&meta).unwrap();
        assert_eq!(store.get_cache_metadata("projects").unwrap(), Some(meta));

        store.remove_cache_metadata("projects").unwrap();
        store.remove_cache_metadata("projects").unwrap();
        assert!(store.get_cache_metadata("projects").unwrap().is_none());
    }

    #[test]
    fn stats_count_and_clear() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..7 {
            store
                .upsert_project(&make_project(&format!("/code/p{i}"), t(1)))
                .unwrap();
        }
        store.record_visit(Path::new("/code"), t(1)).unwrap();
        store.upsert_github_repo(&make_github("a/b", t(1))).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats[&Table::Projects], 7);
        assert_eq!(stats[&Table::DirUsage], 1);
        assert_eq!(stats[&Table::GithubRepos], 1);
        assert_eq!(stats[&Table::ProjectDirs], 0);

        let cleared = store.clear(&Table::ALL).unwrap();
        assert_eq!(cleared[&Table::Projects], 7);
        assert!(store.stats().unwrap().values().all(|&n| n == 0));
    }

    #[test]
    fn clear_only_named_tables() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_project(&make_project("/code/a", t(1))).unwrap();
        store.record_visit(Path::new("/code"), t(1)).unwrap();
        store.clear(&[Table::Projects]).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats[&Table::Projects], 0);
        assert_eq!(stats[&Table::DirUsage], 1);
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let store = Store::open_in_memory().unwrap();
        let result: Result<()> = store.with_transaction("test", |s| {
            s.upsert_project(&make_project("/code/a", t(1)))?;
            Err(PesaError::Corrupt("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.stats().unwrap()[&Table::Projects], 0);
    }

    #[test]
    fn read_only_store_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pesa.db");
        let rw = Store::open(&path, &StoreConfig::default()).unwrap();
        rw.upsert_project(&make_project("/code/a", t(1))).unwrap();

        let ro = Store::open_read_only(&path, &StoreConfig::default()).unwrap();
        assert_eq!(ro.list_projects().unwrap().len(), 1);
        assert!(ro.upsert_project(&make_project("/code/b", t(1))).is_err());
    }

    #[test]
    fn read_only_missing_store_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Store::open_read_only(&dir.path().join("none.db"), &StoreConfig::default()).is_err());
    }

    #[test]
    fn storage_errors_name_op_and_key() {
        let store = Store::open_in_memory().unwrap();
        store.conn.execute_batch("DROP TABLE github_repos").unwrap();
        let err = store.upsert_github_repo(&make_github("a/b", t(1))).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("upsert_github_repo"), "{msg}");
        assert!(msg.contains("a/b"), "{msg}");
    }
}
