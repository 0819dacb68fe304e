//! Read-only health checks over the store. Reports findings, never repairs.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::cache::CacheKind;
use super::records::parse_ts;
use super::store::{Store, StoreStats, Table};

/// Tolerated clock skew for freshness timestamps written by other processes.
const CLOCK_SKEW_SECS: i64 = 60;

/// Entity timestamp columns; `cache_metadata.last_updated` has its own check.
const TIMESTAMP_COLUMNS: [(Table, &str); 7] = [
    (Table::Projects, "last_modified"),
    (Table::Projects, "created_at"),
    (Table::Projects, "updated_at"),
    (Table::ProjectDirs, "last_scanned"),
    (Table::DirUsage, "last_seen"),
    (Table::GithubRepos, "updated_at"),
    (Table::GithubRepos, "discovered_at"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckName {
    Structure,
    ForeignKeys,
    Orphans,
    Duplicates,
    Timestamps,
    CacheMetadata,
}

impl CheckName {
    pub fn label(&self) -> &'static str {
        match self {
            CheckName::Structure => "structure",
            CheckName::ForeignKeys => "foreign keys",
            CheckName::Orphans => "orphans",
            CheckName::Duplicates => "duplicates",
            CheckName::Timestamps => "timestamps",
            CheckName::CacheMetadata => "cache metadata",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: CheckName,
    pub passed: bool,
    pub findings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub checks: Vec<CheckResult>,
    pub counts: StoreStats,
    /// Why `counts` could not be taken, if it couldn't.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts_error: Option<String>,
}

impl IntegrityReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed) && self.counts_error.is_none()
    }

    pub fn check(&self, name: CheckName) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    /// False when the database file itself is damaged.
    pub fn structure_ok(&self) -> bool {
        self.check(CheckName::Structure).is_some_and(|c| c.passed)
    }

    pub fn summary(&self) -> String {
        let failed: Vec<_> = self.checks.iter().filter(|c| !c.passed).collect();
        let rows: usize = self.counts.values().sum();
        if let Some(err) = &self.counts_error {
            format!(
                "{} of {} checks failed; row counts unavailable: {}",
                failed.len(),
                self.checks.len(),
                err
            )
        } else if failed.is_empty() {
            format!("all {} checks passed ({} rows)", self.checks.len(), rows)
        } else {
            let findings: usize = failed.iter().map(|c| c.findings.len()).sum();
            let names: Vec<_> = failed.iter().map(|c| c.name.label()).collect();
            format!(
                "{} of {} checks failed: {} ({} findings)",
                failed.len(),
                self.checks.len(),
                names.join(", "),
                findings
            )
        }
    }
}

pub struct IntegrityChecker<'a> {
    store: &'a Store,
}

impl<'a> IntegrityChecker<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn run(&self) -> IntegrityReport {
        self.run_at(Utc::now())
    }

    /// Run every check. A check whose query fails is reported as failed
    /// with the error, the others still run.
    pub fn run_at(&self, now: DateTime<Utc>) -> IntegrityReport {
        let checks = vec![
            self.checked(CheckName::Structure, || self.structure()),
            self.checked(CheckName::ForeignKeys, || self.foreign_keys()),
            self.checked(CheckName::Orphans, || self.orphans()),
            self.checked(CheckName::Duplicates, || self.duplicates()),
            self.checked(CheckName::Timestamps, || self.timestamps()),
            self.checked(CheckName::CacheMetadata, || self.cache_metadata(now)),
        ];
        let (counts, counts_error) = match self.store.stats() {
            Ok(counts) => (counts, None),
            Err(e) => {
                tracing::warn!(error = %e, "row counts could not be taken");
                (StoreStats::new(), Some(e.to_string()))
            }
        };
        let report = IntegrityReport {
            checks,
            counts,
            counts_error,
        };
        tracing::info!(passed = report.passed(), "integrity check finished");
        report
    }

    fn checked(
        &self,
        name: CheckName,
        check: impl FnOnce() -> rusqlite::Result<Vec<String>>,
    ) -> CheckResult {
        match check() {
            Ok(findings) => CheckResult {
                name,
                passed: findings.is_empty(),
                findings,
            },
            Err(e) => {
                tracing::warn!(check = name.label(), error = %e, "check could not run");
                CheckResult {
                    name,
                    passed: false,
                    findings: vec![format!("check could not run: {e}")],
                }
            }
        }
    }

    fn strings(&self, sql: &str) -> rusqlite::Result<Vec<String>> {
        let mut stmt = self.store.conn().prepare(sql)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn structure(&self) -> rusqlite::Result<Vec<String>> {
        let rows = self.strings("PRAGMA integrity_check")?;
        Ok(rows
            .into_iter()
            .filter(|r| !r.eq_ignore_ascii_case("ok"))
            .collect())
    }

    fn foreign_keys(&self) -> rusqlite::Result<Vec<String>> {
        let mut stmt = self.store.conn().prepare("PRAGMA foreign_key_check")?;
        let rows = stmt
            .query_map([], |row| {
                let table: String = row.get(0)?;
                let rowid: Option<i64> = row.get(1)?;
                let parent: String = row.get(2)?;
                Ok(format!(
                    "{} row {} references missing {} row",
                    table,
                    rowid.map(|r| r.to_string()).unwrap_or_else(|| "?".into()),
                    parent
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn orphans(&self) -> rusqlite::Result<Vec<String>> {
        let mut findings = Vec::new();

        for path in self.strings(
            "SELECT path FROM projects
             WHERE project_dir_id IS NOT NULL
               AND project_dir_id NOT IN (SELECT id FROM project_dirs)
             ORDER BY path",
        )? {
            findings.push(format!("project {path} points at a scan root that no longer exists"));
        }

        let known: Vec<&str> = CacheKind::ALL.iter().map(|k| k.key()).collect();
        for key in self.strings("SELECT cache_key FROM cache_metadata ORDER BY cache_key")? {
            if !known.contains(&key.as_str()) {
                findings.push(format!("cache metadata for unknown key {key:?}"));
            }
        }

        Ok(findings)
    }

    fn duplicates(&self) -> rusqlite::Result<Vec<String>> {
        let mut findings = Vec::new();
        for table in [Table::Projects, Table::ProjectDirs, Table::DirUsage, Table::GithubRepos] {
            let col = table.key_column();
            let normalized = match table {
                Table::GithubRepos => format!("lower({col})"),
                _ => format!("CASE WHEN {col} = '/' THEN {col} ELSE rtrim({col}, '/') END"),
            };
            let mut stmt = self.store.conn().prepare(&format!(
                "SELECT {normalized} AS k, COUNT(*) FROM {} GROUP BY k HAVING COUNT(*) > 1 ORDER BY k",
                table.name()
            ))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for (key, count) in rows {
                findings.push(format!("{table}: {count} rows share key {key}"));
            }
        }
        Ok(findings)
    }

    /// Timestamps that don't parse read back as the epoch and sink to the
    /// bottom of every recency ordering.
    fn timestamps(&self) -> rusqlite::Result<Vec<String>> {
        let mut findings = Vec::new();
        for (table, col) in TIMESTAMP_COLUMNS {
            let key = table.key_column();
            let mut stmt = self.store.conn().prepare(&format!(
                "SELECT {key}, {col} FROM {} ORDER BY {key}",
                table.name()
            ))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for (k, value) in rows {
                if parse_ts(&value).is_none() {
                    findings.push(format!("{table} {k}: unparsable {col} {value:?}"));
                }
            }
        }
        Ok(findings)
    }

    fn cache_metadata(&self, now: DateTime<Utc>) -> rusqlite::Result<Vec<String>> {
        let mut stmt = self
            .store
            .conn()
            .prepare("SELECT cache_key, last_updated, ttl_seconds FROM cache_metadata ORDER BY cache_key")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let limit = now + chrono::Duration::seconds(CLOCK_SKEW_SECS);
        let mut findings = Vec::new();
        for (key, last_updated, ttl) in rows {
            if ttl <= 0 {
                findings.push(format!("{key}: ttl_seconds is {ttl}"));
            }
            match parse_ts(&last_updated) {
                None => findings.push(format!("{key}: unparsable last_updated {last_updated:?}")),
                Some(ts) if ts > limit => {
                    findings.push(format!("{key}: last_updated {last_updated} is in the future"))
                }
                Some(_) => {}
            }
        }
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::StoreConfig;
    use crate::core::records::{CacheMetadata, Project, ProjectDir};
    use std::path::{Path, PathBuf};

    fn healthy() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_project_dir(&ProjectDir {
                path: PathBuf::from("/code"),
                last_scanned: Utc::now(),
                git_repos_found: 1,
            })
            .unwrap();
        store.upsert_project(&Project::new("/code/a")).unwrap();
        store
            .upsert_cache_metadata(&CacheMetadata {
                cache_key: "projects".into(),
                last_updated: Utc::now(),
                ttl_seconds: 300,
            })
            .unwrap();
        store
    }

    #[test]
    fn healthy_store_passes() {
        let store = healthy();
        let report = IntegrityChecker::new(&store).run();
        assert!(report.passed(), "{:?}", report.checks);
        assert_eq!(report.checks.len(), 6);
        assert_eq!(report.counts[&Table::Projects], 1);
        assert!(report.summary().starts_with("all 6 checks passed"));
    }

    #[test]
    fn dangling_reference_is_reported() {
        let store = healthy();
        store
            .conn()
            .execute_batch(
                "PRAGMA foreign_keys = OFF;
                 UPDATE projects SET project_dir_id = 999;",
            )
            .unwrap();
        let report = IntegrityChecker::new(&store).run();
        assert!(!report.check(CheckName::ForeignKeys).unwrap().passed);
        let orphans = report.check(CheckName::Orphans).unwrap();
        assert!(!orphans.passed);
        assert!(orphans.findings[0].contains("/code/a"));
        assert!(report.structure_ok());
    }

    #[test]
    fn project_outside_registered_roots_is_not_an_orphan() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_project(&Project::new("/work/legacy")).unwrap();
        store
            .upsert_project_dir(&ProjectDir {
                path: PathBuf::from("/home/u/code"),
                last_scanned: Utc::now(),
                git_repos_found: 0,
            })
            .unwrap();
        let report = IntegrityChecker::new(&store).run();
        assert!(report.passed(), "{}", report.summary());
        assert!(report.check(CheckName::Orphans).unwrap().findings.is_empty());
    }

    #[test]
    fn unparsable_entity_timestamps_are_reported() {
        let store = healthy();
        store.record_visit(Path::new("/code/a"), Utc::now()).unwrap();
        store
            .conn()
            .execute_batch(
                "UPDATE dir_usage SET last_seen = 'last tuesday';
                 UPDATE projects SET updated_at = '';",
            )
            .unwrap();
        let report = IntegrityChecker::new(&store).run();
        let check = report.check(CheckName::Timestamps).unwrap();
        assert!(!check.passed);
        assert_eq!(check.findings.len(), 2);
        assert!(check.findings.iter().any(|f| f.contains("dir_usage /code/a: unparsable last_seen")));
        assert!(check.findings.iter().any(|f| f.contains("projects /code/a: unparsable updated_at")));
        assert!(report.check(CheckName::CacheMetadata).unwrap().passed);
    }

    #[test]
    fn row_count_failure_is_reported_not_zeroed() {
        let store = healthy();
        store.conn().execute_batch("DROP TABLE github_repos;").unwrap();
        let report = IntegrityChecker::new(&store).run();
        assert!(!report.passed());
        let err = report.counts_error.as_deref().unwrap();
        assert!(err.contains("github_repos"), "{err}");
        assert!(report.summary().contains("row counts unavailable"));
    }

    #[test]
    fn trailing_slash_duplicates_are_reported() {
        let store = healthy();
        store.upsert_project(&Project::new("/code/a/")).unwrap();
        let report = IntegrityChecker::new(&store).run();
        let dupes = report.check(CheckName::Duplicates).unwrap();
        assert!(!dupes.passed);
        assert!(dupes.findings[0].contains("projects: 2 rows share key /code/a"));
    }

    #[test]
    fn bad_cache_metadata_is_reported() {
        let store = healthy();
        store
            .conn()
            .execute_batch(
                "INSERT INTO cache_metadata VALUES ('dir_usage', 'yesterday-ish', 30);
                 INSERT INTO cache_metadata VALUES ('project_dirs', '2999-01-01T00:00:00.000000Z', 0);",
            )
            .unwrap();
        let report = IntegrityChecker::new(&store).run();
        let meta = report.check(CheckName::CacheMetadata).unwrap();
        assert!(!meta.passed);
        assert_eq!(meta.findings.len(), 3);
        assert!(report.summary().contains("cache metadata"));
    }

    #[test]
    fn unknown_cache_key_is_orphan() {
        let store = healthy();
        store
            .upsert_cache_metadata(&CacheMetadata {
                cache_key: "github".into(),
                last_updated: Utc::now(),
                ttl_seconds: 60,
            })
            .unwrap();
        let report = IntegrityChecker::new(&store).run();
        assert!(!report.check(CheckName::Orphans).unwrap().passed);
    }

    #[test]
    fn garbage_file_fails_structure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pesa.db");
        std::fs::write(&path, vec![0x42u8; 8192]).unwrap();
        let store = Store::open_read_only(&path, &StoreConfig::default()).unwrap();
        let report = IntegrityChecker::new(&store).run();
        assert!(!report.structure_ok());
        assert!(!report.passed());
    }

    #[test]
    fn checker_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pesa.db");
        {
            let store = Store::open(&path, &StoreConfig::default()).unwrap();
            store.upsert_project(&Project::new("/code/a")).unwrap();
        }
        let ro = Store::open_read_only(&path, &StoreConfig::default()).unwrap();
        let before = ro.stats().unwrap();
        let report = IntegrityChecker::new(&ro).run();
        assert!(report.passed(), "{:?}", report.checks);
        assert_eq!(ro.stats().unwrap(), before);
    }
}
