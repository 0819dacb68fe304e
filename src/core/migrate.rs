//! One-shot move of the legacy JSON file cache into the store, and its reverse.
//!
//! `NotMigrated --migrate--> Migrated --rollback--> NotMigrated`. The state is
//! the manifest row in the store's `migration` table. It is recorded in one
//! IMMEDIATE transaction once every legacy file present has been imported, and
//! before any original is removed, so concurrent runs agree on a single manifest.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cache::{CacheKind, CachePayload, FileCache, decode};
use super::cancel::CancelToken;
use super::store::{Store, StoreStats, Table};
use crate::error::{PesaError, Result};

/// Scan roots go first so imported projects can link to them.
const IMPORT_ORDER: [CacheKind; 3] = [CacheKind::ProjectDirs, CacheKind::Projects, CacheKind::DirUsage];

/// Which table a legacy cache key is imported into.
pub fn table_for(kind: CacheKind) -> Table {
    match kind {
        CacheKind::Projects => Table::Projects,
        CacheKind::ProjectDirs => Table::ProjectDirs,
        CacheKind::DirUsage => Table::DirUsage,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub migrated_at: DateTime<Utc>,
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub kind: CacheKind,
    pub original: PathBuf,
    pub backup: PathBuf,
    pub records: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationState {
    NotMigrated { pending: Vec<CacheKind> },
    Migrated(Manifest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrateOutcome {
    /// Every present legacy file was imported; state is now Migrated.
    Completed,
    /// No legacy files were found.
    NothingToMigrate,
    /// Some files failed; the rest are committed and a re-run is safe.
    Partial,
    /// Stopped early; committed files stay committed.
    Cancelled,
    /// Another run recorded the migration; nothing of ours was added to it.
    AlreadyMigrated,
}

/// Progress of a migration run, one event per legacy file.
#[derive(Debug)]
pub enum MigrateEvent<'a> {
    Imported { kind: CacheKind, records: usize },
    Failed { kind: CacheKind, path: &'a Path },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub outcome: MigrateOutcome,
    pub imported: StoreStats,
    pub failed: Vec<FailedFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub restored: Vec<PathBuf>,
    pub cleared: StoreStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyLine {
    pub table: Table,
    pub expected: usize,
    pub actual: usize,
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub ok: bool,
    pub lines: Vec<VerifyLine>,
}

pub struct Migrator<'a> {
    store: &'a Store,
    cache: FileCache,
    backup_dir: PathBuf,
}

impl<'a> Migrator<'a> {
    pub fn new(store: &'a Store, cache: FileCache, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            cache,
            backup_dir: backup_dir.into(),
        }
    }

    pub fn status(&self) -> Result<MigrationState> {
        match self.store.migration_manifest()? {
            Some(json) => Ok(MigrationState::Migrated(parse_manifest(&json)?)),
            None => Ok(MigrationState::NotMigrated {
                pending: self.cache.present(),
            }),
        }
    }

    /// Import every present legacy file. Malformed files are collected, not fatal.
    /// `progress` hears about each file once its import has committed or failed.
    pub fn migrate(
        &self,
        cancel: &CancelToken,
        progress: Option<&dyn Fn(MigrateEvent)>,
    ) -> Result<MigrationReport> {
        if let MigrationState::Migrated(manifest) = self.status()? {
            tracing::info!(at = %manifest.migrated_at, "migration already applied");
            return Ok(MigrationReport {
                outcome: MigrateOutcome::AlreadyMigrated,
                imported: StoreStats::new(),
                failed: Vec::new(),
            });
        }

        std::fs::create_dir_all(&self.backup_dir).map_err(|e| PesaError::io(&self.backup_dir, e))?;
        // Backups are named per run so a concurrent run never overwrites ours.
        let run_id = format!("{}-{}", std::process::id(), Utc::now().format("%Y%m%dT%H%M%S%.9f"));
        let mut done = Vec::new();
        let mut failed = Vec::new();
        let mut imported = StoreStats::new();
        let mut cancelled = false;

        for kind in IMPORT_ORDER {
            if cancel.is_cancelled() {
                tracing::warn!("migration cancelled");
                cancelled = true;
                break;
            }
            let original = self.cache.path_for(kind);
            if !original.is_file() {
                continue;
            }
            let backup = self.backup_dir.join(format!("{}.{run_id}.json", kind.key()));

            match self.migrate_file(kind, &original, &backup) {
                Ok(Some(records)) => {
                    tracing::info!(key = kind.key(), records, "legacy cache file imported");
                    imported.insert(table_for(kind), records);
                    done.push(ManifestFile {
                        kind,
                        original,
                        backup,
                        records,
                    });
                    emit(progress, MigrateEvent::Imported { kind, records });
                }
                Ok(None) => {
                    tracing::info!(key = kind.key(), "legacy file vanished mid-run, another run owns it");
                }
                Err(e) => {
                    tracing::warn!(path = %original.display(), error = %e, "skipping legacy cache file");
                    emit(progress, MigrateEvent::Failed { kind, path: &original });
                    failed.push(FailedFile {
                        path: original,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let outcome = if cancelled {
            MigrateOutcome::Cancelled
        } else if !failed.is_empty() {
            MigrateOutcome::Partial
        } else {
            return Ok(MigrationReport {
                outcome: self.record(done)?,
                imported,
                failed,
            });
        };

        // Rows stay committed; a re-run makes fresh backups.
        discard_backups(&done);
        Ok(MigrationReport {
            outcome,
            imported,
            failed,
        })
    }

    /// Record `done` as the migration manifest, merging into one another run
    /// recorded first, then remove the originals that were newly recorded.
    fn record(&self, done: Vec<ManifestFile>) -> Result<MigrateOutcome> {
        let now = Utc::now();
        let (recorded, joined) = self.store.with_transaction("record_migration", |store| {
            let existing = store.migration_manifest()?.map(|json| parse_manifest(&json)).transpose()?;
            let joined = existing.is_some();
            let mut manifest = existing.unwrap_or_else(|| Manifest {
                migrated_at: now,
                files: Vec::new(),
            });
            let mut recorded = Vec::new();
            for file in &done {
                if !manifest.files.iter().any(|f| f.kind == file.kind) {
                    manifest.files.push(file.clone());
                    recorded.push(file.clone());
                }
            }
            if !recorded.is_empty() {
                store.put_migration_manifest(manifest.migrated_at, &encode_manifest(&manifest)?)?;
            }
            Ok((recorded, joined))
        })?;

        let superseded: Vec<ManifestFile> = done
            .into_iter()
            .filter(|f| !recorded.iter().any(|r| r.kind == f.kind))
            .collect();
        discard_backups(&superseded);

        // Originals go only once the manifest naming their backups is committed.
        for file in &recorded {
            remove_if_present(&file.original)?;
        }

        Ok(match (recorded.is_empty(), joined) {
            (false, _) => MigrateOutcome::Completed,
            (true, true) => MigrateOutcome::AlreadyMigrated,
            (true, false) => MigrateOutcome::NothingToMigrate,
        })
    }

    /// Back up, decode and import one file in a single transaction.
    /// `Ok(None)` if the file disappeared before it could be backed up.
    fn migrate_file(&self, kind: CacheKind, original: &Path, backup: &Path) -> Result<Option<usize>> {
        match std::fs::copy(original, backup) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PesaError::io(backup, e)),
        }

        let bytes = std::fs::read(backup).map_err(|e| PesaError::io(backup, e))?;
        let entry = match decode(kind, &bytes) {
            Ok(entry) => entry,
            Err(reason) => {
                if let Err(e) = std::fs::remove_file(backup) {
                    tracing::warn!(path = %backup.display(), error = %e, "could not remove backup of malformed file");
                }
                return Err(PesaError::MalformedEntry {
                    path: original.to_path_buf(),
                    reason,
                });
            }
        };

        let records = entry.payload.len();
        self.store.with_transaction("migrate_file", |store| {
            match &entry.payload {
                CachePayload::ProjectDirs(dirs) => dirs.iter().try_for_each(|d| store.upsert_project_dir(d)),
                CachePayload::Projects(projects) => projects.iter().try_for_each(|p| store.upsert_project(p)),
                CachePayload::DirUsage(usage) => usage.iter().try_for_each(|u| store.upsert_dir_usage(u)),
            }
        })?;
        Ok(Some(records))
    }

    /// Restore the legacy files and clear the tables migration filled.
    /// Every backup is checked before anything changes.
    pub fn rollback(&self) -> Result<RollbackReport> {
        let manifest = match self.status()? {
            MigrationState::Migrated(m) => m,
            MigrationState::NotMigrated { .. } => return Err(PesaError::NotMigrated),
        };

        if let Some(missing) = manifest.files.iter().find(|f| !f.backup.is_file()) {
            return Err(PesaError::MissingBackup {
                original: missing.original.clone(),
                backup: missing.backup.clone(),
            });
        }

        // Files come back before rows go, so there is never a moment with neither.
        let mut restored = Vec::new();
        for file in &manifest.files {
            if let Some(parent) = file.original.parent() {
                std::fs::create_dir_all(parent).map_err(|e| PesaError::io(parent, e))?;
            }
            std::fs::copy(&file.backup, &file.original)
                .map_err(|e| PesaError::io(&file.original, e))?;
            restored.push(file.original.clone());
        }

        // Rows and the record go together.
        let tables: Vec<Table> = manifest.files.iter().map(|f| table_for(f.kind)).collect();
        let cleared = self.store.with_transaction("rollback", |store| {
            if !store.remove_migration_manifest()? {
                return Err(PesaError::NotMigrated);
            }
            store.delete_rows(&tables)
        })?;

        for file in &manifest.files {
            remove_if_present(&file.backup)?;
        }

        tracing::info!(files = restored.len(), ?cleared, "migration rolled back");
        Ok(RollbackReport { restored, cleared })
    }

    /// Compare what the manifest says was imported with what the store holds.
    /// The store may have grown since; it must not have shrunk.
    pub fn verify(&self) -> Result<VerifyReport> {
        let manifest = match self.status()? {
            MigrationState::Migrated(m) => m,
            MigrationState::NotMigrated { .. } => return Err(PesaError::NotMigrated),
        };
        let stats = self.store.stats()?;

        let mut expected: BTreeMap<Table, usize> = BTreeMap::new();
        for file in &manifest.files {
            *expected.entry(table_for(file.kind)).or_default() += file.records;
        }

        let lines: Vec<VerifyLine> = expected
            .into_iter()
            .map(|(table, expected)| {
                let actual = stats.get(&table).copied().unwrap_or(0);
                VerifyLine {
                    table,
                    expected,
                    actual,
                    ok: actual >= expected,
                }
            })
            .collect();

        Ok(VerifyReport {
            ok: lines.iter().all(|l| l.ok),
            lines,
        })
    }
}

fn emit(progress: Option<&dyn Fn(MigrateEvent)>, event: MigrateEvent) {
    if let Some(cb) = progress {
        cb(event);
    }
}

fn parse_manifest(json: &str) -> Result<Manifest> {
    serde_json::from_str(json).map_err(|e| PesaError::Corrupt(format!("migration manifest: {e}")))
}

fn encode_manifest(manifest: &Manifest) -> Result<String> {
    serde_json::to_string(manifest).map_err(|e| PesaError::Corrupt(format!("migration manifest: {e}")))
}

fn discard_backups(files: &[ManifestFile]) {
    for file in files {
        if let Err(e) = remove_if_present(&file.backup) {
            tracing::warn!(error = %e, "could not remove unused backup");
        }
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PesaError::io(path, e)),
    }
}
