use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::records::{
    CacheMetadata, DirUsage, GitHubRepo, Project, ProjectDir, parse_ts,
};

/// The five persisted tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Projects,
    ProjectDirs,
    DirUsage,
    GithubRepos,
    CacheMetadata,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::Projects,
        Table::ProjectDirs,
        Table::DirUsage,
        Table::GithubRepos,
        Table::CacheMetadata,
    ];

    /// SQL table name. Also the serde name, so it doubles as the display label.
    pub fn name(&self) -> &'static str {
        match self {
            Table::Projects => "projects",
            Table::ProjectDirs => "project_dirs",
            Table::DirUsage => "dir_usage",
            Table::GithubRepos => "github_repos",
            Table::CacheMetadata => "cache_metadata",
        }
    }

    /// Column holding the natural key.
    pub fn key_column(&self) -> &'static str {
        match self {
            Table::Projects | Table::ProjectDirs | Table::DirUsage => "path",
            Table::GithubRepos => "full_name",
            Table::CacheMetadata => "cache_key",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Row counts per table.
pub type StoreStats = BTreeMap<Table, usize>;

pub(super) const PROJECT_COLUMNS: &str =
    "path, name, remote_url, branch, last_modified, git_objects, created_at, updated_at";

pub(super) fn project_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        path: PathBuf::from(row.get::<_, String>(0)?),
        name: row.get(1)?,
        remote_url: row.get(2)?,
        branch: row.get(3)?,
        last_modified: ts(row.get(4)?),
        git_objects: row.get(5)?,
        created_at: ts(row.get(6)?),
        updated_at: ts(row.get(7)?),
    })
}

pub(super) fn project_dir_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectDir> {
    Ok(ProjectDir {
        path: PathBuf::from(row.get::<_, String>(0)?),
        last_scanned: ts(row.get(1)?),
        git_repos_found: row.get(2)?,
    })
}

pub(super) fn dir_usage_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DirUsage> {
    Ok(DirUsage {
        path: PathBuf::from(row.get::<_, String>(0)?),
        frequency: row.get(1)?,
        last_seen: ts(row.get(2)?),
    })
}

pub(super) const GITHUB_COLUMNS: &str = "name, full_name, description, url, clone_url, ssh_url, \
     private, fork, updated_at, discovered_at";

pub(super) fn github_repo_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GitHubRepo> {
    Ok(GitHubRepo {
        name: row.get(0)?,
        full_name: row.get(1)?,
        description: row.get(2)?,
        url: row.get(3)?,
        clone_url: row.get(4)?,
        ssh_url: row.get(5)?,
        private: row.get(6)?,
        fork: row.get(7)?,
        updated_at: ts(row.get(8)?),
        discovered_at: ts(row.get(9)?),
    })
}

pub(super) fn cache_metadata_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheMetadata> {
    Ok(CacheMetadata {
        cache_key: row.get(0)?,
        last_updated: ts(row.get(1)?),
        ttl_seconds: row.get(2)?,
    })
}

/// Unparsable timestamps read back as the epoch; the integrity timestamps check reports them.
fn ts(s: String) -> chrono::DateTime<chrono::Utc> {
    parse_ts(&s).unwrap_or_default()
}
