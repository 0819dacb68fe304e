use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::cache::CacheKind;
use crate::core::retry::RetryPolicy;
use crate::error::{PesaError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PesaConfig {
    pub paths: PathsConfig,
    pub cache: CacheConfig,
    pub scan: ScanConfig,
    pub store: StoreConfig,
}

impl PesaConfig {
    /// Reject settings the core relies on being sane.
    pub fn validate(&self) -> Result<()> {
        let c = &self.cache;
        if c.dir_usage_ttl_secs == 0 || c.projects_ttl_secs == 0 || c.project_dirs_ttl_secs == 0 {
            return Err(PesaError::Config("cache TTLs must be positive".into()));
        }
        // More volatile data must expire sooner.
        if !(c.dir_usage_ttl_secs < c.projects_ttl_secs
            && c.projects_ttl_secs < c.project_dirs_ttl_secs)
        {
            return Err(PesaError::Config(format!(
                "cache TTLs must satisfy dir_usage ({}) < projects ({}) < project_dirs ({})",
                c.dir_usage_ttl_secs, c.projects_ttl_secs, c.project_dirs_ttl_secs
            )));
        }
        if self.store.retry_attempts == 0 {
            return Err(PesaError::Config("store.retry_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Base directories. Resolved once by the loader; the core never looks them up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: super::data_dir(),
            cache_dir: super::cache_dir(),
            state_dir: super::state_dir(),
        }
    }
}

impl PathsConfig {
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("pesa.db")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.state_dir.join("migration-backup")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir_usage_ttl_secs: u64,
    pub projects_ttl_secs: u64,
    pub project_dirs_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir_usage_ttl_secs: CacheKind::DirUsage.default_ttl().as_secs(),
            projects_ttl_secs: CacheKind::Projects.default_ttl().as_secs(),
            project_dirs_ttl_secs: CacheKind::ProjectDirs.default_ttl().as_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self, kind: CacheKind) -> Duration {
        Duration::from_secs(match kind {
            CacheKind::DirUsage => self.dir_usage_ttl_secs,
            CacheKind::Projects => self.projects_ttl_secs,
            CacheKind::ProjectDirs => self.project_dirs_ttl_secs,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub roots: Vec<PathBuf>,
    pub exclude: Vec<String>,
    pub max_depth: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
        Self {
            roots: vec![home.join("code"), home.join("src"), home.join("projects")],
            exclude: vec![
                "node_modules".into(),
                "target".into(),
                ".cache".into(),
                ".cargo".into(),
                ".rustup".into(),
                ".npm".into(),
                "__pycache__".into(),
                ".venv".into(),
                "vendor".into(),
            ],
            max_depth: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub busy_timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 2_000,
            retry_attempts: 5,
            retry_base_ms: 25,
            retry_max_ms: 1_000,
        }
    }
}

impl StoreConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            base_delay: Duration::from_millis(self.retry_base_ms),
            max_delay: Duration::from_millis(self.retry_max_ms),
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
