use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PesaError {
    #[error("storage error during {op} ({key}): {source}")]
    Storage {
        op: &'static str,
        key: String,
        source: rusqlite::Error,
    },

    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store is corrupt: {0}")]
    Corrupt(String),

    #[error("git error at {path}: {source}")]
    Git {
        path: PathBuf,
        source: git2::Error,
    },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("malformed cache entry {path}: {reason}")]
    MalformedEntry { path: PathBuf, reason: String },

    #[error("unknown cache key: {0}")]
    UnknownCacheKey(String),

    #[error("no migration to roll back")]
    NotMigrated,

    #[error("backup missing for {original}: expected {backup}")]
    MissingBackup { original: PathBuf, backup: PathBuf },

    #[error("remote lookup failed for {repo}: {reason}")]
    Remote { repo: String, reason: String },

    #[error("permission denied at {0}")]
    PermissionDenied(PathBuf),
}

impl PesaError {
    /// Wrap an I/O error with the path it happened at. Permission problems get
    /// their own variant so the binary can report them with a distinct exit code.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            PesaError::PermissionDenied(path)
        } else {
            PesaError::Io { path, source }
        }
    }

    /// Process exit code for this error: 1 generic, 2 config, 3 storage, 4 permission.
    pub fn exit_code(&self) -> u8 {
        match self {
            PesaError::Config(_) | PesaError::UnknownCacheKey(_) => 2,
            PesaError::Storage { source, .. } | PesaError::Sqlite(source) => {
                if is_permission(source) { 4 } else { 3 }
            }
            PesaError::Corrupt(_) => 3,
            PesaError::PermissionDenied(_) => 4,
            _ => 1,
        }
    }

    /// True when the error is the store's single-writer lock being held elsewhere.
    pub fn is_busy(&self) -> bool {
        match self {
            PesaError::Storage { source, .. } | PesaError::Sqlite(source) => is_busy(source),
            _ => false,
        }
    }
}

pub(crate) fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

fn is_permission(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::PermissionDenied)
            | Some(rusqlite::ErrorCode::ReadOnly)
            | Some(rusqlite::ErrorCode::CannotOpen)
    )
}

pub type Result<T> = std::result::Result<T, PesaError>;
