use std::path::{Path, PathBuf};

use glob::Pattern;
use walkdir::WalkDir;

use super::cancel::CancelToken;
use crate::config::types::ScanConfig;
use crate::error::{PesaError, Result};

/// Given a root directory, produce the git working copies beneath it.
pub trait RepoDiscoverer {
    fn discover(&self, root: &Path, cancel: &CancelToken) -> Result<Vec<PathBuf>>;
}

/// Filesystem walk that stops descending at every directory holding a `.git`.
pub struct WalkDiscoverer {
    exclude: Vec<Pattern>,
    max_depth: usize,
}

impl WalkDiscoverer {
    pub fn new(config: &ScanConfig) -> Result<Self> {
        let exclude = config
            .exclude
            .iter()
            .map(|p| {
                Pattern::new(p.trim_end_matches('/'))
                    .map_err(|e| PesaError::Config(format!("bad exclude pattern {p:?}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            exclude,
            max_depth: config.max_depth,
        })
    }

    /// Excluded if any pattern matches the directory name or its path below the root.
    fn is_excluded(&self, path: &Path, root: &Path) -> bool {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        let rel = path.strip_prefix(root).unwrap_or(path);
        self.exclude
            .iter()
            .any(|p| p.matches(&name) || p.matches_path(rel))
    }
}

impl RepoDiscoverer for WalkDiscoverer {
    fn discover(&self, root: &Path, cancel: &CancelToken) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        let mut walker = WalkDir::new(root)
            .max_depth(self.max_depth)
            .follow_links(false)
            .into_iter();

        while let Some(entry) = walker.next() {
            if cancel.is_cancelled() {
                break;
            }
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!(root = %root.display(), error = %e, "walk error");
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let path = entry.path();
            if entry.depth() > 0 && self.is_excluded(path, root) {
                walker.skip_current_dir();
                continue;
            }
            // A `.git` file marks worktrees and submodules.
            if path.join(".git").exists() {
                found.push(path.to_path_buf());
                walker.skip_current_dir();
            }
        }

        found.sort();
        Ok(found)
    }
}
