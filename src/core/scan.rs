use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;

use super::cancel::CancelToken;
use super::discovery::RepoDiscoverer;
use super::git_ops;
use super::records::ProjectDir;
use super::store::Store;
use crate::error::Result;

/// Events emitted during a refresh for progress reporting.
pub enum ScanEvent<'a> {
    RootStarted(&'a Path),
    ProjectFound(&'a Path),
    Failed { path: &'a Path, error: &'a str },
}

#[derive(Debug, Default)]
pub struct ScanReport {
    pub roots: usize,
    pub projects: usize,
    pub failed: Vec<(PathBuf, String)>,
    pub cancelled: bool,
    pub duration: Duration,
}

/// Discover every project under `roots` and write it, with its scan root, to
/// the store. A repository that cannot be inspected is recorded in the report
/// and the refresh carries on.
pub fn refresh_projects(
    store: &Store,
    discoverer: &dyn RepoDiscoverer,
    roots: &[PathBuf],
    cancel: &CancelToken,
    progress: Option<&dyn Fn(ScanEvent)>,
) -> Result<ScanReport> {
    let start = Instant::now();
    let mut report = ScanReport::default();

    for root in roots {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        if let Some(cb) = progress {
            cb(ScanEvent::RootStarted(root));
        }

        let found = discoverer.discover(root, cancel)?;
        // Root first so each project resolves its owning dir on insert.
        store.upsert_project_dir(&ProjectDir {
            path: root.clone(),
            last_scanned: Utc::now(),
            git_repos_found: u32::try_from(found.len()).unwrap_or(u32::MAX),
        })?;
        report.roots += 1;

        for path in found {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match git_ops::inspect_project(&path) {
                Ok(project) => {
                    store.upsert_project(&project)?;
                    report.projects += 1;
                    tracing::debug!(path = %path.display(), "project refreshed");
                    if let Some(cb) = progress {
                        cb(ScanEvent::ProjectFound(&path));
                    }
                }
                Err(e) => {
                    let error = e.to_string();
                    tracing::warn!(path = %path.display(), error = %error, "skipping project");
                    if let Some(cb) = progress {
                        cb(ScanEvent::Failed {
                            path: &path,
                            error: &error,
                        });
                    }
                    report.failed.push((path, error));
                }
            }
        }
    }

    report.duration = start.elapsed();
    tracing::info!(
        roots = report.roots,
        projects = report.projects,
        failed = report.failed.len(),
        cancelled = report.cancelled,
        "refresh finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;

    struct Fixed(Vec<PathBuf>);

    impl RepoDiscoverer for Fixed {
        fn discover(&self, _root: &Path, _cancel: &CancelToken) -> Result<Vec<PathBuf>> {
            Ok(self.0.clone())
        }
    }

    fn init_repo(path: &Path) {
        git2::Repository::init(path).unwrap();
    }

    #[test]
    fn refresh_writes_projects_and_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("code");
        init_repo(&root.join("alpha"));
        init_repo(&root.join("beta"));

        let store = Store::open_in_memory().unwrap();
        let discoverer = Fixed(vec![root.join("alpha"), root.join("beta")]);
        let report = refresh_projects(
            &store,
            &discoverer,
            &[root.clone()],
            &CancelToken::new(),
            None,
        )
        .unwrap();

        assert_eq!(report.roots, 1);
        assert_eq!(report.projects, 2);
        assert!(report.failed.is_empty());

        let dirs = store.list_project_dirs().unwrap();
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].git_repos_found, 2);
        assert!(store.get_project(&root.join("alpha")).unwrap().is_some());
    }

    #[test]
    fn broken_repo_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good");
        let broken = dir.path().join("broken");
        init_repo(&good);
        fs::create_dir_all(broken.join(".git")).unwrap();

        let store = Store::open_in_memory().unwrap();
        let events = RefCell::new(Vec::new());
        let record = |e: ScanEvent| {
            let tag = match e {
                ScanEvent::RootStarted(_) => "root",
                ScanEvent::ProjectFound(_) => "found",
                ScanEvent::Failed { .. } => "failed",
            };
            events.borrow_mut().push(tag);
        };
        let report = refresh_projects(
            &store,
            &Fixed(vec![broken.clone(), good.clone()]),
            &[dir.path().to_path_buf()],
            &CancelToken::new(),
            Some(&record),
        )
        .unwrap();

        assert_eq!(report.projects, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, broken);
        assert_eq!(*events.borrow(), vec!["root", "failed", "found"]);
    }

    #[test]
    fn cancelled_refresh_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(&dir.path().join("alpha"));
        let store = Store::open_in_memory().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = refresh_projects(
            &store,
            &Fixed(vec![dir.path().join("alpha")]),
            &[dir.path().to_path_buf()],
            &cancel,
            None,
        )
        .unwrap();
        assert!(report.cancelled);
        assert!(store.list_projects().unwrap().is_empty());
    }
}
