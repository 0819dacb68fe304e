use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use git2::Repository;

use crate::error::{PesaError, Result};

use super::records::Project;

/// Read the vitals of the git working copy at `path` into a fresh Project.
pub fn inspect_project(path: &Path) -> Result<Project> {
    let repo = Repository::open(path).map_err(|e| PesaError::Git {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut project = Project::new(path);
    project.remote_url = remote_url(&repo);
    project.branch = if repo.is_bare() {
        None
    } else {
        repo.head()
            .ok()
            .and_then(|h| h.shorthand().map(String::from))
    };
    project.git_objects = count_objects(&repo);
    if let Some(ts) = last_commit_time(&repo).or_else(|| git_dir_mtime(&repo)) {
        project.last_modified = ts;
    }
    Ok(project)
}

/// URL of `origin`, or of the first remote if there is no origin.
fn remote_url(repo: &Repository) -> Option<String> {
    if let Ok(origin) = repo.find_remote("origin") {
        if let Some(url) = origin.url() {
            return Some(url.to_string());
        }
    }
    let names = repo.remotes().ok()?;
    names
        .iter()
        .flatten()
        .find_map(|name| repo.find_remote(name).ok()?.url().map(String::from))
}

/// Number of objects in the object database, loose and packed.
fn count_objects(repo: &Repository) -> u64 {
    let Ok(odb) = repo.odb() else {
        return 0;
    };
    let mut count = 0u64;
    let _ = odb.foreach(|_| {
        count += 1;
        true
    });
    count
}

fn last_commit_time(repo: &Repository) -> Option<DateTime<Utc>> {
    let head = repo.head().ok()?;
    let commit = head.peel_to_commit().ok()?;
    let time = commit.time();
    Utc.timestamp_opt(time.seconds(), 0).single()
}

fn git_dir_mtime(repo: &Repository) -> Option<DateTime<Utc>> {
    let modified = repo.path().metadata().ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// `owner/name` of a GitHub remote URL, SSH or HTTPS form.
pub fn github_full_name(url: &str) -> Option<String> {
    let path = if let Some(rest) = url.strip_prefix("git@github.com:") {
        rest
    } else if let Some(rest) = url
        .strip_prefix("https://github.com/")
        .or_else(|| url.strip_prefix("http://github.com/"))
        .or_else(|| url.strip_prefix("ssh://git@github.com/"))
    {
        rest
    } else {
        return None;
    };

    let path = path.trim_end_matches('/').trim_end_matches(".git");
    let mut parts = path.split('/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let name = parts.next().filter(|s| !s.is_empty())?;
    Some(format!("{owner}/{name}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn github_names() {
        assert_eq!(
            github_full_name("git@github.com:initech/api-gateway.git").as_deref(),
            Some("initech/api-gateway")
        );
        assert_eq!(
            github_full_name("https://github.com/initech/tps").as_deref(),
            Some("initech/tps")
        );
        assert_eq!(
            github_full_name("ssh://git@github.com/initech/tps.git/").as_deref(),
            Some("initech/tps")
        );
        assert!(github_full_name("git@gitlab.com:initech/tps.git").is_none());
        assert!(github_full_name("https://github.com/initech").is_none());
    }

    #[test]
    fn inspect_fresh_repo() {
        let dir = tempfile::tempdir().unwrap();
        let repo_path = dir.path().join("fresh");
        let repo = Repository::init(&repo_path).unwrap();
        repo.remote("upstream", "https://github.com/initech/fresh.git").unwrap();

        let project = inspect_project(&repo_path).unwrap();
        assert_eq!(project.name, "fresh");
        assert_eq!(
            project.remote_url.as_deref(),
            Some("https://github.com/initech/fresh.git")
        );
        assert_eq!(project.git_objects, 0);
    }

    #[test]
    fn inspect_repo_with_commit() {
        let dir = tempfile::tempdir().unwrap();
        let repo_path = dir.path().join("api");
        let mut opts = git2::RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(&repo_path, &opts).unwrap();
        repo.remote("origin", "git@github.com:initech/api.git").unwrap();

        let sig = git2::Signature::now("Test", "test@test.com").unwrap();
        let tree_id = {
            let mut index = repo.index().unwrap();
            fs::write(repo_path.join("README.md"), "# api").unwrap();
            index.add_path(Path::new("README.md")).unwrap();
            index.write().unwrap();
            index.write_tree().unwrap()
        };
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();

        let project = inspect_project(&repo_path).unwrap();
        assert_eq!(project.branch.as_deref(), Some("main"));
        assert_eq!(
            project.remote_url.as_deref(),
            Some("git@github.com:initech/api.git")
        );
        // blob, tree, commit
        assert_eq!(project.git_objects, 3);
        assert!(project.last_modified <= Utc::now());
    }

    #[test]
    fn inspect_nonexistent_path() {
        assert!(matches!(
            inspect_project(Path::new("/nonexistent/repo")),
            Err(PesaError::Git { .. })
        ));
    }
}
