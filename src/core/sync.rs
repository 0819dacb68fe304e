use std::collections::BTreeSet;
use std::process::Command;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cancel::CancelToken;
use super::git_ops::github_full_name;
use super::records::GitHubRepo;
use super::store::Store;
use crate::error::{PesaError, Result};

/// Where remote repository metadata comes from. `Ok(None)` means the remote
/// does not know the repository.
pub trait RemoteMetadataSource {
    fn fetch(&self, owner: &str, name: &str) -> Result<Option<GitHubRepo>>;
}

/// Looks repositories up through the GitHub CLI (`gh api`), reusing its login.
pub struct GhCli;

#[derive(Deserialize)]
struct GhRepo {
    name: String,
    full_name: String,
    description: Option<String>,
    html_url: String,
    clone_url: String,
    ssh_url: String,
    private: bool,
    fork: bool,
    updated_at: DateTime<Utc>,
}

impl RemoteMetadataSource for GhCli {
    fn fetch(&self, owner: &str, name: &str) -> Result<Option<GitHubRepo>> {
        let repo = format!("{owner}/{name}");
        let remote_err = |reason: String| PesaError::Remote {
            repo: repo.clone(),
            reason,
        };
        let output = Command::new("gh")
            .arg("api")
            .arg(format!("repos/{repo}"))
            .output()
            .map_err(|e| remote_err(format!("cannot run gh: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("HTTP 404") {
                return Ok(None);
            }
            return Err(remote_err(stderr.trim().to_string()));
        }

        let gh: GhRepo =
            serde_json::from_slice(&output.stdout).map_err(|e| remote_err(e.to_string()))?;
        Ok(Some(GitHubRepo {
            name: gh.name,
            full_name: gh.full_name,
            description: gh.description,
            url: gh.html_url,
            clone_url: gh.clone_url,
            ssh_url: gh.ssh_url,
            private: gh.private,
            fork: gh.fork,
            updated_at: gh.updated_at,
            discovered_at: Utc::now(),
        }))
    }
}

#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    pub synced: usize,
    pub not_found: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub cancelled: bool,
}

/// `owner/name` of every stored project with a GitHub remote, deduplicated.
pub fn candidates(store: &Store) -> Result<Vec<String>> {
    let names: BTreeSet<String> = store
        .list_projects()?
        .iter()
        .filter_map(|p| p.remote_url.as_deref())
        .filter_map(github_full_name)
        .collect();
    Ok(names.into_iter().collect())
}

/// Fetch each `owner/name` from `source` and upsert what comes back.
/// Failures for one repository do not stop the batch; storage errors do.
pub fn sync_github_repos(
    store: &Store,
    source: &dyn RemoteMetadataSource,
    names: &[String],
    cancel: &CancelToken,
) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    for full_name in names {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        let Some((owner, name)) = full_name.split_once('/') else {
            report
                .failed
                .push((full_name.clone(), "expected owner/name".into()));
            continue;
        };
        match source.fetch(owner, name) {
            Ok(Some(repo)) => {
                store.upsert_github_repo(&repo)?;
                report.synced += 1;
            }
            Ok(None) => report.not_found.push(full_name.clone()),
            Err(e) => {
                tracing::warn!(repo = %full_name, error = %e, "remote fetch failed");
                report.failed.push((full_name.clone(), e.to_string()));
            }
        }
    }

    tracing::info!(
        synced = report.synced,
        not_found = report.not_found.len(),
        failed = report.failed.len(),
        "github sync finished"
    );
    Ok(report)
}
