use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;

use pesa::core::frecency::Ranked;
use pesa::core::integrity::IntegrityReport;
use pesa::core::records::{Project, ProjectDir};

/// Compact age such as `42s`, `5m`, `3h`, `12d`.
pub fn format_age(since: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - since).num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

fn width<'a>(cells: impl Iterator<Item = &'a str>, header: &str) -> usize {
    cells.map(str::len).max().unwrap_or(0).max(header.len())
}

pub fn render_project_table(projects: &[Project], now: DateTime<Utc>) -> String {
    let name_w = width(projects.iter().map(|p| p.name.as_str()), "NAME");
    let branch_w = width(
        projects.iter().map(|p| p.branch.as_deref().unwrap_or("-")),
        "BRANCH",
    );

    let mut lines = vec![format!(
        "{:<name_w$}  {:<branch_w$}  {:>5}  {}",
        "NAME", "BRANCH", "AGE", "PATH"
    )
    .bold()
    .to_string()];
    for p in projects {
        lines.push(format!(
            "{:<name_w$}  {:<branch_w$}  {:>5}  {}",
            p.name.green(),
            p.branch.as_deref().unwrap_or("-").cyan(),
            format_age(p.last_modified, now),
            p.path.display().dimmed(),
        ));
    }
    lines.join("\n")
}

pub fn render_dir_table(dirs: &[ProjectDir], now: DateTime<Utc>) -> String {
    let mut lines = vec![format!("{:>5}  {:>7}  {}", "REPOS", "SCANNED", "PATH")
        .bold()
        .to_string()];
    for d in dirs {
        lines.push(format!(
            "{:>5}  {:>7}  {}",
            d.git_repos_found,
            format_age(d.last_scanned, now),
            d.path.display()
        ));
    }
    lines.join("\n")
}

pub fn render_usage_table(entries: &[Ranked], now: DateTime<Utc>) -> String {
    let mut lines = vec![format!("{:>8}  {:>6}  {:>5}  {}", "SCORE", "VISITS", "SEEN", "PATH")
        .bold()
        .to_string()];
    for r in entries {
        lines.push(format!(
            "{:>8.2}  {:>6}  {:>5}  {}",
            r.score.yellow(),
            r.usage.frequency,
            format_age(r.usage.last_seen, now),
            r.usage.path.display()
        ));
    }
    lines.join("\n")
}

pub fn render_integrity(report: &IntegrityReport) -> String {
    let mut lines = Vec::new();
    for check in &report.checks {
        let mark = if check.passed {
            "ok".green().to_string()
        } else {
            "FAIL".red().bold().to_string()
        };
        lines.push(format!("  {:<16} {}", check.name.label(), mark));
        for finding in &check.findings {
            lines.push(format!("      {}", finding.dimmed()));
        }
    }
    let counts = match &report.counts_error {
        Some(_) => "unavailable".red().to_string(),
        None => report
            .counts
            .iter()
            .map(|(table, n)| format!("{table}={n}"))
            .collect::<Vec<_>>()
            .join(" "),
    };
    lines.push(format!("  {} {}", "rows:".bold(), counts));
    lines.push(format!("  {}", report.summary()));
    lines.join("\n")
}
