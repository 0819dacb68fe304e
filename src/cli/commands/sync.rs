use std::io::Write;

use owo_colors::OwoColorize;

use pesa::core::cancel::CancelToken;
use pesa::core::sync::{self, GhCli};

use crate::cli::output::output_json;
use crate::cli::{Context, OutputFormat};

pub fn run(ctx: &Context) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let names = sync::candidates(&store)?;
    let report = sync::sync_github_repos(&store, &GhCli, &names, &CancelToken::new())?;

    let mut out = std::io::stdout().lock();
    match ctx.format {
        OutputFormat::Json => output_json(&report, &mut out)?,
        OutputFormat::Lines | OutputFormat::Table => {
            writeln!(
                out,
                "  {} {} of {} repos synced",
                "sync:".green().bold(),
                report.synced,
                names.len()
            )?;
            for name in &report.not_found {
                writeln!(out, "    {} {}", "not found".yellow(), name)?;
            }
            for (name, reason) in &report.failed {
                writeln!(out, "    {} {}: {}", "failed".red(), name, reason.dimmed())?;
            }
        }
    }
    Ok(())
}
