use std::io::Write;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

use pesa::core::cancel::CancelToken;
use pesa::core::migrate::{MigrateEvent, MigrateOutcome, MigrationState, Migrator};
use pesa::core::store::StoreStats;

use crate::cli::output::output_json;
use crate::cli::{Context, OutputFormat};

#[derive(clap::Args)]
pub struct MigrateArgs {
    #[command(subcommand)]
    pub action: MigrateAction,
}

#[derive(clap::Subcommand)]
pub enum MigrateAction {
    /// Import the legacy cache files into the store
    Run,
    /// Restore the legacy files and clear what the import wrote
    Rollback,
    /// Show whether the legacy cache has been migrated
    Status,
    /// Compare store row counts against what was imported
    Verify,
}

pub fn run(args: MigrateArgs, ctx: &Context) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let migrator = Migrator::new(&store, ctx.file_cache(), ctx.config.paths.backup_dir());
    let mut out = std::io::stdout().lock();
    let json = ctx.format == OutputFormat::Json;

    match args.action {
        MigrateAction::Run => {
            let spinner = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
                spinner.set_style(style);
            }
            spinner.enable_steady_tick(Duration::from_millis(100));
            let on_event = |event: MigrateEvent| match event {
                MigrateEvent::Imported { kind, records } => {
                    spinner.set_message(format!("imported {kind} ({records} records)"))
                }
                MigrateEvent::Failed { path, .. } => {
                    spinner.set_message(format!("failed {}", path.display()))
                }
            };
            let report = migrator.migrate(&CancelToken::new(), Some(&on_event));
            spinner.finish_and_clear();
            let report = report?;
            if json {
                output_json(&report, &mut out)?;
            } else {
                let label = match report.outcome {
                    MigrateOutcome::Completed => "migrated".green().bold().to_string(),
                    MigrateOutcome::NothingToMigrate => "nothing to migrate".dimmed().to_string(),
                    MigrateOutcome::AlreadyMigrated => "already migrated".dimmed().to_string(),
                    MigrateOutcome::Partial => "partially migrated".yellow().bold().to_string(),
                    MigrateOutcome::Cancelled => "cancelled".yellow().to_string(),
                };
                writeln!(out, "  {} {}", "migrate:".bold(), label)?;
                write_counts(&mut out, &report.imported)?;
                for f in &report.failed {
                    writeln!(out, "    {} {}: {}", "failed".red(), f.path.display(), f.reason)?;
                }
            }
            if report.outcome == MigrateOutcome::Partial {
                anyhow::bail!(
                    "{} legacy file(s) could not be imported; fix or remove them and re-run",
                    report.failed.len()
                );
            }
        }
        MigrateAction::Rollback => {
            let report = migrator.rollback()?;
            if json {
                output_json(&report, &mut out)?;
            } else {
                writeln!(out, "  {} restored {} file(s)", "rollback:".bold(), report.restored.len())?;
                for path in &report.restored {
                    writeln!(out, "    {}", path.display())?;
                }
                write_counts(&mut out, &report.cleared)?;
            }
        }
        MigrateAction::Status => {
            let state = migrator.status()?;
            if json {
                output_json(&state, &mut out)?;
            } else {
                match state {
                    MigrationState::Migrated(manifest) => {
                        writeln!(
                            out,
                            "  {} migrated at {}",
                            "status:".bold(),
                            manifest.migrated_at.to_rfc3339()
                        )?;
                        for f in &manifest.files {
                            writeln!(out, "    {:<14} {:>6} records", f.kind.to_string(), f.records)?;
                        }
                    }
                    MigrationState::NotMigrated { pending } => {
                        let keys: Vec<_> = pending.iter().map(|k| k.key()).collect();
                        writeln!(out, "  {} not migrated", "status:".bold())?;
                        if !keys.is_empty() {
                            writeln!(out, "    pending: {}", keys.join(", "))?;
                        }
                    }
                }
            }
        }
        MigrateAction::Verify => {
            let report = migrator.verify()?;
            if json {
                output_json(&report, &mut out)?;
            } else {
                for line in &report.lines {
                    let mark = if line.ok { "ok".green().to_string() } else { "MISSING".red().to_string() };
                    writeln!(
                        out,
                        "    {:<14} expected {:>6} actual {:>6}  {}",
                        line.table.to_string(),
                        line.expected,
                        line.actual,
                        mark
                    )?;
                }
            }
            if !report.ok {
                anyhow::bail!("store holds fewer rows than were imported");
            }
        }
    }
    Ok(())
}

fn write_counts(out: &mut dyn Write, stats: &StoreStats) -> anyhow::Result<()> {
    for (table, n) in stats {
        writeln!(out, "    {:<14} {:>6}", table.to_string(), n)?;
    }
    Ok(())
}
