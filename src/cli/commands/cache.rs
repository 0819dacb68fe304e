use std::io::Write;

use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;
use serde::Serialize;

use pesa::core::cache::{CacheKind, StoreCache};

use crate::cli::output::output_json;
use crate::cli::{Context, OutputFormat, display};

#[derive(clap::Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

#[derive(clap::Subcommand)]
pub enum CacheAction {
    /// Show freshness of every cached kind
    Show,
    /// Mark one kind (or all) stale so the next read refreshes it
    Clear {
        /// dir_usage, projects or project_dirs
        key: Option<String>,

        /// Also delete the legacy JSON file(s), which migration would otherwise import
        #[arg(long)]
        legacy: bool,
    },
    /// Refresh every kind now
    Refresh,
}

#[derive(Serialize)]
struct KindStatus {
    key: CacheKind,
    fresh: bool,
    last_updated: Option<DateTime<Utc>>,
    ttl_seconds: u64,
    legacy_file: bool,
}

pub fn run(args: CacheArgs, ctx: &Context) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let cache = StoreCache::new(&store, &ctx.config.cache);
    let mut out = std::io::stdout().lock();

    match args.action {
        CacheAction::Show => {
            let now = Utc::now();
            let legacy = ctx.file_cache().present();
            let mut rows = Vec::new();
            for kind in CacheKind::ALL {
                let meta = store.get_cache_metadata(kind.key())?;
                rows.push(KindStatus {
                    key: kind,
                    fresh: meta.as_ref().is_some_and(|m| m.is_fresh_at(now)),
                    last_updated: meta.map(|m| m.last_updated),
                    ttl_seconds: ctx.config.cache.ttl(kind).as_secs(),
                    legacy_file: legacy.contains(&kind),
                });
            }
            match ctx.format {
                OutputFormat::Json => output_json(&rows, &mut out)?,
                OutputFormat::Lines | OutputFormat::Table => {
                    for row in &rows {
                        let state = match (row.fresh, row.last_updated) {
                            (true, _) => "fresh".green().to_string(),
                            (false, Some(_)) => "stale".yellow().to_string(),
                            (false, None) => "empty".dimmed().to_string(),
                        };
                        let age = row
                            .last_updated
                            .map(|t| display::format_age(t, now))
                            .unwrap_or_else(|| "-".into());
                        let legacy = if row.legacy_file { "  legacy file present" } else { "" };
                        writeln!(
                            out,
                            "  {:<14} {} age {:>5}  ttl {}s{}",
                            row.key.to_string(),
                            state,
                            age,
                            row.ttl_seconds,
                            legacy.dimmed()
                        )?;
                    }
                }
            }
        }
        CacheAction::Clear { key, legacy } => {
            let kinds = match key {
                Some(key) => vec![CacheKind::parse(&key)?],
                None => CacheKind::ALL.to_vec(),
            };
            let files = ctx.file_cache();
            for kind in kinds {
                cache.invalidate(kind)?;
                if legacy {
                    files.clear(kind)?;
                }
            }
            if ctx.format != OutputFormat::Json {
                writeln!(out, "  {} cleared", "cache:".bold())?;
            }
        }
        CacheAction::Refresh => {
            cache.invalidate_all()?;
            super::rescan(&store, ctx)?;
            for kind in CacheKind::ALL {
                cache.mark_fresh(kind)?;
            }
            if ctx.format != OutputFormat::Json {
                writeln!(out, "  {} refreshed", "cache:".bold())?;
            }
        }
    }
    Ok(())
}
