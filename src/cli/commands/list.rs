use chrono::Utc;

use pesa::core::cache::{CacheKind, CachePayload, StoreCache};
use pesa::core::migrate::{MigrationState, Migrator};
use pesa::core::records::Project;
use pesa::core::store::{Store, Table};

use crate::cli::Context;
use crate::cli::output;

#[derive(clap::Args)]
pub struct ListArgs {
    /// Rescan the configured roots before listing
    #[arg(long)]
    pub refresh: bool,

    /// Only projects whose name or path contains this text
    #[arg(long, conflicts_with = "similar")]
    pub search: Option<String>,

    /// All projects, closest matches to this text first
    #[arg(long)]
    pub similar: Option<String>,

    /// At most this many results
    #[arg(long)]
    pub limit: Option<usize>,

    /// List the scanned root directories instead of projects
    #[arg(long, conflicts_with_all = ["search", "similar"])]
    pub dirs: bool,
}

pub fn run(args: ListArgs, ctx: &Context) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let cache = StoreCache::new(&store, &ctx.config.cache);
    let mut out = std::io::stdout().lock();

    if args.refresh {
        cache.invalidate(CacheKind::Projects)?;
        cache.invalidate(CacheKind::ProjectDirs)?;
    }

    if args.dirs {
        let mut dirs = cache.project_dirs(|s| super::rescan(s, ctx))?;
        truncate(&mut dirs, args.limit);
        return output::output_dirs(&dirs, ctx.format, &mut out);
    }

    if !args.refresh && args.search.is_none() && args.similar.is_none() {
        if let Some(mut projects) = legacy_projects(&store, ctx)? {
            truncate(&mut projects, args.limit);
            return output::output_projects(&projects, ctx.format, &mut out);
        }
    }

    let projects = cache.fetch(
        CacheKind::Projects,
        |s| super::rescan(s, ctx),
        |s| match (&args.search, &args.similar) {
            (Some(q), _) => s.search_projects(q, args.limit),
            (None, Some(q)) => s.similar_projects(q, args.limit),
            (None, None) => {
                let mut all = s.list_projects()?;
                truncate(&mut all, args.limit);
                Ok(all)
            }
        },
    )?;
    output::output_projects(&projects, ctx.format, &mut out)
}

/// Before migration, an empty store with a fresh legacy projects file is
/// served from the file so existing users keep their list.
fn legacy_projects(store: &Store, ctx: &Context) -> anyhow::Result<Option<Vec<Project>>> {
    let empty = store
        .stats()?
        .get(&Table::Projects)
        .is_none_or(|&n| n == 0);
    if !empty {
        return Ok(None);
    }
    let migrator = Migrator::new(store, ctx.file_cache(), ctx.config.paths.backup_dir());
    if matches!(migrator.status()?, MigrationState::Migrated(_)) {
        return Ok(None);
    }
    // Expired entries are left on disk; migration still wants them.
    let entry = ctx.file_cache().read_entry(CacheKind::Projects).ok().flatten();
    match entry {
        Some(e) if e.is_fresh_at(Utc::now()) => match e.payload {
            CachePayload::Projects(projects) => {
                eprintln!(
                    "hint: serving the legacy cache; run `pesa migrate run` to move it into the store"
                );
                Ok(Some(projects))
            }
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

fn truncate<T>(items: &mut Vec<T>, limit: Option<usize>) {
    if let Some(n) = limit {
        items.truncate(n);
    }
}
