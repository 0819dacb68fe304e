pub mod commands;
pub mod display;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use pesa::config::{self, types::PesaConfig};
use pesa::core::cache::FileCache;
use pesa::core::store::Store;

#[derive(Parser)]
#[command(name = "pesa", about = "Find your projects and the directories you live in.", version)]
pub struct Cli {
    /// Output format
    #[arg(long, global = true, value_enum, default_value = "lines")]
    pub format: OutputFormat,

    /// More diagnostics on stderr (repeatable)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List known projects
    List(commands::list::ListArgs),
    /// Record a visit to a directory
    Visit(commands::visit::VisitArgs),
    /// List visited directories by frecency
    Usage(commands::usage::UsageArgs),
    /// Move the legacy JSON cache into the store, or back
    Migrate(commands::migrate::MigrateArgs),
    /// Check the store for damage and inconsistencies
    Integrity,
    /// Inspect, clear or refresh cached data
    Cache(commands::cache::CacheArgs),
    /// Fetch GitHub metadata for projects with GitHub remotes
    Sync,
}

#[derive(Debug, Clone, Copy, PartialEq, clap::ValueEnum)]
pub enum OutputFormat {
    Lines,
    Json,
    Table,
}

/// Everything a command needs that was resolved before it ran.
pub struct Context {
    pub config: PesaConfig,
    pub format: OutputFormat,
}

impl Context {
    pub fn open_store(&self) -> pesa::error::Result<Store> {
        Store::open(&self.config.paths.store_path(), &self.config.store)
    }

    pub fn file_cache(&self) -> FileCache {
        FileCache::new(&self.config.paths.cache_dir)
    }
}

/// Dispatch a CLI command.
pub fn run(cli: Cli) -> anyhow::Result<()> {
    let Some(command) = cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let ctx = Context {
        config: config::load_config(cli.config.as_deref())?,
        format: cli.format,
    };

    match command {
        Commands::List(args) => commands::list::run(args, &ctx),
        Commands::Visit(args) => commands::visit::run(args, &ctx),
        Commands::Usage(args) => commands::usage::run(args, &ctx),
        Commands::Migrate(args) => commands::migrate::run(args, &ctx),
        Commands::Integrity => commands::integrity::run(&ctx),
        Commands::Cache(args) => commands::cache::run(args, &ctx),
        Commands::Sync => commands::sync::run(&ctx),
    }
}
