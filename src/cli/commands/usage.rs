use chrono::Utc;

use pesa::core::frecency;

use crate::cli::Context;
use crate::cli::output;

#[derive(clap::Args)]
pub struct UsageArgs {
    /// At most this many directories
    #[arg(long)]
    pub limit: Option<usize>,
}

pub fn run(args: UsageArgs, ctx: &Context) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let now = Utc::now();
    let mut entries = frecency::ranked(store.list_dir_usage(now)?, now);
    if let Some(n) = args.limit {
        entries.truncate(n);
    }
    output::output_usage(&entries, ctx.format, &mut std::io::stdout().lock())
}
