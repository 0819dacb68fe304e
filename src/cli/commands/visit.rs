use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;

use pesa::error::PesaError;

use crate::cli::output::output_json;
use crate::cli::{Context, OutputFormat};

#[derive(clap::Args)]
pub struct VisitArgs {
    /// Directory that was visited
    pub path: PathBuf,
}

pub fn run(args: VisitArgs, ctx: &Context) -> anyhow::Result<()> {
    // Visits are keyed by absolute path; symlinks resolve when the directory still exists.
    let path = std::fs::canonicalize(&args.path)
        .or_else(|_| std::path::absolute(&args.path))
        .map_err(|e| PesaError::io(&args.path, e))?;

    let store = ctx.open_store()?;
    let frequency = store.record_visit(&path, Utc::now())?;

    let mut out = std::io::stdout().lock();
    match ctx.format {
        OutputFormat::Json => output_json(
            &serde_json::json!({ "path": path, "frequency": frequency }),
            &mut out,
        )?,
        OutputFormat::Lines | OutputFormat::Table => {
            writeln!(out, "{}\t{}", frequency, path.display())?
        }
    }
    Ok(())
}
