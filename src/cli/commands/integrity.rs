use std::io::Write;

use owo_colors::OwoColorize;

use pesa::core::integrity::{CheckName, IntegrityChecker};
use pesa::core::store::Store;
use pesa::error::PesaError;

use crate::cli::output::output_json;
use crate::cli::{Context, OutputFormat, display};

pub fn run(ctx: &Context) -> anyhow::Result<()> {
    let store = Store::open_read_only(&ctx.config.paths.store_path(), &ctx.config.store)?;
    let report = IntegrityChecker::new(&store).run();

    let mut out = std::io::stdout().lock();
    match ctx.format {
        OutputFormat::Json => output_json(&report, &mut out)?,
        OutputFormat::Lines | OutputFormat::Table => {
            writeln!(out, "  {}", "integrity:".bold())?;
            writeln!(out, "{}", display::render_integrity(&report))?;
        }
    }

    if !report.structure_ok() {
        let detail = report
            .check(CheckName::Structure)
            .map(|c| c.findings.join("; "))
            .unwrap_or_default();
        return Err(PesaError::Corrupt(detail).into());
    }
    if !report.passed() {
        anyhow::bail!("{}", report.summary());
    }
    Ok(())
}
