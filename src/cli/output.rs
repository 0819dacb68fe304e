use std::io::Write;

use chrono::Utc;
use serde::Serialize;

use crate::cli::OutputFormat;
use pesa::core::frecency::Ranked;
use pesa::core::records::{Project, ProjectDir};

pub fn output_json<T: Serialize + ?Sized>(value: &T, writer: &mut dyn Write) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *writer, value)?;
    writeln!(writer)?;
    Ok(())
}

/// Write projects in the requested output format.
pub fn output_projects(
    projects: &[Project],
    format: OutputFormat,
    writer: &mut dyn Write,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => output_json(projects, writer)?,
        OutputFormat::Lines => {
            for p in projects {
                writeln!(writer, "{}", p.path.display())?;
            }
        }
        OutputFormat::Table => {
            writeln!(writer, "{}", super::display::render_project_table(projects, Utc::now()))?;
        }
    }
    Ok(())
}

pub fn output_dirs(
    dirs: &[ProjectDir],
    format: OutputFormat,
    writer: &mut dyn Write,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => output_json(dirs, writer)?,
        OutputFormat::Lines => {
            for d in dirs {
                writeln!(writer, "{}", d.path.display())?;
            }
        }
        OutputFormat::Table => {
            writeln!(writer, "{}", super::display::render_dir_table(dirs, Utc::now()))?;
        }
    }
    Ok(())
}

pub fn output_usage(
    entries: &[Ranked],
    format: OutputFormat,
    writer: &mut dyn Write,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => output_json(entries, writer)?,
        OutputFormat::Lines => {
            for r in entries {
                writeln!(writer, "{}", r.usage.path.display())?;
            }
        }
        OutputFormat::Table => {
            writeln!(writer, "{}", super::display::render_usage_table(entries, Utc::now()))?;
        }
    }
    Ok(())
}
