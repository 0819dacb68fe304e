pub mod cache;
pub mod integrity;
pub mod list;
pub mod migrate;
pub mod sync;
pub mod usage;
pub mod visit;

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::Context;
use pesa::core::cancel::CancelToken;
use pesa::core::discovery::WalkDiscoverer;
use pesa::core::scan::{self, ScanEvent};
use pesa::core::store::Store;

/// Rescan the configured roots into `store`, with a spinner on stderr.
pub(crate) fn rescan(store: &Store, ctx: &Context) -> pesa::error::Result<()> {
    let discoverer = WalkDiscoverer::new(&ctx.config.scan)?;

    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        spinner.set_style(style);
    }
    spinner.enable_steady_tick(Duration::from_millis(100));

    let on_event = |event: ScanEvent| match event {
        ScanEvent::RootStarted(root) => spinner.set_message(format!("scanning {}", root.display())),
        ScanEvent::ProjectFound(path) => spinner.set_message(path.display().to_string()),
        ScanEvent::Failed { .. } => {}
    };
    let report = scan::refresh_projects(
        store,
        &discoverer,
        &ctx.config.scan.roots,
        &CancelToken::new(),
        Some(&on_event),
    );
    spinner.finish_and_clear();
    report.map(|_| ())
}
