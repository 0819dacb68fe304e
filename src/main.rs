use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pesa::error::PesaError;

mod cli;

fn main() -> ExitCode {
    let args = cli::Cli::parse();
    init_tracing(args.verbose);

    match cli::run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

/// `PESA_LOG` wins; otherwise each `-v` opens one more level.
fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_env("PESA_LOG").unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<PesaError>())
        .map_or(1, PesaError::exit_code)
}
