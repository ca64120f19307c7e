//! `picoflow` command-line driver.
//!
//! Exit codes:
//!   0 - Success, including a run stopped early whose partial histograms were written
//!   1 - Configuration or I/O error

use clap::Parser;
use std::process::ExitCode;
use tracing::{debug, error};

use picoflow::{cli::Cli, commands, logging};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_level());
    debug!("Arguments: {:?}", cli);

    match commands::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
