#![forbid(unsafe_code)]

//! `ytdl-sub` entry point: parses arguments, sets up logging and maps the
//! outcome to the exit code.

use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use ytdl_sub::cli::{self, Cli};
use ytdl_sub::logging;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let log = match logging::init(cli.log_level) {
        Ok(log) => log,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    match cli::run(&cli, &log) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            error!("One or more subscriptions failed");
            eprintln!("Full debug log: {}", log.debug_log_path().display());
            ExitCode::FAILURE
        }
        Err(err) => {
            error!("{err:#}");
            eprintln!("Full debug log: {}", log.debug_log_path().display());
            ExitCode::FAILURE
        }
    }
}
