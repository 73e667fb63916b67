//! mlexptools CLI
//!
//! # Usage
//!
//! ```bash
//! # List experiments and runs in a store
//! mlexptools runs ./mlruns
//!
//! # Print a metric series
//! mlexptools metrics ./mlruns run-0 val_loss
//!
//! # Sample host resources
//! mlexptools sample --count 10 --interval-ms 1000 --format json
//! ```

use clap::Parser;
use mlexptools::cli::{run, Cli};
use mlexptools::logging::init_logging;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(output) => {
            print!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
