use srcfetch_core::logging;

mod cli;

use clap::Parser;

use crate::cli::Cli;

fn main() {
    let cli = Cli::parse();

    // Initialize logging before any work; fall back to stderr if the state
    // dir is unusable.
    if logging::init_logging(cli.verbose).is_err() {
        logging::init_logging_stderr(cli.verbose);
    }

    if let Err(err) = cli.run() {
        tracing::error!("{:#}", err);
        eprintln!("srcfetch error: {:#}", err);
        std::process::exit(1);
    }
}
