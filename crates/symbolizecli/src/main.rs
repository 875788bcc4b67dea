//! Symbolizes pprof profiles from the command line.
//!
//! The profile is read from a file, resolved against the configured debuginfod server and
//! written back gzip compressed.

use symbolizer_service::logging;

mod cli;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
