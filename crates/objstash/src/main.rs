//! objstash.
//!
//! Command line tooling around the objstash object store: inspects snapshot files written by a
//! store, and validates configuration files.

#![warn(missing_debug_implementations, unused_crate_dependencies, clippy::all)]

mod cli;
mod inspect;
mod logging;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
