//! filteropt CLI entry point
//!
//! Parses arguments and dispatches to the CLI module. Errors have already
//! been written to stdout as a JSON error response; the process exits
//! non-zero.

use filteropt::cli;

fn main() {
    if cli::run().is_err() {
        std::process::exit(1);
    }
}
