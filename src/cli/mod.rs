//! Command-line interface for filteropt
//!
//! Provides one-shot commands for:
//! - plan: explain the strategy chosen for given statistics
//! - rewrite: combine two filter expressions
//! - ids: render an id predicate for a backend
//! - classify: guess the dialect of an expression

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, OperatorArg, OutputFormat};
pub use commands::{classify, id_predicate, load_config, parse_id_list, plan, run, run_cli, run_command};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{read_request, write_error, write_response, write_text};
