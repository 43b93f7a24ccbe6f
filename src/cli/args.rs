//! CLI argument definitions using clap
//!
//! Commands:
//! - filteropt plan --rows <n> [selectivity and stats flags]
//! - filteropt rewrite --backend <kind> --old <expr> --new <expr>
//! - filteropt ids --backend <kind> [--ids <list>]
//! - filteropt classify [--expression <expr>]
//!
//! `ids` and `classify` read a JSON request from stdin when their input
//! flag is omitted.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// filteropt - adaptive spatial filter optimizer
#[derive(Parser, Debug)]
#[command(name = "filteropt")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to an optimizer configuration file (JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Minimum log severity written (trace, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OperatorArg {
    And,
    Or,
    AndNot,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Explain the plan chosen for the given dataset statistics
    Plan {
        /// Dataset row count
        #[arg(long)]
        rows: u64,

        /// Estimated attribute selectivity, if an attribute filter is present
        #[arg(long)]
        attribute_selectivity: Option<f64>,

        /// Estimated spatial selectivity, if a spatial filter is present
        #[arg(long)]
        spatial_selectivity: Option<f64>,

        /// Average geometry vertex count
        #[arg(long, default_value_t = 0.0)]
        avg_vertices: f64,

        /// The backend maintains a spatial index
        #[arg(long)]
        native_index: bool,

        #[arg(long)]
        dataset: Option<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Combine an existing filter with a new one
    Rewrite {
        /// Backend family (server, embedded_sql, flat_file, in_memory)
        #[arg(long)]
        backend: String,

        #[arg(long, default_value = "dataset")]
        dataset: String,

        #[arg(long, default_value = "fid")]
        id_column: String,

        /// Target table as [schema.]table, enables the semi-join rewrite
        #[arg(long)]
        target: Option<String>,

        #[arg(long, value_enum, default_value_t = OperatorArg::And)]
        operator: OperatorArg,

        /// Existing filter expression
        #[arg(long)]
        old: String,

        /// Filter expression to combine with
        #[arg(long)]
        new: String,
    },

    /// Build an id predicate for a backend
    Ids {
        #[arg(long)]
        backend: String,

        #[arg(long, default_value = "fid")]
        column: String,

        /// Comma-separated ids and ranges, e.g. `1,2,5-9`
        #[arg(long)]
        ids: Option<String>,
    },

    /// Guess the dialect of a foreign expression
    Classify {
        #[arg(long)]
        expression: Option<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
