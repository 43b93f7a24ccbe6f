//! CLI command implementations
//!
//! Each command builds a [`FilterOptimizer`] from the optional config file
//! and writes exactly one JSON response (or text, for `plan --format text`).
//! Command-level failures are written as an error response and returned so
//! the process exits non-zero.

use std::path::Path;

use serde::Deserialize;
use serde_json::json;

use crate::config::OptimizerConfig;
use crate::dataset::BackendKind;
use crate::expr::{classify_expression, IdRange, IdSetRef, QualifiedName};
use crate::observability::{Logger, Severity};
use crate::optimizer::FilterOptimizer;
use crate::planner::ExplainPlan;
use crate::rewrite::{CombineOperator, RewriteContext};
use crate::stats::{DatasetStats, SelectivityEstimate};

use super::args::{Cli, Command, OperatorArg, OutputFormat};
use super::errors::{CliError, CliResult};
use super::io::{read_request, write_error, write_response, write_text};

/// Main CLI entry point
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    let result = run_cli(cli);
    if let Err(e) = &result {
        write_error(e.code_str(), e.message())?;
    }
    result
}

/// Apply global options, then run the command
pub fn run_cli(cli: Cli) -> CliResult<()> {
    let severity = Severity::parse(&cli.log_level)
        .ok_or_else(|| CliError::invalid_argument(format!("Unknown log level: {}", cli.log_level)))?;
    Logger::set_min_severity(severity);

    let config = load_config(cli.config.as_deref())?;
    let optimizer = FilterOptimizer::new(config)?;
    run_command(&optimizer, cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(optimizer: &FilterOptimizer, cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Plan {
            rows,
            attribute_selectivity,
            spatial_selectivity,
            avg_vertices,
            native_index,
            dataset,
            format,
        } => {
            let stats = DatasetStats::new(rows)
                .with_native_index(native_index)
                .with_avg_vertex_count(avg_vertices);
            let selectivity = selectivity_from(attribute_selectivity, spatial_selectivity)?;
            let explain = plan(optimizer, &stats, &selectivity, dataset.as_deref());
            match format {
                OutputFormat::Json => write_response(serde_json::to_value(&explain)?),
                OutputFormat::Text => write_text(&explain.to_string()),
            }
        }
        Command::Rewrite {
            backend,
            dataset,
            id_column,
            target,
            operator,
            old,
            new,
        } => {
            let mut ctx = RewriteContext::new(dataset, parse_backend(&backend)?).with_id_column(id_column);
            if let Some(target) = target {
                ctx = ctx.with_target(parse_qualified_name(&target)?);
            }
            let result = optimizer.rewrite_combined(&old, &new, combine_operator(operator), &ctx);
            write_response(serde_json::to_value(&result)?)
        }
        Command::Ids { backend, column, ids } => {
            let backend = parse_backend(&backend)?;
            let set = match ids {
                Some(list) => parse_id_list(&list)?,
                None => read_id_request()?,
            };
            write_response(id_predicate(optimizer, backend, &column, &set))
        }
        Command::Classify { expression } => {
            let expression = match expression {
                Some(e) => e,
                None => read_expression_request()?,
            };
            write_response(classify(&expression))
        }
    }
}

/// Load the config file, or defaults when none is given
pub fn load_config(path: Option<&Path>) -> CliResult<OptimizerConfig> {
    match path {
        Some(path) => Ok(OptimizerConfig::load(path)?),
        None => Ok(OptimizerConfig::default()),
    }
}

/// Build and explain a plan from explicit statistics
pub fn plan(
    optimizer: &FilterOptimizer,
    stats: &DatasetStats,
    selectivity: &SelectivityEstimate,
    dataset: Option<&str>,
) -> ExplainPlan {
    let explain = ExplainPlan::from_plan(&optimizer.build_plan(stats, selectivity));
    match dataset {
        Some(id) => explain.with_dataset(id),
        None => explain,
    }
}

/// Render an id predicate and describe its shape
pub fn id_predicate(
    optimizer: &FilterOptimizer,
    backend: BackendKind,
    column: &str,
    ids: &IdSetRef,
) -> serde_json::Value {
    let predicate = optimizer.id_predicate(backend, column, ids);
    json!({
        "backend": backend.as_str(),
        "predicate": predicate,
        "count": u64::try_from(ids.len()).unwrap_or(u64::MAX),
        "compressed": ids.is_compressed(),
    })
}

pub fn classify(expression: &str) -> serde_json::Value {
    let dialect = classify_expression(expression);
    json!({
        "dialect": dialect.as_str(),
        "backend": dialect.backend_kind().map(|k| k.as_str()),
    })
}

fn selectivity_from(attribute: Option<f64>, spatial: Option<f64>) -> CliResult<SelectivityEstimate> {
    for value in [attribute, spatial].into_iter().flatten() {
        if !(0.0..=1.0).contains(&value) {
            return Err(CliError::invalid_argument(format!(
                "Selectivity must be within [0, 1], got {}",
                value
            )));
        }
    }
    Ok(match (attribute, spatial) {
        (Some(a), Some(s)) => SelectivityEstimate::new(a, s),
        (Some(a), None) => SelectivityEstimate::attribute_only(a),
        (None, Some(s)) => SelectivityEstimate::spatial_only(s),
        (None, None) => SelectivityEstimate::none(),
    })
}

fn parse_backend(name: &str) -> CliResult<BackendKind> {
    BackendKind::parse(name).ok_or_else(|| CliError::invalid_argument(format!("Unknown backend: {}", name)))
}

fn combine_operator(op: OperatorArg) -> CombineOperator {
    match op {
        OperatorArg::And => CombineOperator::And,
        OperatorArg::Or => CombineOperator::Or,
        OperatorArg::AndNot => CombineOperator::AndNot,
    }
}

/// `table` or `schema.table`
fn parse_qualified_name(text: &str) -> CliResult<QualifiedName> {
    let parts: Vec<&str> = text.split('.').map(str::trim).collect();
    match parts.as_slice() {
        [name] if !name.is_empty() => Ok(QualifiedName::new(None, *name)),
        [schema, name] if !schema.is_empty() && !name.is_empty() => Ok(QualifiedName::new(Some(schema), *name)),
        _ => Err(CliError::invalid_argument(format!("Invalid table name: {}", text))),
    }
}

/// Comma-separated ids and inclusive `a..b` ranges
pub fn parse_id_list(text: &str) -> CliResult<IdSetRef> {
    let mut ranges = Vec::new();
    for item in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let range = match item.split_once("..") {
            Some((lo, hi)) => IdRange::new(parse_id(lo)?, parse_id(hi)?),
            None => IdRange::single(parse_id(item)?),
        };
        ranges.push(range);
    }
    if ranges.is_empty() {
        return Err(CliError::invalid_argument("No ids given"));
    }
    Ok(IdSetRef::from_ranges(ranges, Vec::new()))
}

fn parse_id(text: &str) -> CliResult<i64> {
    text.trim()
        .parse::<i64>()
        .map_err(|_| CliError::invalid_argument(format!("Invalid id: {}", text)))
}

#[derive(Deserialize)]
struct IdRequest {
    #[serde(default)]
    ids: Vec<i64>,
    #[serde(default)]
    ranges: Vec<IdRange>,
}

fn read_id_request() -> CliResult<IdSetRef> {
    let request: IdRequest = serde_json::from_value(read_request()?)?;
    id_set_from_request(request)
}

fn id_set_from_request(request: IdRequest) -> CliResult<IdSetRef> {
    if request.ids.is_empty() && request.ranges.is_empty() {
        return Err(CliError::invalid_argument("Request carries no ids"));
    }
    if request.ranges.is_empty() {
        return Ok(IdSetRef::from_ids(request.ids));
    }
    let mut ranges = request.ranges;
    ranges.extend(request.ids.into_iter().map(IdRange::single));
    Ok(IdSetRef::from_ranges(ranges, Vec::new()))
}

fn read_expression_request() -> CliResult<String> {
    let request = read_request()?;
    request
        .get("expression")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| CliError::invalid_argument("Request requires an 'expression' string"))
}
