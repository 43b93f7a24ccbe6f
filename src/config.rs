//! Optimizer configuration
//!
//! Every threshold the optimizer uses is a configurable default. The
//! coverage and materialization thresholds in particular are empirical and
//! expected to be calibrated against real workloads.
//!
//! Loaded from JSON; every field is optional.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{OptimizerError, OptimizerResult};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub ids: IdSetConfig,
    #[serde(default)]
    pub materialization: MaterializationConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

impl OptimizerConfig {
    /// Load and validate configuration from a JSON file
    pub fn load(path: &Path) -> OptimizerResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            OptimizerError::Config(format!("Failed to read config '{}': {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(content: &str) -> OptimizerResult<Self> {
        let config: OptimizerConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the optimizer misbehave
    pub fn validate(&self) -> OptimizerResult<()> {
        let unit = |name: &str, v: f64| -> OptimizerResult<()> {
            if !(0.0..=1.0).contains(&v) {
                return Err(OptimizerError::Config(format!(
                    "{} must be within [0, 1], got {}",
                    name, v
                )));
            }
            Ok(())
        };

        unit(
            "planner.attribute_first_max_selectivity",
            self.planner.attribute_first_max_selectivity,
        )?;
        unit(
            "planner.bbox_max_spatial_selectivity",
            self.planner.bbox_max_spatial_selectivity,
        )?;
        unit("estimator.spatial_dampening", self.estimator.spatial_dampening)?;
        unit("estimator.fallback_selectivity", self.estimator.fallback_selectivity)?;
        unit("ids.range_coverage_threshold", self.ids.range_coverage_threshold)?;

        if self.planner.min_chunk_size == 0
            || self.planner.min_chunk_size > self.planner.max_chunk_size
        {
            return Err(OptimizerError::Config(format!(
                "chunk bounds invalid: min {} max {}",
                self.planner.min_chunk_size, self.planner.max_chunk_size
            )));
        }
        if self.cache.capacity == 0 {
            return Err(OptimizerError::Config("cache.capacity must be > 0".into()));
        }
        if self.estimator.stats_sample_size == 0 || self.estimator.attribute_sample_size == 0 {
            return Err(OptimizerError::Config("sample sizes must be > 0".into()));
        }
        if self.materialization.simplify_min > self.materialization.simplify_max {
            return Err(OptimizerError::Config(
                "materialization.simplify_min exceeds simplify_max".into(),
            ));
        }
        if self.materialization.schema.trim().is_empty() {
            return Err(OptimizerError::Config("materialization.schema is empty".into()));
        }
        Ok(())
    }
}

/// Plan selection thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// At or below this row count the plan is `Direct`
    #[serde(default = "default_direct_max_rows")]
    pub direct_max_rows: u64,
    /// Attribute selectivity strictly below this selects `AttributeFirst`
    #[serde(default = "default_attribute_first_max_selectivity")]
    pub attribute_first_max_selectivity: f64,
    /// Spatial selectivity strictly below this (with enough rows) selects `BboxThenExact`
    #[serde(default = "default_bbox_max_spatial_selectivity")]
    pub bbox_max_spatial_selectivity: f64,
    #[serde(default = "default_bbox_min_rows")]
    pub bbox_min_rows: u64,
    /// Above this row count the plan is `ProgressiveChunks`
    #[serde(default = "default_progressive_min_rows")]
    pub progressive_min_rows: u64,
    #[serde(default = "default_chunk_base")]
    pub chunk_base: u32,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: u32,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u32,
}

fn default_direct_max_rows() -> u64 {
    1_000
}
fn default_attribute_first_max_selectivity() -> f64 {
    0.3
}
fn default_bbox_max_spatial_selectivity() -> f64 {
    0.5
}
fn default_bbox_min_rows() -> u64 {
    50_000
}
fn default_progressive_min_rows() -> u64 {
    200_000
}
fn default_chunk_base() -> u32 {
    10_000
}
fn default_min_chunk_size() -> u32 {
    1_000
}
fn default_max_chunk_size() -> u32 {
    50_000
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            direct_max_rows: default_direct_max_rows(),
            attribute_first_max_selectivity: default_attribute_first_max_selectivity(),
            bbox_max_spatial_selectivity: default_bbox_max_spatial_selectivity(),
            bbox_min_rows: default_bbox_min_rows(),
            progressive_min_rows: default_progressive_min_rows(),
            chunk_base: default_chunk_base(),
            min_chunk_size: default_min_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
        }
    }
}

/// Sampling and selectivity estimation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Rows sampled for geometry complexity
    #[serde(default = "default_stats_sample_size")]
    pub stats_sample_size: usize,
    /// Rows sampled for attribute selectivity
    #[serde(default = "default_attribute_sample_size")]
    pub attribute_sample_size: usize,
    /// Bbox overlap over-estimates true spatial matches by roughly this factor
    #[serde(default = "default_spatial_dampening")]
    pub spatial_dampening: f64,
    #[serde(default = "default_stats_ttl_secs")]
    pub stats_ttl_secs: u64,
    /// Returned whenever an estimate cannot be computed
    #[serde(default = "default_fallback_selectivity")]
    pub fallback_selectivity: f64,
}

fn default_stats_sample_size() -> usize {
    100
}
fn default_attribute_sample_size() -> usize {
    200
}
fn default_spatial_dampening() -> f64 {
    0.7
}
fn default_stats_ttl_secs() -> u64 {
    300
}
fn default_fallback_selectivity() -> f64 {
    0.5
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            stats_sample_size: default_stats_sample_size(),
            attribute_sample_size: default_attribute_sample_size(),
            spatial_dampening: default_spatial_dampening(),
            stats_ttl_secs: default_stats_ttl_secs(),
            fallback_selectivity: default_fallback_selectivity(),
        }
    }
}

/// Id predicate construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdSetConfig {
    /// Up to this many ids are emitted as a literal `IN` list
    #[serde(default = "default_in_list_max")]
    pub in_list_max: usize,
    /// Range compression is only attempted from this many ids
    #[serde(default = "default_range_min_ids")]
    pub range_min_ids: usize,
    #[serde(default = "default_range_coverage_threshold")]
    pub range_coverage_threshold: f64,
}

fn default_in_list_max() -> usize {
    500
}
fn default_range_min_ids() -> usize {
    20
}
fn default_range_coverage_threshold() -> f64 {
    0.5
}

impl Default for IdSetConfig {
    fn default() -> Self {
        Self {
            in_list_max: default_in_list_max(),
            range_min_ids: default_range_min_ids(),
            range_coverage_threshold: default_range_coverage_threshold(),
        }
    }
}

/// Server-side precomputation of buffered source geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializationConfig {
    /// Source row count above which results are materialized
    #[serde(default = "default_threshold_rows")]
    pub threshold_rows: u64,
    /// Source row count above which buffer segments are reduced
    #[serde(default = "default_large_source_rows")]
    pub large_source_rows: u64,
    #[serde(default = "default_segments")]
    pub segments: u32,
    #[serde(default = "default_large_source_segments")]
    pub large_source_segments: u32,
    #[serde(default = "default_simplify_factor")]
    pub simplify_factor: f64,
    #[serde(default = "default_simplify_min")]
    pub simplify_min: f64,
    #[serde(default = "default_simplify_max")]
    pub simplify_max: f64,
    /// Schema holding session-scoped results
    #[serde(default = "default_schema")]
    pub schema: String,
}

fn default_threshold_rows() -> u64 {
    50
}
fn default_large_source_rows() -> u64 {
    10_000
}
fn default_segments() -> u32 {
    8
}
fn default_large_source_segments() -> u32 {
    3
}
fn default_simplify_factor() -> f64 {
    0.1
}
fn default_simplify_min() -> f64 {
    0.5
}
fn default_simplify_max() -> f64 {
    10.0
}
fn default_schema() -> String {
    "filteropt_temp".to_string()
}

impl Default for MaterializationConfig {
    fn default() -> Self {
        Self {
            threshold_rows: default_threshold_rows(),
            large_source_rows: default_large_source_rows(),
            segments: default_segments(),
            large_source_segments: default_large_source_segments(),
            simplify_factor: default_simplify_factor(),
            simplify_min: default_simplify_min(),
            simplify_max: default_simplify_max(),
            schema: default_schema(),
        }
    }
}

/// Expression cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    100
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

/// Parallel dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound on worker threads; the pool also leaves one core free
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_max_workers() -> usize {
    4
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = OptimizerConfig::default();
        assert_eq!(config.planner.direct_max_rows, 1_000);
        assert_eq!(config.estimator.spatial_dampening, 0.7);
        assert_eq!(config.ids.in_list_max, 500);
        assert_eq!(config.materialization.threshold_rows, 50);
        assert_eq!(config.cache.capacity, 100);
        assert_eq!(config.dispatch.max_workers, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            OptimizerConfig::from_json(r#"{"ids": {"range_coverage_threshold": 0.6}}"#).unwrap();
        assert_eq!(config.ids.range_coverage_threshold, 0.6);
        assert_eq!(config.ids.range_min_ids, 20);
        assert_eq!(config.planner, PlannerConfig::default());
    }

    #[test]
    fn test_empty_object_is_default() {
        assert_eq!(OptimizerConfig::from_json("{}").unwrap(), OptimizerConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = OptimizerConfig::from_json(r#"{"cache": {"capacity": 0}}"#).unwrap_err();
        assert_eq!(err.code(), "FILTEROPT_CONFIG_ERROR");

        let err = OptimizerConfig::from_json(
            r#"{"planner": {"min_chunk_size": 5000, "max_chunk_size": 100}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("chunk"));

        assert!(OptimizerConfig::from_json(r#"{"estimator": {"spatial_dampening": 1.5}}"#).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"materialization": {{"schema": "scratch"}}}}"#).unwrap();

        let config = OptimizerConfig::load(file.path()).unwrap();
        assert_eq!(config.materialization.schema, "scratch");
    }

    #[test]
    fn test_load_missing_file() {
        let err = OptimizerConfig::load(Path::new("/nonexistent/filteropt.json")).unwrap_err();
        assert_eq!(err.code(), "FILTEROPT_CONFIG_ERROR");
    }
}
