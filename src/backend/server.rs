//! Server backend: session-scoped materialized results
//!
//! Buffered spatial joins against a large or filtered source are expensive to
//! evaluate inline, since every candidate row recomputes the source buffers.
//! Above the materialization threshold the source is precomputed once per
//! session with:
//!
//! - `geom_original`: source geometry as stored
//! - `geom_simplified`: topology-preserving simplification
//! - `geom_buffered`: buffered geometry used by the predicate
//!
//! plus GIST indexes on the simplified, buffered and envelope forms.
//! Creation is attempted once; on failure the inline expression is used.
//! Names are derived from the full session id and the source definition, so
//! a repeated request within a session reuses the live result.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use super::predicate::SpatialPredicate;
use super::registry::{MaterializationRegistry, MaterializedResultRef, ServerConnection};
use crate::config::MaterializationConfig;
use crate::error::{OptimizerError, OptimizerResult};
use crate::expr::{quote_ident, QualifiedName};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};

const SOURCE_ALIAS: &str = "__src";

/// Source rows driving a buffered spatial join
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedSource {
    pub session_id: String,
    pub table: QualifiedName,
    pub geometry_column: String,
    pub key_column: String,
    /// Attribute filter on the source, if any
    pub filter: Option<String>,
    pub row_count: u64,
    pub buffer_distance: f64,
}

impl BufferedSource {
    pub fn new(session_id: impl Into<String>, table: QualifiedName, row_count: u64) -> Self {
        Self {
            session_id: session_id.into(),
            table,
            geometry_column: "geom".to_string(),
            key_column: "fid".to_string(),
            filter: None,
            row_count,
            buffer_distance: 0.0,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_buffer(mut self, distance: f64) -> Self {
        self.buffer_distance = distance;
        self
    }

    pub fn with_geometry_column(mut self, column: impl Into<String>) -> Self {
        self.geometry_column = column.into();
        self
    }

    pub fn with_key_column(mut self, column: impl Into<String>) -> Self {
        self.key_column = column.into();
        self
    }

    fn active_filter(&self) -> Option<&str> {
        self.filter.as_deref().map(str::trim).filter(|f| !f.is_empty())
    }
}

/// Where the join reads source geometry from
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedSource {
    Materialized(Arc<MaterializedResultRef>),
    Inline(BufferedSource),
}

impl PreparedSource {
    pub fn is_materialized(&self) -> bool {
        matches!(self, PreparedSource::Materialized(_))
    }
}

pub struct ServerBackendRewriter {
    config: MaterializationConfig,
    registry: Arc<MaterializationRegistry>,
    metrics: Arc<MetricsRegistry>,
}

impl ServerBackendRewriter {
    pub fn new(
        config: MaterializationConfig,
        registry: Arc<MaterializationRegistry>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            config,
            registry,
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<MaterializationRegistry> {
        &self.registry
    }

    /// Precompute when the source is large or filtered
    pub fn should_materialize(&self, source: &BufferedSource) -> bool {
        source.row_count > self.config.threshold_rows || source.active_filter().is_some()
    }

    pub fn simplify_tolerance(&self, buffer_distance: f64) -> f64 {
        (buffer_distance.abs() * self.config.simplify_factor)
            .clamp(self.config.simplify_min, self.config.simplify_max)
    }

    /// Buffer quadrant segments, reduced for very large sources
    pub fn buffer_segments(&self, row_count: u64) -> u32 {
        if row_count > self.config.large_source_rows {
            self.config.large_source_segments
        } else {
            self.config.segments
        }
    }

    /// `mv_<session prefix>_<hash>` in the configured schema.
    ///
    /// The prefix is only a readable hint; the hash covers the whole session
    /// id as well as `parts`.
    pub fn result_name(&self, session_id: &str, parts: &[&str]) -> QualifiedName {
        let session: String = session_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .take(8)
            .collect();
        let mut hasher = Sha256::new();
        for part in std::iter::once(session_id).chain(parts.iter().copied()) {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        let digest = hasher.finalize();
        let hash: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
        QualifiedName::new(Some(&self.config.schema), format!("mv_{}_{}", session, hash))
    }

    /// Live result already registered for this session under `name`
    fn existing(&self, session_id: &str, name: &QualifiedName) -> Option<Arc<MaterializedResultRef>> {
        let result = self.registry.resolve(session_id, &name.render()).ok()?;
        log_event_with_fields(
            Event::MaterializationReused,
            &[("session", session_id), ("name", &name.to_string())],
        );
        Some(result)
    }

    fn source_result_name(&self, source: &BufferedSource) -> QualifiedName {
        let buffer = source.buffer_distance.to_string();
        self.result_name(
            &source.session_id,
            &[
                &source.table.render(),
                &source.geometry_column,
                source.active_filter().unwrap_or(""),
                &buffer,
            ],
        )
    }

    fn buffered_geometry(&self, geometry: &str, source: &BufferedSource) -> String {
        if source.buffer_distance == 0.0 {
            geometry.to_string()
        } else {
            format!(
                "ST_Buffer({}, {}, 'quad_segs={}')",
                geometry,
                source.buffer_distance,
                self.buffer_segments(source.row_count)
            )
        }
    }

    /// DDL creating the materialized source, in execution order
    pub fn materialization_statements(&self, source: &BufferedSource) -> Vec<String> {
        let name = self.source_result_name(source);
        let mv = name.render();
        let geom = format!("{}.{}", SOURCE_ALIAS, quote_ident(&source.geometry_column));
        let tolerance = self.simplify_tolerance(source.buffer_distance);
        let where_clause = source
            .active_filter()
            .map(|f| format!(" WHERE {}", f))
            .unwrap_or_default();

        vec![
            format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&self.config.schema)),
            format!(
                "CREATE MATERIALIZED VIEW {mv} AS SELECT {alias}.{key} AS \"key\", \
                 {geom} AS geom_original, \
                 ST_SimplifyPreserveTopology({geom}, {tol}) AS geom_simplified, \
                 {buffered} AS geom_buffered \
                 FROM {table} AS {alias}{where_clause}",
                mv = mv,
                alias = SOURCE_ALIAS,
                key = quote_ident(&source.key_column),
                geom = geom,
                tol = tolerance,
                buffered = self.buffered_geometry(&geom, source),
                table = source.table.render(),
                where_clause = where_clause,
            ),
            format!(
                "CREATE INDEX {} ON {} USING GIST (geom_simplified)",
                quote_ident(&format!("{}_simplified_idx", name.name)),
                mv
            ),
            format!(
                "CREATE INDEX {} ON {} USING GIST (geom_buffered)",
                quote_ident(&format!("{}_buffered_idx", name.name)),
                mv
            ),
            format!(
                "CREATE INDEX {} ON {} USING GIST (ST_Envelope(geom_buffered))",
                quote_ident(&format!("{}_envelope_idx", name.name)),
                mv
            ),
            format!("ANALYZE {}", mv),
        ]
    }

    /// Materialize the source if worthwhile, otherwise or on failure use it inline
    pub fn prepare_source(&self, connection: &dyn ServerConnection, source: &BufferedSource) -> PreparedSource {
        if !self.should_materialize(source) {
            return PreparedSource::Inline(source.clone());
        }

        let name = self.source_result_name(source);
        if let Some(result) = self.existing(&source.session_id, &name) {
            return PreparedSource::Materialized(result);
        }
        match self.run_statements(connection, &name, &self.materialization_statements(source)) {
            Ok(()) => {
                let result = self
                    .registry
                    .register(MaterializedResultRef::new(&source.session_id, name, "key"));
                PreparedSource::Materialized(result)
            }
            Err(_) => PreparedSource::Inline(source.clone()),
        }
    }

    /// Materialize the rows of `table` matching `expression`.
    ///
    /// The result's membership predicate can stand in for `expression` in a
    /// later combined filter on the same table.
    pub fn materialize_selection(
        &self,
        connection: &dyn ServerConnection,
        session_id: &str,
        table: &QualifiedName,
        key_column: &str,
        expression: &str,
    ) -> OptimizerResult<Arc<MaterializedResultRef>> {
        let name = self.result_name(session_id, &[&table.render(), key_column, expression]);
        if let Some(result) = self.existing(session_id, &name) {
            return Ok(result);
        }
        let mv = name.render();
        let statements = vec![
            format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&self.config.schema)),
            format!(
                "CREATE MATERIALIZED VIEW {} AS SELECT {} AS \"key\" FROM {} WHERE {}",
                mv,
                quote_ident(key_column),
                table.render(),
                expression
            ),
            format!(
                "CREATE UNIQUE INDEX {} ON {} (\"key\")",
                quote_ident(&format!("{}_key_idx", name.name)),
                mv
            ),
            format!("ANALYZE {}", mv),
        ];
        self.run_statements(connection, &name, &statements)?;
        Ok(self
            .registry
            .register(MaterializedResultRef::new(session_id, name, "key")))
    }

    fn run_statements(
        &self,
        connection: &dyn ServerConnection,
        name: &QualifiedName,
        statements: &[String],
    ) -> OptimizerResult<()> {
        let label = name.to_string();
        let create = format!("CREATE MATERIALIZED VIEW {} ", name.render());
        let mut created = false;
        for statement in statements {
            if let Err(e) = connection.execute(statement) {
                let reason = e.to_string();
                // Only a view this call created may be dropped
                if created {
                    let _ = connection.execute(&format!(
                        "DROP MATERIALIZED VIEW IF EXISTS {} CASCADE",
                        name.render()
                    ));
                }
                self.metrics.increment_materializations_failed();
                log_event_with_fields(
                    Event::MaterializationFailed,
                    &[("name", &label), ("reason", &reason)],
                );
                return Err(OptimizerError::Materialization(reason));
            }
            created |= statement.starts_with(&create);
        }
        self.metrics.increment_materializations_created();
        log_event_with_fields(Event::MaterializationCreated, &[("name", &label)]);
        Ok(())
    }

    /// Existence check of `target_geometry` against the prepared source.
    ///
    /// The envelope test runs before the exact predicate wherever the
    /// predicate implies envelope overlap.
    pub fn existence_predicate(
        &self,
        target_geometry: &str,
        prepared: &PreparedSource,
        predicate: SpatialPredicate,
    ) -> String {
        let (from, filter, source_geom) = match prepared {
            PreparedSource::Materialized(result) => (
                result.name.render(),
                None,
                format!("{}.geom_buffered", SOURCE_ALIAS),
            ),
            PreparedSource::Inline(source) => {
                let geom = format!("{}.{}", SOURCE_ALIAS, quote_ident(&source.geometry_column));
                (
                    source.table.render(),
                    source.active_filter().map(|f| format!("({})", f)),
                    self.buffered_geometry(&geom, source),
                )
            }
        };

        let mut conditions: Vec<String> = filter.into_iter().collect();
        if predicate.implies_bbox_overlap() {
            conditions.push(format!("{} && {}", target_geometry, source_geom));
        }
        conditions.push(format!(
            "{}({}, {})",
            predicate.server_function(),
            target_geometry,
            source_geom
        ));

        format!(
            "EXISTS (SELECT 1 FROM {} AS {} WHERE {})",
            from,
            SOURCE_ALIAS,
            conditions.join(" AND ")
        )
    }
}
