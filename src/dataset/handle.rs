//! Dataset handle trait and the data it exposes

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::bbox::BBox;
use super::errors::BackendResult;

/// Backend family a dataset lives in.
///
/// Carried explicitly on every request; never inferred from expression text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Full SQL server
    Server,
    /// Embedded SQL engine
    EmbeddedSql,
    /// Flat-file store with a minimal expression grammar
    FlatFile,
    /// Feature set held in memory
    InMemory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Server => "server",
            BackendKind::EmbeddedSql => "embedded_sql",
            BackendKind::FlatFile => "flat_file",
            BackendKind::InMemory => "in_memory",
        }
    }

    /// Parse a backend name as used on the command line and in configs
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "server" | "postgres" | "postgresql" => Some(BackendKind::Server),
            "embedded_sql" | "embedded" | "spatialite" | "sqlite" => {
                Some(BackendKind::EmbeddedSql)
            }
            "flat_file" | "flatfile" | "ogr" | "file" => Some(BackendKind::FlatFile),
            "in_memory" | "memory" => Some(BackendKind::InMemory),
            _ => None,
        }
    }

    /// Whether independent filters on datasets of this family may run concurrently.
    ///
    /// Flat-file and in-memory filters mutate the live dataset handle directly.
    pub fn is_concurrency_safe(&self) -> bool {
        matches!(self, BackendKind::Server | BackendKind::EmbeddedSql)
    }

    /// Whether the backend grammar accepts subqueries
    pub fn supports_subqueries(&self) -> bool {
        matches!(self, BackendKind::Server | BackendKind::EmbeddedSql)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Dominant geometry type of a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryType {
    Point,
    Line,
    Polygon,
    NoGeometry,
    Unknown,
}

impl GeometryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryType::Point => "point",
            GeometryType::Line => "line",
            GeometryType::Polygon => "polygon",
            GeometryType::NoGeometry => "no_geometry",
            GeometryType::Unknown => "unknown",
        }
    }
}

/// One sampled row: id, attributes and geometry summary
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRow {
    /// Row id (primary key / feature id)
    pub id: i64,
    /// Attribute values by field name
    pub attributes: Map<String, Value>,
    /// Vertex count of the row geometry (0 if none)
    pub vertex_count: u32,
    /// Geometry envelope, if the row has a geometry
    pub bbox: Option<BBox>,
}

impl SampleRow {
    /// Create a row without geometry
    pub fn new(id: i64, attributes: Value) -> Self {
        let attributes = match attributes {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id,
            attributes,
            vertex_count: 0,
            bbox: None,
        }
    }

    /// Attach a geometry summary
    pub fn with_geometry(mut self, vertex_count: u32, bbox: BBox) -> Self {
        self.vertex_count = vertex_count;
        self.bbox = Some(bbox);
        self
    }
}

/// Handle to a dataset owned by the host.
///
/// Implementations must be callable from dispatcher worker threads.
pub trait DatasetHandle: Send + Sync {
    /// Stable dataset identity (cache key component)
    fn dataset_id(&self) -> &str;

    /// Backend family
    fn backend_kind(&self) -> BackendKind;

    /// Row count as reported by the backend.
    ///
    /// `None` or a negative value means the backend does not know.
    fn row_count(&self) -> Option<i64>;

    /// Dataset extent, if known
    fn extent(&self) -> Option<BBox>;

    /// Up to `n` rows, randomly chosen where the backend supports it
    fn get_sample(&self, n: usize) -> BackendResult<Vec<SampleRow>>;

    /// Apply a filter expression, returning the matching row count
    fn execute_filter(&self, expression: &str) -> BackendResult<u64>;

    /// Dominant geometry type
    fn geometry_type(&self) -> GeometryType {
        GeometryType::Unknown
    }

    /// Whether the backend maintains a spatial index on the geometry column
    fn has_native_spatial_index(&self) -> bool {
        false
    }

    /// Id column used in id predicates
    fn id_column(&self) -> &str {
        "fid"
    }
}
