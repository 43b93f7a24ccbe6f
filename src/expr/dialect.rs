//! Dialect classification for expressions of unknown origin
//!
//! Generated expressions always carry their `BackendKind` explicitly. This
//! heuristic exists only for foreign expressions found on a dataset, and
//! `Unknown` is an ordinary answer.

use regex::Regex;
use serde::Serialize;

use crate::dataset::BackendKind;

/// Likely dialect of an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionDialect {
    Server,
    EmbeddedSql,
    FlatFile,
    Unknown,
}

impl ExpressionDialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpressionDialect::Server => "server",
            ExpressionDialect::EmbeddedSql => "embedded_sql",
            ExpressionDialect::FlatFile => "flat_file",
            ExpressionDialect::Unknown => "unknown",
        }
    }

    /// Backend family this dialect belongs to, if known
    pub fn backend_kind(&self) -> Option<BackendKind> {
        match self {
            ExpressionDialect::Server => Some(BackendKind::Server),
            ExpressionDialect::EmbeddedSql => Some(BackendKind::EmbeddedSql),
            ExpressionDialect::FlatFile => Some(BackendKind::FlatFile),
            ExpressionDialect::Unknown => None,
        }
    }
}

fn matcher(pattern: &str) -> Option<Regex> {
    Regex::new(pattern).ok()
}

/// Guess the dialect of a foreign expression
pub fn classify_expression(expr: &str) -> ExpressionDialect {
    let text = expr.trim();
    if text.is_empty() {
        return ExpressionDialect::Unknown;
    }

    let server_markers = [
        r"::\s*(geometry|geography|bigint|integer|text)\b",
        r"&&",
        r"(?i)\bST_(Buffer|DWithin|MakeEnvelope|Transform|SetSRID)\s*\(",
        r#"(?i)"[A-Za-z_][\w]*"\s*\.\s*"[A-Za-z_][\w]*"\s*\.\s*""#,
    ];
    let embedded_markers = [
        r"(?i)\b(MbrIntersects|MbrContains|MbrWithin|MbrOverlaps|BuildMbr|GeomFromText|SpatialIndex|ST_GeomFromText)\s*\(",
        r"(?i)\bSpatialIndex\b",
        r"(?i)\bROWID\b",
    ];
    let flat_markers = [
        r"(?i)\$(id|geometry|area|length)\b",
        r"(?i)\b(intersects|geom_from_wkt|bounds|make_point)\s*\(",
    ];

    let hits = |patterns: &[&str]| {
        patterns
            .iter()
            .filter_map(|p| matcher(p))
            .filter(|re| re.is_match(text))
            .count()
    };

    let server = hits(&server_markers);
    let embedded = hits(&embedded_markers);
    let flat = hits(&flat_markers);

    let best = server.max(embedded).max(flat);
    if best == 0 {
        return ExpressionDialect::Unknown;
    }
    let leaders = [server, embedded, flat].iter().filter(|&&h| h == best).count();
    if leaders > 1 {
        return ExpressionDialect::Unknown;
    }
    if best == server {
        ExpressionDialect::Server
    } else if best == embedded {
        ExpressionDialect::EmbeddedSql
    } else {
        ExpressionDialect::FlatFile
    }
}
