//! Spatial predicate names across backends

use serde::{Deserialize, Serialize};

/// Topological predicate requested by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialPredicate {
    Intersects,
    Contains,
    Within,
    Touches,
    Overlaps,
    Crosses,
    Disjoint,
    Equals,
}

impl SpatialPredicate {
    pub const ALL: [SpatialPredicate; 8] = [
        SpatialPredicate::Intersects,
        SpatialPredicate::Contains,
        SpatialPredicate::Within,
        SpatialPredicate::Touches,
        SpatialPredicate::Overlaps,
        SpatialPredicate::Crosses,
        SpatialPredicate::Disjoint,
        SpatialPredicate::Equals,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpatialPredicate::Intersects => "intersects",
            SpatialPredicate::Contains => "contains",
            SpatialPredicate::Within => "within",
            SpatialPredicate::Touches => "touches",
            SpatialPredicate::Overlaps => "overlaps",
            SpatialPredicate::Crosses => "crosses",
            SpatialPredicate::Disjoint => "disjoint",
            SpatialPredicate::Equals => "equals",
        }
    }

    /// Function name on server backends
    pub fn server_function(&self) -> &'static str {
        match self {
            SpatialPredicate::Intersects => "ST_Intersects",
            SpatialPredicate::Contains => "ST_Contains",
            SpatialPredicate::Within => "ST_Within",
            SpatialPredicate::Touches => "ST_Touches",
            SpatialPredicate::Overlaps => "ST_Overlaps",
            SpatialPredicate::Crosses => "ST_Crosses",
            SpatialPredicate::Disjoint => "ST_Disjoint",
            SpatialPredicate::Equals => "ST_Equals",
        }
    }

    /// Function name on embedded SQL backends
    pub fn embedded_function(&self) -> &'static str {
        match self {
            SpatialPredicate::Intersects => "Intersects",
            SpatialPredicate::Contains => "Contains",
            SpatialPredicate::Within => "Within",
            SpatialPredicate::Touches => "Touches",
            SpatialPredicate::Overlaps => "Overlaps",
            SpatialPredicate::Crosses => "Crosses",
            SpatialPredicate::Disjoint => "Disjoint",
            SpatialPredicate::Equals => "Equals",
        }
    }

    /// True if a match requires the two envelopes to overlap.
    ///
    /// Bbox pre-filters are only valid for these.
    pub fn implies_bbox_overlap(&self) -> bool {
        !matches!(self, SpatialPredicate::Disjoint)
    }

    /// Map a function or predicate name in any dialect
    pub fn from_function_name(name: &str) -> Option<Self> {
        let lowered = name.to_ascii_lowercase();
        let bare = lowered.strip_prefix("st_").unwrap_or(&lowered);
        SpatialPredicate::ALL.iter().copied().find(|p| p.as_str() == bare)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_names() {
        assert_eq!(SpatialPredicate::Within.server_function(), "ST_Within");
        assert_eq!(SpatialPredicate::Within.embedded_function(), "Within");
    }

    #[test]
    fn test_from_function_name() {
        assert_eq!(
            SpatialPredicate::from_function_name("ST_Intersects"),
            Some(SpatialPredicate::Intersects)
        );
        assert_eq!(
            SpatialPredicate::from_function_name("crosses"),
            Some(SpatialPredicate::Crosses)
        );
        assert_eq!(SpatialPredicate::from_function_name("ST_Buffer"), None);
    }

    #[test]
    fn test_only_disjoint_skips_bbox() {
        for p in SpatialPredicate::ALL {
            assert_eq!(p.implies_bbox_overlap(), p != SpatialPredicate::Disjoint);
        }
    }
}
