//! In-memory backend: lazily built R-tree per dataset
//!
//! Selection is two-phase. Candidates come from the R-tree by envelope, then
//! each candidate is tested exactly. A row matches when any one of the
//! requested predicates holds against any one of the filter geometries.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use geo::coordinate_position::CoordPos;
use geo::dimensions::Dimensions;
use geo::{BoundingRect, Geometry, Relate};
use parking_lot::Mutex;
use rstar::{RTree, RTreeObject, AABB};

use super::predicate::SpatialPredicate;
use crate::dataset::BackendResult;

/// Features of an in-memory dataset, supplied by the host
pub trait FeatureSource: Send + Sync {
    fn dataset_id(&self) -> &str;

    /// Every feature with its row id
    fn features(&self) -> BackendResult<Vec<(i64, Geometry<f64>)>>;
}

#[derive(Debug, Clone)]
struct IndexEntry {
    id: i64,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

struct DatasetIndex {
    tree: RTree<IndexEntry>,
    geometries: HashMap<i64, Geometry<f64>>,
}

impl DatasetIndex {
    fn build(features: Vec<(i64, Geometry<f64>)>) -> Self {
        let entries: Vec<IndexEntry> = features
            .iter()
            .filter_map(|(id, g)| envelope_of(g).map(|envelope| IndexEntry { id: *id, envelope }))
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
            geometries: features.into_iter().collect(),
        }
    }
}

fn envelope_of(geometry: &Geometry<f64>) -> Option<AABB<[f64; 2]>> {
    geometry.bounding_rect().map(|rect| {
        let (min, max) = (rect.min(), rect.max());
        AABB::from_corners([min.x, min.y], [max.x, max.y])
    })
}

/// Exact predicate test of `candidate` against `filter`
pub fn relates(predicate: SpatialPredicate, candidate: &Geometry<f64>, filter: &Geometry<f64>) -> bool {
    let matrix = candidate.relate(filter);
    let interiors_meet = matrix.get(CoordPos::Inside, CoordPos::Inside) != Dimensions::Empty;
    match predicate {
        SpatialPredicate::Intersects => matrix.is_intersects(),
        SpatialPredicate::Disjoint => matrix.is_disjoint(),
        SpatialPredicate::Contains => matrix.is_contains(),
        SpatialPredicate::Within => matrix.is_within(),
        SpatialPredicate::Equals => matrix.is_within() && matrix.is_contains(),
        SpatialPredicate::Touches => matrix.is_intersects() && !interiors_meet,
        SpatialPredicate::Overlaps | SpatialPredicate::Crosses => {
            interiors_meet && !matrix.is_contains() && !matrix.is_within()
        }
    }
}

/// Cache of per-dataset spatial indexes
#[derive(Default)]
pub struct InMemoryIndexer {
    indexes: Mutex<HashMap<String, Arc<DatasetIndex>>>,
}

impl InMemoryIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_for(&self, source: &dyn FeatureSource) -> BackendResult<Arc<DatasetIndex>> {
        if let Some(index) = self.indexes.lock().get(source.dataset_id()) {
            return Ok(index.clone());
        }
        // Built outside the lock; a concurrent build of the same dataset keeps the first
        let built = Arc::new(DatasetIndex::build(source.features()?));
        let mut indexes = self.indexes.lock();
        Ok(indexes
            .entry(source.dataset_id().to_string())
            .or_insert(built)
            .clone())
    }

    /// Ids of rows matching any predicate against any filter geometry, sorted
    pub fn select(
        &self,
        source: &dyn FeatureSource,
        filters: &[Geometry<f64>],
        predicates: &[SpatialPredicate],
    ) -> BackendResult<Vec<i64>> {
        if filters.is_empty() || predicates.is_empty() {
            return Ok(Vec::new());
        }
        let index = self.index_for(source)?;
        let full_scan = predicates.iter().any(|p| !p.implies_bbox_overlap());

        let mut matched = BTreeSet::new();
        for filter in filters {
            let candidates: Vec<i64> = if full_scan {
                index.geometries.keys().copied().collect()
            } else {
                match envelope_of(filter) {
                    Some(envelope) => index
                        .tree
                        .locate_in_envelope_intersecting(&envelope)
                        .map(|e| e.id)
                        .collect(),
                    None => continue,
                }
            };
            for id in candidates {
                if matched.contains(&id) {
                    continue;
                }
                let Some(geometry) = index.geometries.get(&id) else { continue };
                if predicates.iter().any(|p| relates(*p, geometry, filter)) {
                    matched.insert(id);
                }
            }
        }
        Ok(matched.into_iter().collect())
    }

    /// Drop a dataset's index; the next selection rebuilds it
    pub fn clear_cache(&self, dataset_id: &str) -> bool {
        self.indexes.lock().remove(dataset_id).is_some()
    }

    pub fn is_cached(&self, dataset_id: &str) -> bool {
        self.indexes.lock().contains_key(dataset_id)
    }

    pub fn indexed_rows(&self, dataset_id: &str) -> Option<usize> {
        self.indexes.lock().get(dataset_id).map(|i| i.tree.size())
    }
}
