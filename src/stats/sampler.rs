//! Dataset statistics sampling with a TTL cache

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::seq::index::sample as sample_indices;
use serde::{Deserialize, Serialize};

use crate::config::EstimatorConfig;
use crate::dataset::{BBox, DatasetHandle, GeometryType, SampleRow};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};

/// Sampled dataset statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    /// Row count, 0 when the backend does not know
    pub row_count: u64,
    /// False when the backend reported an absent or negative count
    pub row_count_known: bool,
    pub extent: Option<BBox>,
    pub has_native_spatial_index: bool,
    pub geometry_type: GeometryType,
    /// Mean vertex count over sampled rows that have a geometry
    pub avg_vertex_count: f64,
}

impl DatasetStats {
    /// Stats for a dataset of known size and nothing else
    pub fn new(row_count: u64) -> Self {
        Self {
            row_count,
            row_count_known: true,
            extent: None,
            has_native_spatial_index: false,
            geometry_type: GeometryType::Unknown,
            avg_vertex_count: 0.0,
        }
    }

    pub fn with_extent(mut self, extent: BBox) -> Self {
        self.extent = Some(extent);
        self
    }

    pub fn with_native_index(mut self, has_index: bool) -> Self {
        self.has_native_spatial_index = has_index;
        self
    }

    pub fn with_avg_vertex_count(mut self, avg: f64) -> Self {
        self.avg_vertex_count = avg;
        self
    }

    pub fn with_geometry_type(mut self, geometry_type: GeometryType) -> Self {
        self.geometry_type = geometry_type;
        self
    }

    /// Geometry complexity used for chunk sizing: ten vertices per unit
    pub fn complexity(&self) -> f64 {
        (self.avg_vertex_count / 10.0).max(0.0)
    }
}

struct CachedStats {
    stats: DatasetStats,
    sampled_at: Instant,
}

/// Samples datasets and caches the result per dataset id
pub struct StatsSampler {
    sample_size: usize,
    ttl: Duration,
    cache: Mutex<HashMap<String, CachedStats>>,
    metrics: Arc<MetricsRegistry>,
}

impl StatsSampler {
    pub fn new(config: &EstimatorConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            sample_size: config.stats_sample_size,
            ttl: Duration::from_secs(config.stats_ttl_secs),
            cache: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Stats for a dataset, from cache while fresh
    pub fn sample(&self, dataset: &dyn DatasetHandle) -> DatasetStats {
        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.get(dataset.dataset_id()) {
                if entry.sampled_at.elapsed() < self.ttl {
                    return entry.stats.clone();
                }
            }
        }
        self.refresh(dataset)
    }

    /// Resample, replacing any cached stats
    pub fn refresh(&self, dataset: &dyn DatasetHandle) -> DatasetStats {
        let stats = self.collect(dataset);
        self.cache.lock().insert(
            dataset.dataset_id().to_string(),
            CachedStats {
                stats: stats.clone(),
                sampled_at: Instant::now(),
            },
        );
        stats
    }

    /// Drop cached stats for one dataset; returns true if any were cached
    pub fn invalidate(&self, dataset_id: &str) -> bool {
        self.cache.lock().remove(dataset_id).is_some()
    }

    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }

    fn collect(&self, dataset: &dyn DatasetHandle) -> DatasetStats {
        let dataset_id = dataset.dataset_id();
        let (row_count, row_count_known) = match dataset.row_count() {
            Some(n) if n >= 0 => (n as u64, true),
            reported => {
                let reported = reported.map_or_else(|| "none".to_string(), |n| n.to_string());
                log_event_with_fields(
                    Event::StatsRowCountUnknown,
                    &[("dataset", dataset_id), ("reported", &reported)],
                );
                (0, false)
            }
        };

        let avg_vertex_count = match dataset.get_sample(self.sample_size) {
            Ok(rows) => average_vertices(&self.bound_sample(rows)),
            Err(e) => {
                self.metrics.increment_estimations_degraded();
                log_event_with_fields(
                    Event::EstimationDegraded,
                    &[("dataset", dataset_id), ("reason", &e.to_string())],
                );
                0.0
            }
        };

        let stats = DatasetStats {
            row_count,
            row_count_known,
            extent: dataset.extent().filter(BBox::is_finite),
            has_native_spatial_index: dataset.has_native_spatial_index(),
            geometry_type: dataset.geometry_type(),
            avg_vertex_count,
        };

        log_event_with_fields(
            Event::StatsSampled,
            &[
                ("dataset", dataset_id),
                ("row_count", &stats.row_count.to_string()),
                ("avg_vertex_count", &format!("{:.1}", stats.avg_vertex_count)),
            ],
        );
        stats
    }

    /// Keep at most `sample_size` rows, chosen at random
    fn bound_sample(&self, rows: Vec<SampleRow>) -> Vec<SampleRow> {
        if rows.len() <= self.sample_size {
            return rows;
        }
        let mut rng = rand::thread_rng();
        let mut picked: Vec<usize> = sample_indices(&mut rng, rows.len(), self.sample_size).into_vec();
        picked.sort_unstable();
        picked.into_iter().map(|i| rows[i].clone()).collect()
    }
}

fn average_vertices(rows: &[SampleRow]) -> f64 {
    let with_geometry: Vec<u32> = rows
        .iter()
        .filter(|r| r.bbox.is_some() || r.vertex_count > 0)
        .map(|r| r.vertex_count)
        .collect();
    if with_geometry.is_empty() {
        return 0.0;
    }
    with_geometry.iter().map(|&v| v as f64).sum::<f64>() / with_geometry.len() as f64
}
