//! Id sets and range compression
//!
//! An id predicate is carried either as an explicit sorted list or as a
//! set of inclusive ranges minus exclusions. Both reduce to the same set of
//! ids; compression only changes the shape of the rendered expression.

use serde::{Deserialize, Serialize};

use super::lexer::quote_ident;

/// Inclusive id range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdRange {
    pub min: i64,
    pub max: i64,
}

impl IdRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn single(id: i64) -> Self {
        Self { min: id, max: id }
    }

    /// Number of ids in the range
    pub fn width(&self) -> u128 {
        (self.max as i128 - self.min as i128 + 1) as u128
    }

    pub fn contains(&self, id: i64) -> bool {
        id >= self.min && id <= self.max
    }
}

/// How a compressed set is written out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSyntax {
    /// `col BETWEEN a AND b`
    Between,
    /// `(col >= a AND col <= b)` for grammars without BETWEEN
    Bounds,
}

/// Reference to a set of ids
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdSetRef {
    /// Sorted, deduplicated ids
    List(Vec<i64>),
    /// Sorted disjoint ranges; exclusions lie inside the ranges
    Ranges {
        ranges: Vec<IdRange>,
        exclusions: Vec<i64>,
    },
}

impl IdSetRef {
    /// Build a list, sorting and deduplicating
    pub fn from_ids(ids: impl IntoIterator<Item = i64>) -> Self {
        let mut ids: Vec<i64> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        IdSetRef::List(ids)
    }

    /// Build a range set, normalizing overlaps and dropping stray exclusions
    pub fn from_ranges(ranges: Vec<IdRange>, exclusions: impl IntoIterator<Item = i64>) -> Self {
        let ranges = merge_ranges(ranges);
        let mut exclusions: Vec<i64> = exclusions
            .into_iter()
            .filter(|id| ranges.iter().any(|r| r.contains(*id)))
            .collect();
        exclusions.sort_unstable();
        exclusions.dedup();

        let all_singletons = ranges.iter().all(|r| r.min == r.max);
        if all_singletons {
            return IdSetRef::from_ids(
                ranges
                    .iter()
                    .map(|r| r.min)
                    .filter(|id| exclusions.binary_search(id).is_err()),
            );
        }
        IdSetRef::Ranges { ranges, exclusions }
    }

    /// Compress a list into ranges when that is both dense and smaller.
    ///
    /// Ids are clustered greedily: the next id joins the current cluster if
    /// the cluster would stay at least `coverage_threshold` dense. The result
    /// is accepted only if overall coverage meets the threshold and the
    /// rendered term count (two per range, one per exclusion) is below the
    /// id count.
    pub fn compress(ids: &[i64], min_ids: usize, coverage_threshold: f64) -> Option<IdSetRef> {
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() < min_ids.max(2) {
            return None;
        }

        // (start, end, count)
        let mut clusters: Vec<(i64, i64, u128)> = Vec::new();
        for &id in &sorted {
            if let Some(last) = clusters.last_mut() {
                let width = (id as i128 - last.0 as i128 + 1) as u128;
                if (last.2 + 1) as f64 / width as f64 >= coverage_threshold {
                    last.1 = id;
                    last.2 += 1;
                    continue;
                }
            }
            clusters.push((id, id, 1));
        }

        let total_width: u128 = clusters
            .iter()
            .map(|(s, e, _)| (*e as i128 - *s as i128 + 1) as u128)
            .sum();
        let coverage = sorted.len() as f64 / total_width as f64;
        if coverage < coverage_threshold {
            return None;
        }

        let mut exclusions = Vec::new();
        let mut cursor = sorted.iter().peekable();
        for (start, end, _) in &clusters {
            let mut expected = *start;
            while let Some(&&id) = cursor.peek() {
                if id > *end {
                    break;
                }
                while expected < id {
                    exclusions.push(expected);
                    expected += 1;
                }
                expected = id.saturating_add(1);
                cursor.next();
            }
        }

        if 2 * clusters.len() + exclusions.len() >= sorted.len() {
            return None;
        }

        Some(IdSetRef::Ranges {
            ranges: clusters
                .into_iter()
                .map(|(s, e, _)| IdRange::new(s, e))
                .collect(),
            exclusions,
        })
    }

    /// Compress when worthwhile, otherwise keep the sorted list
    pub fn compress_or_list(ids: &[i64], min_ids: usize, coverage_threshold: f64) -> IdSetRef {
        Self::compress(ids, min_ids, coverage_threshold).unwrap_or_else(|| Self::from_ids(ids.iter().copied()))
    }

    /// Expand to the explicit sorted id list
    pub fn to_ids(&self) -> Vec<i64> {
        match self {
            IdSetRef::List(ids) => ids.clone(),
            IdSetRef::Ranges { ranges, exclusions } => {
                let mut out = Vec::new();
                for range in ranges {
                    let mut id = range.min;
                    loop {
                        if exclusions.binary_search(&id).is_err() {
                            out.push(id);
                        }
                        if id == range.max {
                            break;
                        }
                        id += 1;
                    }
                }
                out
            }
        }
    }

    pub fn contains(&self, id: i64) -> bool {
        match self {
            IdSetRef::List(ids) => ids.binary_search(&id).is_ok(),
            IdSetRef::Ranges { ranges, exclusions } => {
                ranges.iter().any(|r| r.contains(id)) && exclusions.binary_search(&id).is_err()
            }
        }
    }

    /// Number of ids in the set
    pub fn len(&self) -> u128 {
        match self {
            IdSetRef::List(ids) => ids.len() as u128,
            IdSetRef::Ranges { ranges, exclusions } => {
                let width: u128 = ranges.iter().map(IdRange::width).sum();
                width - exclusions.len() as u128
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, IdSetRef::Ranges { .. })
    }

    /// Fraction of the spanned ids that are members
    pub fn coverage(&self) -> f64 {
        match self {
            IdSetRef::List(ids) => match (ids.first(), ids.last()) {
                (Some(first), Some(last)) => {
                    ids.len() as f64 / IdRange::new(*first, *last).width() as f64
                }
                _ => 0.0,
            },
            IdSetRef::Ranges { ranges, .. } => {
                let width: u128 = ranges.iter().map(IdRange::width).sum();
                if width == 0 {
                    0.0
                } else {
                    self.len() as f64 / width as f64
                }
            }
        }
    }

    /// Render as a predicate over `column`
    pub fn to_predicate(&self, column: &str, syntax: RangeSyntax) -> String {
        let col = quote_ident(column);
        match self {
            IdSetRef::List(ids) => render_list(&col, ids),
            IdSetRef::Ranges { ranges, exclusions } => {
                let terms: Vec<String> = ranges
                    .iter()
                    .map(|r| render_range(&col, r, syntax))
                    .collect();
                let mut out = if terms.len() == 1 {
                    terms[0].clone()
                } else {
                    format!("({})", terms.join(" OR "))
                };
                if !exclusions.is_empty() {
                    let excluded: Vec<String> = exclusions.iter().map(|i| i.to_string()).collect();
                    out = format!("{} AND {} NOT IN ({})", out, col, excluded.join(", "));
                }
                out
            }
        }
    }
}

fn render_list(col: &str, ids: &[i64]) -> String {
    match ids {
        [] => "FALSE".to_string(),
        [single] => format!("{} = {}", col, single),
        _ => {
            let rendered: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
            format!("{} IN ({})", col, rendered.join(", "))
        }
    }
}

fn render_range(col: &str, range: &IdRange, syntax: RangeSyntax) -> String {
    if range.min == range.max {
        return format!("{} = {}", col, range.min);
    }
    match syntax {
        RangeSyntax::Between => format!("{} BETWEEN {} AND {}", col, range.min, range.max),
        RangeSyntax::Bounds => format!("({} >= {} AND {} <= {})", col, range.min, col, range.max),
    }
}

/// Sort ranges and merge overlapping or adjacent ones
fn merge_ranges(mut ranges: Vec<IdRange>) -> Vec<IdRange> {
    ranges.sort();
    let mut merged: Vec<IdRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if (range.min as i128) <= last.max as i128 + 1 => {
                last.max = last.max.max(range.max);
            }
            _ => merged.push(range),
        }
    }
    merged
}
