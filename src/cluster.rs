//! Density-based clustering over response feature rows.
//!
//! DBSCAN with Euclidean distances plus a silhouette score for the
//! resulting labeling. Minority labels are budgeted: labels are marked as
//! representing real assets smallest-first while their cumulative share of
//! all rows stays within one tenth.

use std::collections::BTreeMap;

use serde::Serialize;

pub const DEFAULT_EPS: f64 = 0.5;
pub const DEFAULT_MIN_SAMPLES: usize = 5;

/// Label given to points without a dense neighborhood.
pub const NOISE: i32 = -1;
const UNVISITED: i32 = -2;

const SUCCESS_RATIO_BUDGET: f64 = 0.10;

/// Per-label share of the dataset and whether the label was marked as
/// holding real assets.
#[derive(Debug, Clone, Serialize)]
pub struct LabelStats {
    pub count: usize,
    pub ratio: f64,
    pub success: bool,
}

/// Summary of one clustering run, serialized to JSON for the log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterReport {
    pub best_clusters: usize,
    pub best_score: f64,
    pub best_k: usize,
    pub label_description: BTreeMap<String, LabelStats>,
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

fn region_query(data: &[Vec<f64>], point: usize, eps: f64) -> Vec<usize> {
    (0..data.len())
        .filter(|&other| euclidean(&data[point], &data[other]) <= eps)
        .collect()
}

/// Plain DBSCAN: core points need at least `min_samples` neighbors within
/// `eps` (the point itself included); everything not reachable from a core
/// point is labeled [`NOISE`].
pub fn dbscan(data: &[Vec<f64>], eps: f64, min_samples: usize) -> Vec<i32> {
    let mut labels = vec![UNVISITED; data.len()];
    let mut cluster = 0i32;

    for point in 0..data.len() {
        if labels[point] != UNVISITED {
            continue;
        }
        let neighbors = region_query(data, point, eps);
        if neighbors.len() < min_samples {
            labels[point] = NOISE;
            continue;
        }

        labels[point] = cluster;
        let mut seeds = neighbors;
        let mut i = 0;
        while i < seeds.len() {
            let q = seeds[i];
            i += 1;
            if labels[q] == NOISE {
                labels[q] = cluster;
            }
            if labels[q] != UNVISITED {
                continue;
            }
            labels[q] = cluster;
            let q_neighbors = region_query(data, q, eps);
            if q_neighbors.len() >= min_samples {
                seeds.extend(q_neighbors);
            }
        }

        cluster += 1;
    }

    labels
}

/// Mean silhouette coefficient over all points. Singleton clusters score 0
/// for their point; callers must not pass a labeling with fewer than two
/// distinct labels.
pub fn silhouette_score(data: &[Vec<f64>], labels: &[i32]) -> f64 {
    let n = data.len();
    if n == 0 {
        return 0.0;
    }

    let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
    for &label in labels {
        *counts.entry(label).or_default() += 1;
    }

    let mut total = 0.0;
    for i in 0..n {
        let own = labels[i];
        if counts[&own] == 1 {
            continue;
        }

        // Mean distance per label, from point i.
        let mut sums: BTreeMap<i32, f64> = BTreeMap::new();
        for j in 0..n {
            if i == j {
                continue;
            }
            *sums.entry(labels[j]).or_default() += euclidean(&data[i], &data[j]);
        }

        let a = sums.get(&own).copied().unwrap_or(0.0) / (counts[&own] - 1) as f64;
        let b = sums
            .iter()
            .filter(|(label, _)| **label != own)
            .map(|(label, sum)| sum / counts[label] as f64)
            .fold(f64::INFINITY, f64::min);

        if b.is_finite() {
            let s = (b - a) / a.max(b);
            if s.is_finite() {
                total += s;
            }
        }
    }

    total / n as f64
}

/// Clusters the feature matrix and marks minority labels as real assets.
/// Returns the per-row label, the per-row success verdict, and the report.
pub fn identify_not_found(data: &[Vec<f64>]) -> (Vec<i32>, Vec<bool>, ClusterReport) {
    let labels = dbscan(data, DEFAULT_EPS, DEFAULT_MIN_SAMPLES);

    let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
    for &label in &labels {
        *counts.entry(label).or_default() += 1;
    }

    let clusters = counts.len();
    let score = if clusters <= 1 {
        1.0
    } else {
        silhouette_score(data, &labels)
    };

    let total = labels.len().max(1) as f64;
    let mut description: BTreeMap<i32, LabelStats> = counts
        .iter()
        .map(|(&label, &count)| {
            (
                label,
                LabelStats {
                    count,
                    ratio: count as f64 / total,
                    success: false,
                },
            )
        })
        .collect();

    // Smallest labels first, until the budget would overflow.
    let mut order: Vec<i32> = description.keys().copied().collect();
    order.sort_by_key(|label| description[label].count);

    let mut current_ratio = 0.0;
    for label in order {
        let ratio = description[&label].ratio;
        if ratio + current_ratio > SUCCESS_RATIO_BUDGET {
            break;
        }
        if let Some(stats) = description.get_mut(&label) {
            stats.success = true;
        }
        current_ratio += ratio;
    }

    let results = labels
        .iter()
        .map(|label| description[label].success)
        .collect();

    let report = ClusterReport {
        best_clusters: clusters,
        best_score: score,
        best_k: clusters,
        label_description: description
            .into_iter()
            .map(|(label, stats)| (label.to_string(), stats))
            .collect(),
    };

    (labels, results, report)
}
