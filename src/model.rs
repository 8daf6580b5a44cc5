//! K-Means segment model: fitting and nearest-centroid assignment

use crate::error::{ArtifactError, PipelineError};
use crate::normalizer::FeatureVector;
use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Fitted segment centroids in normalized feature space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SegmentModelRepr", into = "SegmentModelRepr")]
pub struct SegmentModel {
    feature_names: Vec<String>,
    centroids: Array2<f64>,
}

/// On-disk layout: one centroid per row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SegmentModelRepr {
    feature_names: Vec<String>,
    centroids: Vec<Vec<f64>>,
}

impl TryFrom<SegmentModelRepr> for SegmentModel {
    type Error = ArtifactError;

    fn try_from(repr: SegmentModelRepr) -> Result<Self, Self::Error> {
        let n_segments = repr.centroids.len();
        let width = repr.feature_names.len();
        if let Some(row) = repr.centroids.iter().position(|c| c.len() != width) {
            return Err(ArtifactError::Inconsistent(format!(
                "centroid {row} has {} values for {width} features",
                repr.centroids[row].len()
            )));
        }

        let flat: Vec<f64> = repr.centroids.into_iter().flatten().collect();
        let centroids = Array2::from_shape_vec((n_segments, width), flat)
            .map_err(|err| ArtifactError::Inconsistent(format!("centroid matrix: {err}")))?;
        SegmentModel::new(repr.feature_names, centroids)
    }
}

impl From<SegmentModel> for SegmentModelRepr {
    fn from(model: SegmentModel) -> Self {
        Self {
            centroids: model
                .centroids
                .outer_iter()
                .map(|row| row.to_vec())
                .collect(),
            feature_names: model.feature_names,
        }
    }
}

impl SegmentModel {
    const NAME: &'static str = "segment model";

    pub fn new(feature_names: Vec<String>, centroids: Array2<f64>) -> Result<Self, ArtifactError> {
        if centroids.nrows() == 0 {
            return Err(ArtifactError::Inconsistent(
                "segment model has no centroids".to_string(),
            ));
        }
        if centroids.ncols() != feature_names.len() {
            return Err(ArtifactError::Inconsistent(format!(
                "centroids have {} columns for {} features",
                centroids.ncols(),
                feature_names.len()
            )));
        }
        if centroids.iter().any(|value| !value.is_finite()) {
            return Err(ArtifactError::Inconsistent(
                "segment centroids must be finite".to_string(),
            ));
        }
        Ok(Self {
            feature_names,
            centroids,
        })
    }

    pub fn n_segments(&self) -> usize {
        self.centroids.nrows()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn centroids(&self) -> &Array2<f64> {
        &self.centroids
    }

    /// Assign a normalized customer to its nearest segment.
    pub fn assign(&self, features: &FeatureVector<'_>) -> Result<usize, PipelineError> {
        crate::classifier::check_columns(Self::NAME, &self.feature_names, features)?;
        Ok(self.assign_row(features.values()))
    }

    /// Find nearest centroid; ties go to the lowest segment id.
    pub fn assign_row(&self, row: ArrayView1<'_, f64>) -> usize {
        let mut min_distance = f64::INFINITY;
        let mut closest_segment = 0;

        for (segment, centroid) in self.centroids.outer_iter().enumerate() {
            let distance: f64 = row
                .iter()
                .zip(centroid.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum();

            if distance < min_distance {
                min_distance = distance;
                closest_segment = segment;
            }
        }

        closest_segment
    }

    pub fn assign_rows(&self, records: &Array2<f64>) -> Array1<usize> {
        records
            .outer_iter()
            .map(|row| self.assign_row(row))
            .collect()
    }
}

/// Result of fitting the segment model on the training matrix
#[derive(Debug, Clone)]
pub struct SegmentFit {
    pub model: SegmentModel,
    /// Segment of each training row, as assigned by `model`
    pub labels: Array1<usize>,
    /// Within-cluster sum of squares
    pub inertia: f64,
}

impl SegmentFit {
    pub fn segment_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.model.n_segments()];
        for &label in self.labels.iter() {
            if label < sizes.len() {
                sizes[label] += 1;
            }
        }
        sizes
    }

    /// Mean silhouette coefficient over the first `sample_size` rows.
    pub fn silhouette_sample(&self, records: &Array2<f64>, sample_size: usize) -> f64 {
        let n_samples = records.nrows().min(sample_size).min(self.labels.len());
        if n_samples < 2 {
            return 0.0;
        }
        let n_segments = self.model.n_segments();

        let mut silhouette_sum = 0.0;
        for i in 0..n_samples {
            let point = records.row(i);
            let own_label = self.labels[i];

            let mut same_segment = Vec::new();
            let mut other_segments: Vec<Vec<f64>> = vec![Vec::new(); n_segments];

            for j in 0..n_samples {
                if i == j {
                    continue;
                }
                let distance = euclidean_distance(point, records.row(j));
                let other_label = self.labels[j];
                if other_label == own_label {
                    same_segment.push(distance);
                } else if other_label < n_segments {
                    other_segments[other_label].push(distance);
                }
            }

            let a_i = mean(&same_segment).unwrap_or(0.0);
            let b_i = other_segments
                .iter()
                .filter_map(|distances| mean(distances))
                .fold(f64::INFINITY, f64::min);

            if !b_i.is_infinite() && (a_i > 0.0 || b_i > 0.0) {
                silhouette_sum += (b_i - a_i) / a_i.max(b_i);
            }
        }

        silhouette_sum / n_samples as f64
    }
}

/// Fit K-Means on the normalized training matrix
///
/// # Arguments
/// * `records` - Normalized features, one customer per row
/// * `feature_names` - Column names of `records`
/// * `n_segments` - Number of segments (K)
/// * `max_iters` - Maximum iterations for convergence
/// * `tolerance` - Convergence tolerance
/// * `seed` - Seed for centroid initialization
pub fn fit_segments(
    records: &Array2<f64>,
    feature_names: &[String],
    n_segments: usize,
    max_iters: usize,
    tolerance: f64,
    seed: u64,
) -> crate::Result<SegmentFit> {
    if n_segments == 0 {
        anyhow::bail!("Number of segments must be at least 1");
    }
    if records.nrows() < n_segments {
        anyhow::bail!(
            "Number of data points ({}) must be at least equal to number of segments ({})",
            records.nrows(),
            n_segments
        );
    }

    let targets: Array1<usize> = Array1::zeros(records.nrows());
    let dataset = Dataset::new(records.clone(), targets);

    let kmeans = KMeans::params_with(n_segments, StdRng::seed_from_u64(seed), L2Dist)
        .max_n_iterations(max_iters as u64)
        .tolerance(tolerance)
        .fit(&dataset)?;

    let model = SegmentModel::new(feature_names.to_vec(), kmeans.centroids().clone())?;
    // Labels come from the serving assigner so training statistics and
    // inference always agree on segment membership.
    let labels = model.assign_rows(records);
    let inertia = compute_inertia(records, &labels, model.centroids());

    Ok(SegmentFit {
        model,
        labels,
        inertia,
    })
}

/// Compute within-cluster sum of squares (inertia)
fn compute_inertia(records: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    records
        .outer_iter()
        .zip(labels.iter())
        .filter(|(_, &segment)| segment < centroids.nrows())
        .map(|(point, &segment)| {
            point
                .iter()
                .zip(centroids.row(segment).iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
        })
        .sum()
}

fn euclidean_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
