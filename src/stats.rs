//! Per-segment averages of the unscaled training data

use crate::error::{ArtifactError, PipelineError};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mean of every recorded field, per segment. Index `i` holds segment `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StatisticsRepr", into = "StatisticsRepr")]
pub struct SegmentStatistics {
    segments: Vec<BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct StatisticsRepr {
    segments: Vec<BTreeMap<String, f64>>,
}

impl TryFrom<StatisticsRepr> for SegmentStatistics {
    type Error = ArtifactError;

    fn try_from(repr: StatisticsRepr) -> Result<Self, Self::Error> {
        SegmentStatistics::new(repr.segments)
    }
}

impl From<SegmentStatistics> for StatisticsRepr {
    fn from(stats: SegmentStatistics) -> Self {
        Self {
            segments: stats.segments,
        }
    }
}

impl SegmentStatistics {
    /// Every segment must report the same, non-empty field set.
    pub fn new(segments: Vec<BTreeMap<String, f64>>) -> Result<Self, ArtifactError> {
        let Some(first) = segments.first() else {
            return Err(ArtifactError::Inconsistent(
                "segment statistics table is empty".to_string(),
            ));
        };
        if first.is_empty() {
            return Err(ArtifactError::Inconsistent(
                "segment statistics record no fields".to_string(),
            ));
        }

        for (segment, means) in segments.iter().enumerate() {
            if !means.keys().eq(first.keys()) {
                return Err(ArtifactError::Inconsistent(format!(
                    "segment {segment} records a different field set than segment 0"
                )));
            }
            if let Some((field, _)) = means.iter().find(|(_, value)| !value.is_finite()) {
                return Err(ArtifactError::Inconsistent(format!(
                    "segment {segment} mean for '{field}' is not finite"
                )));
            }
        }

        Ok(Self { segments })
    }

    /// Average each column of `records` within each segment.
    ///
    /// `records` must hold the original, unscaled values so the averages stay
    /// in business units.
    pub fn compute(
        records: ArrayView2<'_, f64>,
        columns: &[String],
        labels: &[usize],
        n_segments: usize,
    ) -> Result<Self, ArtifactError> {
        if records.ncols() != columns.len() || records.nrows() != labels.len() {
            return Err(ArtifactError::Inconsistent(format!(
                "{}x{} matrix with {} columns and {} labels",
                records.nrows(),
                records.ncols(),
                columns.len(),
                labels.len()
            )));
        }

        let mut sums = vec![vec![0.0; columns.len()]; n_segments];
        let mut counts = vec![0usize; n_segments];

        for (row, &segment) in records.outer_iter().zip(labels) {
            if segment >= n_segments {
                return Err(ArtifactError::Inconsistent(format!(
                    "label {segment} is outside 0..{n_segments}"
                )));
            }
            counts[segment] += 1;
            for (sum, value) in sums[segment].iter_mut().zip(row.iter()) {
                *sum += value;
            }
        }

        let segments = sums
            .into_iter()
            .zip(counts)
            .enumerate()
            .map(|(segment, (sums, count))| {
                if count == 0 {
                    return Err(ArtifactError::Inconsistent(format!(
                        "segment {segment} has no training rows; \
                         K-Means left its centroid empty"
                    )));
                }
                Ok(columns
                    .iter()
                    .cloned()
                    .zip(sums.into_iter().map(|sum| sum / count as f64))
                    .collect())
            })
            .collect::<Result<Vec<BTreeMap<String, f64>>, ArtifactError>>()?;

        Self::new(segments)
    }

    pub fn n_segments(&self) -> usize {
        self.segments.len()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.segments
            .first()
            .into_iter()
            .flat_map(|means| means.keys().map(String::as_str))
    }

    /// Historical averages for `segment`.
    pub fn stats(&self, segment: usize) -> Result<&BTreeMap<String, f64>, PipelineError> {
        self.segments
            .get(segment)
            .ok_or(PipelineError::UnknownSegment {
                segment,
                segments: self.segments.len(),
            })
    }
}
