//! Per-request inference: encode, normalize, predict churn, assign a segment
//! and attach that segment's historical averages

use crate::artifacts::TrainedArtifacts;
use crate::classifier::{Churn, ChurnModelKind};
use crate::encoder::encode;
use crate::error::PipelineError;
use crate::normalizer::normalize;
use crate::record::CustomerRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, debug_span};

/// Response for one customer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub original_input: CustomerRecord,
    pub predicted_segment: usize,
    pub churn_prediction: Churn,
    pub segment_average_stats: BTreeMap<String, f64>,
}

/// Run one record through the selected churn model and the segment model.
///
/// Any stage failure aborts the request; no partial prediction is returned.
pub fn run(
    artifacts: &TrainedArtifacts,
    record: CustomerRecord,
    kind: ChurnModelKind,
) -> Result<Prediction, PipelineError> {
    let span = debug_span!("predict", model = %kind);
    let _enter = span.enter();

    let encoded = encode(&record)?;
    let classifier = artifacts.classifier(kind);
    let features = normalize(&encoded, artifacts.scaling(), classifier.feature_names())?;

    let churn = classifier.predict(&features)?;
    let segment = artifacts.segments().assign(&features)?;
    let stats = artifacts.statistics().stats(segment)?.clone();
    debug!(churn = %churn, segment, "prediction complete");

    Ok(Prediction {
        original_input: record,
        predicted_segment: segment,
        churn_prediction: churn,
        segment_average_stats: stats,
    })
}

/// Like [`run`], starting from an untyped JSON object.
pub fn run_json(
    artifacts: &TrainedArtifacts,
    value: serde_json::Value,
    kind: ChurnModelKind,
) -> Result<Prediction, PipelineError> {
    let record = CustomerRecord::from_json(value)?;
    run(artifacts, record, kind)
}
