//! Trained artifacts: versioned JSON files loaded once at startup
//!
//! Each file is an envelope `{ "kind", "schema_version", "payload" }`.
//! Loading checks every envelope, then cross-checks the artifacts against
//! each other, so a directory mixing two training runs is refused before
//! any request is served.

use crate::classifier::{ChurnClassifier, ChurnModelKind, LogisticModel, RandomForestModel};
use crate::error::ArtifactError;
use crate::model::SegmentModel;
use crate::normalizer::ScalingParams;
use crate::record::{field_name, NUMERIC_FIELDS};
use crate::stats::SegmentStatistics;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Artifact layout version written and accepted by this build.
pub const SCHEMA_VERSION: u32 = 1;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const SCALER_FILE: &str = "scaler.json";
pub const LOGISTIC_FILE: &str = "logistic_regression.json";
pub const FOREST_FILE: &str = "random_forest.json";
pub const SEGMENTS_FILE: &str = "kmeans.json";
pub const STATISTICS_FILE: &str = "segment_stats.json";

/// Training-run metadata shared by every artifact in a directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub trained_at: DateTime<Utc>,
    pub feature_order: Vec<String>,
    pub n_segments: usize,
    pub training_rows: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    kind: String,
    schema_version: u32,
    payload: serde_json::Value,
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    kind: &'a str,
    schema_version: u32,
    payload: &'a T,
}

/// Everything the inference pipeline needs, immutable once built.
#[derive(Debug, Clone)]
pub struct TrainedArtifacts {
    manifest: Manifest,
    scaling: ScalingParams,
    logistic: LogisticModel,
    forest: RandomForestModel,
    segments: SegmentModel,
    statistics: SegmentStatistics,
}

impl TrainedArtifacts {
    /// Assemble artifacts, refusing any set that disagrees with itself.
    pub fn new(
        manifest: Manifest,
        scaling: ScalingParams,
        logistic: LogisticModel,
        forest: RandomForestModel,
        segments: SegmentModel,
        statistics: SegmentStatistics,
    ) -> Result<Self, ArtifactError> {
        let artifacts = Self {
            manifest,
            scaling,
            logistic,
            forest,
            segments,
            statistics,
        };
        artifacts.validate()?;
        Ok(artifacts)
    }

    /// Load and cross-check every artifact in `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let dir = dir.as_ref();
        debug!(dir = %dir.display(), "loading trained artifacts");

        let artifacts = Self::new(
            read_artifact(&dir.join(MANIFEST_FILE), "manifest")?,
            read_artifact(&dir.join(SCALER_FILE), "scaler")?,
            read_artifact(&dir.join(LOGISTIC_FILE), "logistic_regression")?,
            read_artifact(&dir.join(FOREST_FILE), "random_forest")?,
            read_artifact(&dir.join(SEGMENTS_FILE), "kmeans")?,
            read_artifact(&dir.join(STATISTICS_FILE), "segment_stats")?,
        )?;

        info!(
            dir = %dir.display(),
            trained_at = %artifacts.manifest.trained_at,
            features = artifacts.manifest.feature_order.len(),
            segments = artifacts.manifest.n_segments,
            trees = artifacts.forest.trees.len(),
            "trained artifacts loaded"
        );
        Ok(artifacts)
    }

    /// Write every artifact into `dir`, creating it when needed.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<(), ArtifactError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|source| ArtifactError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        write_artifact(&dir.join(MANIFEST_FILE), "manifest", &self.manifest)?;
        write_artifact(&dir.join(SCALER_FILE), "scaler", &self.scaling)?;
        write_artifact(&dir.join(LOGISTIC_FILE), "logistic_regression", &self.logistic)?;
        write_artifact(&dir.join(FOREST_FILE), "random_forest", &self.forest)?;
        write_artifact(&dir.join(SEGMENTS_FILE), "kmeans", &self.segments)?;
        write_artifact(&dir.join(STATISTICS_FILE), "segment_stats", &self.statistics)?;

        info!(dir = %dir.display(), "trained artifacts written");
        Ok(())
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn scaling(&self) -> &ScalingParams {
        &self.scaling
    }

    pub fn logistic(&self) -> &LogisticModel {
        &self.logistic
    }

    pub fn forest(&self) -> &RandomForestModel {
        &self.forest
    }

    pub fn segments(&self) -> &SegmentModel {
        &self.segments
    }

    pub fn statistics(&self) -> &SegmentStatistics {
        &self.statistics
    }

    pub fn classifier(&self, kind: ChurnModelKind) -> &dyn ChurnClassifier {
        match kind {
            ChurnModelKind::Logistic => &self.logistic,
            ChurnModelKind::RandomForest => &self.forest,
        }
    }

    fn validate(&self) -> Result<(), ArtifactError> {
        let order = &self.manifest.feature_order;
        if order.is_empty() {
            return Err(ArtifactError::Inconsistent(
                "manifest records no feature order".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for feature in order {
            if field_name(feature).is_none() {
                return Err(ArtifactError::Inconsistent(format!(
                    "feature '{feature}' is not a customer record field"
                )));
            }
            if !seen.insert(feature.as_str()) {
                return Err(ArtifactError::Inconsistent(format!(
                    "feature '{feature}' appears twice in the feature order"
                )));
            }
        }

        let models: [(&str, &[String]); 3] = [
            ("logistic regression", self.logistic.feature_names.as_slice()),
            ("random forest", self.forest.feature_names.as_slice()),
            ("segment model", self.segments.feature_names()),
        ];
        for (model, names) in models {
            if names != order.as_slice() {
                return Err(ArtifactError::Inconsistent(format!(
                    "{model} was fit on [{}] but the manifest records [{}]",
                    names.join(", "),
                    order.join(", ")
                )));
            }
        }

        self.scaling.validate()?;
        if let Some(field) = self.scaling.fields.iter().find(|f| !order.contains(*f)) {
            return Err(ArtifactError::Inconsistent(format!(
                "scaled field '{field}' is not part of the feature order"
            )));
        }
        let scaled = |field: &str| self.scaling.fields.iter().any(|s| s == field);
        if let Some(field) = NUMERIC_FIELDS
            .iter()
            .find(|f| order.iter().any(|o| o == *f) && !scaled(f))
        {
            return Err(ArtifactError::Inconsistent(format!(
                "numeric field '{field}' has no scaling parameters"
            )));
        }

        self.logistic.validate()?;
        self.forest.validate()?;

        let n_segments = self.manifest.n_segments;
        if self.segments.n_segments() != n_segments || self.statistics.n_segments() != n_segments
        {
            return Err(ArtifactError::Inconsistent(format!(
                "manifest records {n_segments} segments, segment model has {}, statistics cover {}",
                self.segments.n_segments(),
                self.statistics.n_segments()
            )));
        }
        if let Some(field) = NUMERIC_FIELDS
            .iter()
            .find(|f| !self.statistics.field_names().any(|s| s == **f))
        {
            return Err(ArtifactError::Inconsistent(format!(
                "segment statistics do not record numeric field '{field}'"
            )));
        }

        Ok(())
    }
}

fn read_artifact<T: DeserializeOwned>(path: &Path, kind: &'static str) -> Result<T, ArtifactError> {
    let raw = fs::read(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let envelope: Envelope =
        serde_json::from_slice(&raw).map_err(|source| decode_error(path, source))?;

    if envelope.kind != kind {
        return Err(ArtifactError::WrongKind {
            path: path.to_path_buf(),
            expected: kind,
            found: envelope.kind,
        });
    }
    if envelope.schema_version != SCHEMA_VERSION {
        return Err(ArtifactError::UnsupportedVersion {
            path: path.to_path_buf(),
            expected: SCHEMA_VERSION,
            found: envelope.schema_version,
        });
    }

    serde_json::from_value(envelope.payload).map_err(|source| decode_error(path, source))
}

fn write_artifact<T: Serialize>(path: &Path, kind: &str, payload: &T) -> Result<(), ArtifactError> {
    let envelope = EnvelopeRef {
        kind,
        schema_version: SCHEMA_VERSION,
        payload,
    };
    let encoded = serde_json::to_vec_pretty(&envelope).map_err(|source| ArtifactError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, encoded).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn decode_error(path: &Path, source: serde_json::Error) -> ArtifactError {
    ArtifactError::Decode {
        path: PathBuf::from(path),
        source,
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_preserves_every_artifact() {
        let artifacts = artifacts();
        let dir = tempdir().unwrap();

        artifacts.save(dir.path()).unwrap();
        let loaded = TrainedArtifacts::load(dir.path()).unwrap();

        assert_eq!(loaded.manifest(), artifacts.manifest());
        assert_eq!(loaded.scaling(), artifacts.scaling());
        assert_eq!(loaded.logistic(), artifacts.logistic());
        assert_eq!(loaded.forest(), artifacts.forest());
        assert_eq!(loaded.segments(), artifacts.segments());
        assert_eq!(loaded.statistics(), artifacts.statistics());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        artifacts().save(dir.path()).unwrap();
        fs::remove_file(dir.path().join(FOREST_FILE)).unwrap();

        let err = TrainedArtifacts::load(dir.path()).unwrap_err();
        assert!(matches!(err, ArtifactError::Io { .. }));
    }

    #[test]
    fn version_skew_is_refused() {
        let dir = tempdir().unwrap();
        artifacts().save(dir.path()).unwrap();

        let path = dir.path().join(SCALER_FILE);
        let mut value: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        value["schema_version"] = serde_json::json!(2);
        fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();

        let err = TrainedArtifacts::load(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            ArtifactError::UnsupportedVersion { found: 2, .. }
        ));
    }

    #[test]
    fn swapped_files_are_refused() {
        let dir = tempdir().unwrap();
        artifacts().save(dir.path()).unwrap();
        fs::copy(
            dir.path().join(LOGISTIC_FILE),
            dir.path().join(FOREST_FILE),
        )
        .unwrap();

        let err = TrainedArtifacts::load(dir.path()).unwrap_err();
        assert!(matches!(err, ArtifactError::WrongKind { .. }));
    }

    #[test]
    fn unexpected_payload_fields_are_refused() {
        let dir = tempdir().unwrap();
        artifacts().save(dir.path()).unwrap();

        let path = dir.path().join(LOGISTIC_FILE);
        let mut value: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        value["payload"]["class_weight"] = serde_json::json!("balanced");
        fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();

        let err = TrainedArtifacts::load(dir.path()).unwrap_err();
        assert!(matches!(err, ArtifactError::Decode { .. }));
    }

    #[test]
    fn models_from_different_feature_orders_are_refused() {
        let base = artifacts();
        let mut reversed = feature_order();
        reversed.reverse();
        let other = artifacts_with_order(reversed);

        let err = TrainedArtifacts::new(
            base.manifest().clone(),
            base.scaling().clone(),
            base.logistic().clone(),
            other.forest().clone(),
            base.segments().clone(),
            base.statistics().clone(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("random forest"));
    }

    #[test]
    fn segment_count_mismatch_is_refused() {
        let base = artifacts();
        let mut manifest = base.manifest().clone();
        manifest.n_segments = 5;

        let err = TrainedArtifacts::new(
            manifest,
            base.scaling().clone(),
            base.logistic().clone(),
            base.forest().clone(),
            base.segments().clone(),
            base.statistics().clone(),
        )
        .unwrap_err();
        assert!(matches!(err, ArtifactError::Inconsistent(_)));
    }

    #[test]
    fn unknown_feature_in_manifest_is_refused() {
        let mut order = feature_order();
        order.push("plano_familia".to_string());
        let base = artifacts();
        let mut manifest = base.manifest().clone();
        manifest.feature_order = order;

        let err = TrainedArtifacts::new(
            manifest,
            base.scaling().clone(),
            base.logistic().clone(),
            base.forest().clone(),
            base.segments().clone(),
            base.statistics().clone(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("plano_familia"));
    }

    #[test]
    fn scaler_missing_a_numeric_field_is_refused() {
        let base = artifacts();
        let mut scaling = base.scaling().clone();
        let age = scaling.fields.iter().position(|f| f == "idade").unwrap();
        scaling.fields.remove(age);
        scaling.mean.remove(age);
        scaling.std.remove(age);

        let err = TrainedArtifacts::new(
            base.manifest().clone(),
            scaling,
            base.logistic().clone(),
            base.forest().clone(),
            base.segments().clone(),
            base.statistics().clone(),
        )
        .unwrap_err();
        assert!(matches!(err, ArtifactError::Inconsistent(ref m) if m.contains("idade")));
    }

    #[test]
    fn statistics_without_numeric_fields_are_refused() {
        let base = artifacts();
        let statistics = SegmentStatistics::new(
            (0..SEGMENTS)
                .map(|segment| BTreeMap::from([("x".to_string(), segment as f64)]))
                .collect(),
        )
        .unwrap();

        let err = TrainedArtifacts::new(
            base.manifest().clone(),
            base.scaling().clone(),
            base.logistic().clone(),
            base.forest().clone(),
            base.segments().clone(),
            statistics,
        )
        .unwrap_err();
        assert!(matches!(err, ArtifactError::Inconsistent(ref m) if m.contains("idade")));
    }

    #[test]
    fn classifier_selection_matches_kind() {
        let artifacts = artifacts();
        assert_eq!(
            artifacts.classifier(ChurnModelKind::Logistic).name(),
            "logistic regression"
        );
        assert_eq!(
            artifacts.classifier(ChurnModelKind::RandomForest).name(),
            "random forest"
        );
    }
}
