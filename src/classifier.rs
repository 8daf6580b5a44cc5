//! Churn classifiers: a logistic regression and a random forest behind one
//! prediction capability

use crate::error::{ArtifactError, PipelineError};
use crate::normalizer::FeatureVector;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Binary churn outcome. Serializes as `0` (stays) or `1` (churns).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Churn {
    Stays,
    Churns,
}

impl Churn {
    pub fn from_label(label: usize) -> Option<Self> {
        match label {
            0 => Some(Churn::Stays),
            1 => Some(Churn::Churns),
            _ => None,
        }
    }

    pub fn as_label(self) -> usize {
        match self {
            Churn::Stays => 0,
            Churn::Churns => 1,
        }
    }
}

impl Serialize for Churn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_label() as u8)
    }
}

impl fmt::Display for Churn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_label())
    }
}

/// Which churn classifier a request is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ChurnModelKind {
    Logistic,
    RandomForest,
}

impl ChurnModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChurnModelKind::Logistic => "logistic",
            ChurnModelKind::RandomForest => "random-forest",
        }
    }
}

impl fmt::Display for ChurnModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frozen binary decision function over normalized customer features.
pub trait ChurnClassifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Column order the model was fit on.
    fn feature_names(&self) -> &[String];

    fn predict(&self, features: &FeatureVector<'_>) -> Result<Churn, PipelineError>;
}

/// Reject vectors whose columns differ from what a model was fit on.
pub(crate) fn check_columns(
    model: &'static str,
    expected: &[String],
    features: &FeatureVector<'_>,
) -> Result<(), PipelineError> {
    if features.columns() == expected {
        return Ok(());
    }
    Err(PipelineError::Prediction {
        model,
        reason: format!(
            "expected columns [{}], got [{}]",
            expected.join(", "),
            features.columns().join(", ")
        ),
    })
}

// ---------------------------------------------------------------------------
// Logistic regression
// ---------------------------------------------------------------------------

/// Linear model: churn when `w·x + b > 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogisticModel {
    pub feature_names: Vec<String>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LogisticModel {
    const NAME: &'static str = "logistic regression";

    pub fn validate(&self) -> Result<(), ArtifactError> {
        if self.coefficients.len() != self.feature_names.len() {
            return Err(ArtifactError::Inconsistent(format!(
                "logistic regression has {} coefficients for {} features",
                self.coefficients.len(),
                self.feature_names.len()
            )));
        }
        if !self.intercept.is_finite() || self.coefficients.iter().any(|c| !c.is_finite()) {
            return Err(ArtifactError::Inconsistent(
                "logistic regression weights must be finite".to_string(),
            ));
        }
        Ok(())
    }

    pub fn decision_function(&self, features: &FeatureVector<'_>) -> Result<f64, PipelineError> {
        check_columns(Self::NAME, &self.feature_names, features)?;
        Ok(self.decision_row(features.values()))
    }

    /// Probability of churn, `σ(w·x + b)`.
    pub fn probability(&self, features: &FeatureVector<'_>) -> Result<f64, PipelineError> {
        let z = self.decision_function(features)?;
        Ok(1.0 / (1.0 + (-z).exp()))
    }

    pub(crate) fn decision_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        self.coefficients
            .iter()
            .zip(row.iter())
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.intercept
    }

    /// Flip which class the decision function points at.
    pub(crate) fn negated(self) -> Self {
        Self {
            coefficients: self.coefficients.iter().map(|w| -w).collect(),
            intercept: -self.intercept,
            feature_names: self.feature_names,
        }
    }
}

impl ChurnClassifier for LogisticModel {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict(&self, features: &FeatureVector<'_>) -> Result<Churn, PipelineError> {
        let z = self.decision_function(features)?;
        Ok(if z > 0.0 { Churn::Churns } else { Churn::Stays })
    }
}

// ---------------------------------------------------------------------------
// Random forest
// ---------------------------------------------------------------------------

/// One node of a flattened decision tree.
///
/// Children always sit at a higher index than their parent, so evaluation
/// only ever moves forward through the node list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeNode {
    /// `x[feature] < threshold` continues at `left`, otherwise at `right`.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Share of the tree's training rows at this leaf that churned.
    Leaf { churn_share: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecisionTreeModel {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTreeModel {
    pub fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }

        for (index, node) in self.nodes.iter().enumerate() {
            match *node {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if feature >= n_features {
                        return Err(format!(
                            "node {index} splits on feature {feature} of {n_features}"
                        ));
                    }
                    if threshold.is_nan() {
                        return Err(format!("node {index} has a NaN threshold"));
                    }
                    for child in [left, right] {
                        if child <= index || child >= self.nodes.len() {
                            return Err(format!("node {index} points at invalid child {child}"));
                        }
                    }
                }
                TreeNode::Leaf { churn_share } => {
                    if !(0.0..=1.0).contains(&churn_share) {
                        return Err(format!("leaf {index} has churn share {churn_share}"));
                    }
                }
            }
        }

        Ok(())
    }

    /// Index of the leaf `row` ends up in. Assumes
    /// [`DecisionTreeModel::validate`] passed.
    pub fn leaf_index(&self, row: ArrayView1<'_, f64>) -> usize {
        let mut index = 0;
        while let TreeNode::Split {
            feature,
            threshold,
            left,
            right,
        } = self.nodes[index]
        {
            index = if row[feature] < threshold { left } else { right };
        }
        index
    }

    /// Churn share of the leaf `row` ends up in.
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        match self.nodes[self.leaf_index(row)] {
            TreeNode::Leaf { churn_share } => churn_share,
            TreeNode::Split { .. } => 0.0,
        }
    }
}

/// Bagged decision trees. The churn probability is the mean of the leaf churn
/// shares; a probability of exactly one half resolves to [`Churn::Stays`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RandomForestModel {
    pub feature_names: Vec<String>,
    pub trees: Vec<DecisionTreeModel>,
}

impl RandomForestModel {
    const NAME: &'static str = "random forest";

    pub fn validate(&self) -> Result<(), ArtifactError> {
        if self.trees.is_empty() {
            return Err(ArtifactError::Inconsistent(
                "random forest has no trees".to_string(),
            ));
        }
        for (index, tree) in self.trees.iter().enumerate() {
            tree.validate(self.feature_names.len()).map_err(|reason| {
                ArtifactError::Inconsistent(format!("random forest tree {index}: {reason}"))
            })?;
        }
        Ok(())
    }

    /// Mean churn share over every tree.
    pub fn churn_fraction(&self, features: &FeatureVector<'_>) -> Result<f64, PipelineError> {
        check_columns(Self::NAME, &self.feature_names, features)?;
        Ok(self.mean_churn_share(features.values()))
    }

    pub(crate) fn mean_churn_share(&self, row: ArrayView1<'_, f64>) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let total: f64 = self.trees.iter().map(|tree| tree.predict_row(row)).sum();
        total / self.trees.len() as f64
    }
}

impl ChurnClassifier for RandomForestModel {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict(&self, features: &FeatureVector<'_>) -> Result<Churn, PipelineError> {
        let share = self.churn_fraction(features)?;
        Ok(if share > 0.5 { Churn::Churns } else { Churn::Stays })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn columns() -> Vec<String> {
        vec!["idade".to_string(), "dias_atraso".to_string()]
    }

    fn logistic() -> LogisticModel {
        LogisticModel {
            feature_names: columns(),
            coefficients: vec![0.5, 2.0],
            intercept: -1.0,
        }
    }

    fn stump(feature: usize, threshold: f64, below: f64, above: f64) -> DecisionTreeModel {
        DecisionTreeModel {
            nodes: vec![
                TreeNode::Split {
                    feature,
                    threshold,
                    left: 1,
                    right: 2,
                },
                TreeNode::Leaf { churn_share: below },
                TreeNode::Leaf { churn_share: above },
            ],
        }
    }

    fn forest() -> RandomForestModel {
        RandomForestModel {
            feature_names: columns(),
            trees: vec![
                stump(1, 0.0, 0.0, 1.0),
                stump(1, 0.5, 0.0, 1.0),
                stump(0, 1.0, 1.0, 0.0),
            ],
        }
    }

    #[test]
    fn logistic_thresholds_at_zero_margin() {
        let columns = columns();
        let high = FeatureVector::new(&columns, array![0.0, 1.0]).unwrap();
        let low = FeatureVector::new(&columns, array![0.0, 0.0]).unwrap();

        let model = logistic();
        assert_eq!(model.predict(&high).unwrap(), Churn::Churns);
        assert_eq!(model.predict(&low).unwrap(), Churn::Stays);
        assert!((model.probability(&high).unwrap() - 1.0 / (1.0 + (-1.0f64).exp())).abs() < 1e-12);
    }

    #[test]
    fn forest_with_pure_leaves_follows_the_majority() {
        let columns = columns();
        let model = forest();

        // votes: churn, churn, churn
        let overdue = FeatureVector::new(&columns, array![0.0, 1.0]).unwrap();
        assert_eq!(model.predict(&overdue).unwrap(), Churn::Churns);

        // votes: stays, stays, stays
        let punctual = FeatureVector::new(&columns, array![2.0, -1.0]).unwrap();
        assert_eq!(model.predict(&punctual).unwrap(), Churn::Stays);
        assert_eq!(model.churn_fraction(&punctual).unwrap(), 0.0);
    }

    #[test]
    fn forest_tie_resolves_to_stays() {
        let columns = columns();
        let model = RandomForestModel {
            feature_names: columns.clone(),
            trees: vec![stump(1, 0.0, 0.0, 1.0), stump(1, 0.0, 1.0, 0.0)],
        };
        let vector = FeatureVector::new(&columns, array![0.0, 1.0]).unwrap();
        assert_eq!(model.predict(&vector).unwrap(), Churn::Stays);
    }

    #[test]
    fn forest_averages_impure_leaf_shares() {
        let columns = columns();
        // one confident churn leaf outweighs two lukewarm stays leaves
        let model = RandomForestModel {
            feature_names: columns.clone(),
            trees: vec![
                stump(1, 0.0, 0.0, 0.9),
                stump(1, 0.0, 0.0, 0.4),
                stump(1, 0.0, 0.0, 0.4),
            ],
        };
        let vector = FeatureVector::new(&columns, array![0.0, 1.0]).unwrap();

        assert!((model.churn_fraction(&vector).unwrap() - 17.0 / 30.0).abs() < 1e-12);
        assert_eq!(model.predict(&vector).unwrap(), Churn::Churns);
    }

    #[test]
    fn both_models_only_emit_binary_labels() {
        let columns = columns();
        let logistic = logistic();
        let forest = forest();
        let models: [&dyn ChurnClassifier; 2] = [&logistic, &forest];
        for model in models {
            for row in [[-3.0, -3.0], [0.0, 0.0], [3.0, 3.0], [1.0, -0.2]] {
                let vector = FeatureVector::new(&columns, array![row[0], row[1]]).unwrap();
                let label = model.predict(&vector).unwrap().as_label();
                assert!(label == 0 || label == 1, "{} produced {label}", model.name());
            }
        }
    }

    #[test]
    fn reordered_columns_are_rejected() {
        let reversed = vec!["dias_atraso".to_string(), "idade".to_string()];
        let vector = FeatureVector::new(&reversed, array![1.0, 0.0]).unwrap();
        let logistic = logistic();
        let forest = forest();
        let models: [&dyn ChurnClassifier; 2] = [&logistic, &forest];

        for model in models {
            let err = model.predict(&vector).unwrap_err();
            assert!(matches!(err, PipelineError::Prediction { .. }));
        }
    }

    #[test]
    fn tree_validation_catches_backward_and_dangling_children() {
        let backward = DecisionTreeModel {
            nodes: vec![
                TreeNode::Leaf { churn_share: 0.0 },
                TreeNode::Split {
                    feature: 0,
                    threshold: 0.0,
                    left: 0,
                    right: 0,
                },
            ],
        };
        assert!(backward.validate(2).is_err());

        let dangling = DecisionTreeModel {
            nodes: vec![TreeNode::Split {
                feature: 0,
                threshold: 0.0,
                left: 1,
                right: 7,
            }],
        };
        assert!(dangling.validate(2).is_err());

        assert!(stump(5, 0.0, 0.0, 1.0).validate(2).is_err());
        assert!(stump(0, 0.0, 0.0, 2.0).validate(2).is_err());
        assert!(stump(0, 0.0, 0.0, f64::NAN).validate(2).is_err());
        assert!(stump(0, 0.0, 0.0, 1.0).validate(2).is_ok());
    }

    #[test]
    fn logistic_validation_checks_shape() {
        let mut model = logistic();
        model.coefficients.push(1.0);
        assert!(model.validate().is_err());
    }

    #[test]
    fn churn_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&Churn::Churns).unwrap(), "1");
        assert_eq!(serde_json::to_string(&Churn::Stays).unwrap(), "0");
    }

    #[test]
    fn negated_model_flips_every_decision() {
        let columns = columns();
        let vector = FeatureVector::new(&columns, array![0.0, 1.0]).unwrap();
        let model = logistic();
        let flipped = model.clone().negated();
        assert_eq!(
            model.decision_function(&vector).unwrap(),
            -flipped.decision_function(&vector).unwrap()
        );
    }
}
