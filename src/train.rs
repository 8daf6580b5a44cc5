//! Offline training: fit the scaler, both churn classifiers and the segment
//! model, then precompute per-segment statistics

use crate::artifacts::{Manifest, TrainedArtifacts};
use crate::classifier::{
    Churn, ChurnModelKind, DecisionTreeModel, LogisticModel, RandomForestModel, TreeNode,
};
use crate::data::TrainingData;
use crate::model::fit_segments;
use crate::normalizer::ScalingParams;
use crate::record::CHURN_LABEL;
use std::collections::HashSet;
use crate::stats::SegmentStatistics;
use anyhow::Context;
use chrono::Utc;
use linfa::prelude::*;
use linfa_logistic::LogisticRegression;
use linfa_trees::{DecisionTree, TreeNode as FittedNode};
use ndarray::{concatenate, Array1, Array2, Axis, Ix1};
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

/// Rows used for the sampled silhouette score
const SILHOUETTE_SAMPLE: usize = 500;

/// Hyperparameters for one training run
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub n_segments: usize,
    /// Share of rows held out for evaluation
    pub test_fraction: f64,
    pub seed: u64,
    pub n_trees: usize,
    /// `None` grows trees until leaves are pure
    pub max_depth: Option<usize>,
    pub kmeans_max_iters: usize,
    pub kmeans_tolerance: f64,
    pub logistic_max_iters: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            n_segments: 8,
            test_fraction: 0.2,
            seed: 42,
            n_trees: 100,
            max_depth: None,
            kmeans_max_iters: 300,
            kmeans_tolerance: 1e-4,
            logistic_max_iters: 100,
        }
    }
}

impl TrainingConfig {
    fn validate(&self) -> crate::Result<()> {
        if self.n_segments == 0 {
            anyhow::bail!("Number of segments must be at least 1");
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            anyhow::bail!(
                "Test fraction must be between 0 and 1, got {}",
                self.test_fraction
            );
        }
        if self.n_trees == 0 {
            anyhow::bail!("Random forest needs at least one tree");
        }
        Ok(())
    }
}

/// Held-out performance of one churn classifier
#[derive(Debug, Clone, PartialEq)]
pub struct ModelEvaluation {
    pub model: ChurnModelKind,
    pub accuracy: f64,
    /// Matthews correlation coefficient
    pub mcc: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSummary {
    pub segment: usize,
    pub size: usize,
    pub churn_rate: f64,
}

/// Summary of a training run, printed by the CLI and drawn by `viz`
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub train_rows: usize,
    pub test_rows: usize,
    pub evaluations: Vec<ModelEvaluation>,
    pub segments: Vec<SegmentSummary>,
    /// Within-segment sum of squares in scaled space
    pub inertia: f64,
    pub silhouette: f64,
}

impl TrainingReport {
    pub fn evaluation(&self, model: ChurnModelKind) -> Option<&ModelEvaluation> {
        self.evaluations.iter().find(|e| e.model == model)
    }
}

/// Fit every artifact on `data`
///
/// Classifiers are fit on the training split and evaluated on the held-out
/// split. The segment model and its statistics use every row.
pub fn train(
    data: &TrainingData,
    config: &TrainingConfig,
) -> crate::Result<(TrainedArtifacts, TrainingReport)> {
    config.validate()?;
    let n_rows = data.n_rows();
    if n_rows < 2 {
        anyhow::bail!("Need at least two rows to train, got {n_rows}");
    }
    let names = &data.feature_names;
    let distinct = distinct_rows(&data.features);
    if distinct < config.n_segments {
        anyhow::bail!(
            "Only {distinct} distinct customers for {} segments; \
             every segment needs at least one",
            config.n_segments
        );
    }

    let scaling = ScalingParams::fit(data.features.view(), names)?;
    let mut scaled = data.features.clone();
    scaling.scale_records(&mut scaled, names)?;
    debug!(fields = scaling.fields.len(), "fitted scaling parameters");

    let (train_idx, test_idx) = split_indices(n_rows, config.test_fraction, config.seed);
    let x_train = scaled.select(Axis(0), &train_idx);
    let y_train = data.labels.select(Axis(0), &train_idx);
    let x_test = scaled.select(Axis(0), &test_idx);
    let y_test = data.labels.select(Axis(0), &test_idx);
    info!(
        train_rows = train_idx.len(),
        test_rows = test_idx.len(),
        seed = config.seed,
        "split training data"
    );

    let logistic = fit_logistic(&x_train, &y_train, names, config)?;
    let forest = fit_forest(&x_train, &y_train, names, config)?;

    let test_set = Dataset::new(x_test.clone(), y_test);
    let logistic_pred: Array1<usize> = x_test
        .outer_iter()
        .map(|row| usize::from(logistic.decision_row(row) > 0.0))
        .collect();
    let forest_pred: Array1<usize> = x_test
        .outer_iter()
        .map(|row| usize::from(forest.mean_churn_share(row) > 0.5))
        .collect();
    let evaluations = vec![
        evaluate(ChurnModelKind::Logistic, &logistic_pred, &test_set)?,
        evaluate(ChurnModelKind::RandomForest, &forest_pred, &test_set)?,
    ];

    let fit = fit_segments(
        &scaled,
        names,
        config.n_segments,
        config.kmeans_max_iters,
        config.kmeans_tolerance,
        config.seed,
    )?;
    info!(
        segments = config.n_segments,
        inertia = fit.inertia,
        "fitted segment model"
    );

    let mut stat_columns = names.clone();
    stat_columns.push(CHURN_LABEL.to_string());
    let churned = data.labels.mapv(|label| label as f64).insert_axis(Axis(1));
    let unscaled = concatenate(Axis(1), &[data.features.view(), churned.view()])?;
    let statistics = SegmentStatistics::compute(
        unscaled.view(),
        &stat_columns,
        &fit.labels.to_vec(),
        config.n_segments,
    )
    .context("Failed to compute segment statistics")?;

    let segments = fit
        .segment_sizes()
        .into_iter()
        .enumerate()
        .map(|(segment, size)| {
            let churn_rate = statistics
                .stats(segment)
                .ok()
                .and_then(|means| means.get(CHURN_LABEL).copied())
                .unwrap_or(0.0);
            SegmentSummary {
                segment,
                size,
                churn_rate,
            }
        })
        .collect();

    let report = TrainingReport {
        train_rows: train_idx.len(),
        test_rows: test_idx.len(),
        evaluations,
        segments,
        inertia: fit.inertia,
        silhouette: fit.silhouette_sample(&scaled, SILHOUETTE_SAMPLE),
    };

    let manifest = Manifest {
        trained_at: Utc::now(),
        feature_order: names.clone(),
        n_segments: config.n_segments,
        training_rows: n_rows,
    };
    let artifacts =
        TrainedArtifacts::new(manifest, scaling, logistic, forest, fit.model, statistics)?;

    Ok((artifacts, report))
}

/// Number of distinct rows, compared bit for bit
fn distinct_rows(x: &Array2<f64>) -> usize {
    x.outer_iter()
        .map(|row| row.iter().map(|v| v.to_bits()).collect::<Vec<u64>>())
        .collect::<HashSet<_>>()
        .len()
}

/// Shuffle row indices and hold out `test_fraction` of them
fn split_indices(n_rows: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n_rows).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));

    let n_test = ((n_rows as f64 * test_fraction).round() as usize).clamp(1, n_rows - 1);
    let train = indices.split_off(n_test);
    (train, indices)
}

fn fit_logistic(
    x: &Array2<f64>,
    y: &Array1<usize>,
    names: &[String],
    config: &TrainingConfig,
) -> crate::Result<LogisticModel> {
    let dataset = Dataset::new(x.clone(), y.clone());
    let fitted = LogisticRegression::default()
        .max_iterations(config.logistic_max_iters)
        .fit(&dataset)
        .context("Failed to fit logistic regression")?;

    let model = LogisticModel {
        feature_names: names.to_vec(),
        coefficients: fitted.params().to_vec(),
        intercept: fitted.intercept(),
    };

    // linfa picks its own positive class; orient the margin towards churn
    let reference = fitted.predict(x);
    let agreeing = x
        .outer_iter()
        .zip(reference.iter())
        .filter(|(row, &label)| usize::from(model.decision_row(*row) > 0.0) == label)
        .count();
    let model = if agreeing * 2 < x.nrows() {
        model.negated()
    } else {
        model
    };

    info!(intercept = model.intercept, "fitted logistic regression");
    Ok(model)
}

/// Bagged decision trees, each grown on a bootstrap sample and a random
/// subset of ⌈√p⌉ features
fn fit_forest(
    x: &Array2<f64>,
    y: &Array1<usize>,
    names: &[String],
    config: &TrainingConfig,
) -> crate::Result<RandomForestModel> {
    let n_rows = x.nrows();
    let n_features = x.ncols();
    let subspace = ((n_features as f64).sqrt().ceil() as usize).clamp(1, n_features);
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));

    let mut trees = Vec::with_capacity(config.n_trees);
    for tree in 0..config.n_trees {
        let rows: Vec<usize> = (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect();
        let mut features = index::sample(&mut rng, n_features, subspace).into_vec();
        features.sort_unstable();

        let sample = x.select(Axis(0), &rows).select(Axis(1), &features);
        let targets = y.select(Axis(0), &rows);
        let fitted = DecisionTree::params()
            .max_depth(config.max_depth)
            .fit(&Dataset::new(sample, targets.clone()))
            .with_context(|| format!("Failed to fit tree {tree}"))?;

        let mut nodes = Vec::new();
        flatten(fitted.root_node(), &features, &mut nodes)?;
        let mut exported = DecisionTreeModel { nodes };
        fill_leaf_shares(&mut exported, &x.select(Axis(0), &rows), &targets);
        trees.push(exported);
    }

    let forest = RandomForestModel {
        feature_names: names.to_vec(),
        trees,
    };
    forest
        .validate()
        .context("Exported random forest is inconsistent")?;
    info!(trees = config.n_trees, subspace, "fitted random forest");
    Ok(forest)
}

/// Append `node` and its subtree in pre-order, mapping subspace feature
/// indices back to the full feature layout. Returns the index of `node`.
fn flatten(
    node: &FittedNode<f64, usize>,
    features: &[usize],
    nodes: &mut Vec<TreeNode>,
) -> crate::Result<usize> {
    let index = nodes.len();
    if node.is_leaf() {
        let label = node.prediction().context("Leaf without a prediction")?;
        let churn = Churn::from_label(label)
            .with_context(|| format!("Leaf predicts unknown class {label}"))?;
        nodes.push(TreeNode::Leaf {
            churn_share: if churn == Churn::Churns { 1.0 } else { 0.0 },
        });
        return Ok(index);
    }

    // placeholder until both children have been placed
    nodes.push(TreeNode::Leaf { churn_share: 0.0 });
    let (left, right) = match node.children().as_slice() {
        [Some(left), Some(right)] => (
            flatten(left, features, nodes)?,
            flatten(right, features, nodes)?,
        ),
        _ => anyhow::bail!("Split node without two children"),
    };

    let (feature, threshold, _) = node.split();
    nodes[index] = TreeNode::Split {
        feature: features[feature],
        threshold,
        left,
        right,
    };
    Ok(index)
}

/// Replace each leaf's share with the churn rate of the bootstrap rows that
/// reach it. Leaves no row reaches keep the fitted tree's class.
fn fill_leaf_shares(tree: &mut DecisionTreeModel, rows: &Array2<f64>, labels: &Array1<usize>) {
    let mut tallies = vec![(0usize, 0usize); tree.nodes.len()];
    for (row, &label) in rows.outer_iter().zip(labels.iter()) {
        let (churned, total) = &mut tallies[tree.leaf_index(row)];
        *churned += usize::from(label == Churn::Churns.as_label());
        *total += 1;
    }

    for (node, (churned, total)) in tree.nodes.iter_mut().zip(tallies) {
        if let TreeNode::Leaf { churn_share } = node {
            if total > 0 {
                *churn_share = churned as f64 / total as f64;
            }
        }
    }
}

fn evaluate(
    model: ChurnModelKind,
    predictions: &Array1<usize>,
    truth: &Dataset<f64, usize, Ix1>,
) -> crate::Result<ModelEvaluation> {
    let cm = predictions.confusion_matrix(truth)?;
    let evaluation = ModelEvaluation {
        model,
        accuracy: f64::from(cm.accuracy()),
        mcc: f64::from(cm.mcc()),
    };
    info!(
        model = %model,
        accuracy = evaluation.accuracy,
        mcc = evaluation.mcc,
        "evaluated on held-out rows"
    );
    Ok(evaluation)
}
