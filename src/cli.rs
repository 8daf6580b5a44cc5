//! Command-line interface definitions and argument parsing

use crate::classifier::ChurnModelKind;
use crate::train::TrainingConfig;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Customer churn prediction and segmentation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fit the scaler, both churn models and the segment model from a CSV
    Train(TrainArgs),
    /// Score a single customer record against trained artifacts
    Predict(PredictArgs),
    /// Start the HTTP prediction service
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug)]
pub struct TrainArgs {
    /// Path to the input CSV file
    #[arg(short, long)]
    pub input: PathBuf,

    /// Directory the trained artifacts are written to
    #[arg(short, long, default_value = "model")]
    pub output: PathBuf,

    /// Number of customer segments for K-Means
    #[arg(short = 'k', long, default_value = "8")]
    pub segments: usize,

    /// Number of trees in the random forest
    #[arg(long, default_value = "100")]
    pub trees: usize,

    /// Maximum depth of each tree (unbounded when omitted)
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Seed for the train/test split, bagging and centroid initialization
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Share of rows held out for evaluation
    #[arg(long, default_value = "0.2")]
    pub test_fraction: f64,

    /// Maximum iterations for K-Means
    #[arg(long, default_value = "300")]
    pub max_iters: usize,

    /// Tolerance for K-Means convergence
    #[arg(long, default_value = "1e-4")]
    pub tolerance: f64,

    /// Write an SVG chart of churned vs retained customers per segment
    #[arg(long)]
    pub plot: Option<PathBuf>,
}

impl TrainArgs {
    pub fn training_config(&self) -> TrainingConfig {
        TrainingConfig {
            n_segments: self.segments,
            test_fraction: self.test_fraction,
            seed: self.seed,
            n_trees: self.trees,
            max_depth: self.max_depth,
            kmeans_max_iters: self.max_iters,
            kmeans_tolerance: self.tolerance,
            ..TrainingConfig::default()
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct PredictArgs {
    /// Directory holding trained artifacts (defaults to APP_ARTIFACTS_DIR)
    #[arg(short, long)]
    pub artifacts: Option<PathBuf>,

    /// Customer record as a JSON object
    /// Example: --record '{"idade": 35, "sexo": "female", ...}'
    #[arg(short, long)]
    pub record: String,

    /// Churn model used for the prediction
    #[arg(short, long, value_enum, default_value_t = ChurnModelKind::Logistic)]
    pub model: ChurnModelKind,
}

impl PredictArgs {
    /// Parse the `--record` JSON text
    pub fn parse_record(&self) -> crate::Result<serde_json::Value> {
        serde_json::from_str(&self.record).context("Record must be valid JSON")
    }
}

#[derive(clap::Args, Debug, Default)]
pub struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub host: Option<String>,

    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub port: Option<u16>,

    /// Override the configured artifacts directory
    #[arg(short, long)]
    pub artifacts: Option<PathBuf>,
}
