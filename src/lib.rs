//! ChurnForge: customer churn prediction and segment assignment
//!
//! An offline training stage fits a scaling transform, two interchangeable
//! churn classifiers (logistic regression and a random forest) and a K-Means
//! segment model. The online inference pipeline encodes a single customer
//! record, normalizes it into the trained column order, predicts churn,
//! assigns a segment and looks up that segment's historical averages.

pub mod artifacts;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod data;
pub mod encoder;
pub mod error;
pub mod model;
pub mod normalizer;
pub mod pipeline;
pub mod record;
pub mod server;
pub mod stats;
pub mod telemetry;
pub mod train;
pub mod viz;

// Re-export public items for easier access
pub use artifacts::TrainedArtifacts;
pub use classifier::{Churn, ChurnClassifier, ChurnModelKind, LogisticModel, RandomForestModel};
pub use cli::Args;
pub use data::{load_training_data, TrainingData};
pub use encoder::{encode, EncodedRecord};
pub use error::{ArtifactError, PipelineError};
pub use model::{fit_segments, SegmentFit, SegmentModel};
pub use normalizer::{normalize, FeatureVector, ScalingParams};
pub use pipeline::Prediction;
pub use record::CustomerRecord;
pub use stats::SegmentStatistics;
pub use train::{train, TrainingConfig, TrainingReport};

/// Common result type used by the application layer
pub type Result<T> = anyhow::Result<T>;
