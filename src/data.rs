//! Training data loading using Polars

use crate::encoder::encode_value;
use crate::record::{field_name, CATEGORICAL_FIELDS, CHURN_LABEL, CUSTOMER_ID, FIELDS};
use anyhow::Context;
use ndarray::{Array1, Array2};
use polars::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// Encoded, unscaled training matrix with its churn labels
#[derive(Debug, Clone)]
pub struct TrainingData {
    /// Column names of `features`, in the order they appear in the file
    pub feature_names: Vec<String>,
    /// Categoricals replaced by their codes, numerics left in business units
    pub features: Array2<f64>,
    /// `cancelou` per row, 0 or 1
    pub labels: Array1<usize>,
}

impl TrainingData {
    pub fn n_rows(&self) -> usize {
        self.features.nrows()
    }

    /// Share of rows labelled as churned
    pub fn churn_rate(&self) -> f64 {
        if self.labels.is_empty() {
            return 0.0;
        }
        self.labels.iter().filter(|&&label| label == 1).count() as f64 / self.labels.len() as f64
    }
}

/// Load the customer CSV, drop the identifier column and incomplete rows,
/// and encode categorical fields
///
/// # Arguments
/// * `path` - Path to the CSV file; must carry a header row
///
/// # Returns
/// * `TrainingData` with features in file column order
pub fn load_training_data(path: &Path) -> crate::Result<TrainingData> {
    let mut df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .with_context(|| format!("failed to open {}", path.display()))?
        .finish()
        .with_context(|| format!("failed to parse {}", path.display()))?;

    if df.get_column_names().contains(&CUSTOMER_ID) {
        df = df.drop(CUSTOMER_ID)?;
    }

    let raw_rows = df.height();
    let df = df.drop_nulls::<String>(None)?;
    if df.height() < raw_rows {
        debug!(dropped = raw_rows - df.height(), "dropped rows with missing values");
    }
    if df.height() == 0 {
        anyhow::bail!("No complete rows found in {}", path.display());
    }

    let feature_names = feature_columns(&df)?;
    let n_rows = df.height();

    let mut columns = Vec::with_capacity(feature_names.len());
    for name in &feature_names {
        columns.push(column_values(&df, name)?);
    }
    let features = Array2::from_shape_fn((n_rows, feature_names.len()), |(row, col)| {
        columns[col][row]
    });

    let labels = df
        .column(CHURN_LABEL)?
        .cast(&DataType::Float64)?
        .f64()?
        .into_no_null_iter()
        .enumerate()
        .map(|(row, value)| match value {
            v if v == 0.0 => Ok(0),
            v if v == 1.0 => Ok(1),
            other => anyhow::bail!("Row {row}: '{CHURN_LABEL}' must be 0 or 1, got {other}"),
        })
        .collect::<crate::Result<Array1<usize>>>()?;

    let data = TrainingData {
        feature_names,
        features,
        labels,
    };
    info!(
        rows = data.n_rows(),
        features = data.feature_names.len(),
        churn_rate = data.churn_rate(),
        "loaded training data"
    );
    Ok(data)
}

/// Every known field must be present exactly once; nothing else is allowed
/// besides the label.
fn feature_columns(df: &DataFrame) -> crate::Result<Vec<String>> {
    let names = df.get_column_names();
    if !names.contains(&CHURN_LABEL) {
        anyhow::bail!("Missing target column '{CHURN_LABEL}'");
    }

    let mut feature_names = Vec::with_capacity(FIELDS.len());
    for name in names.into_iter().filter(|name| *name != CHURN_LABEL) {
        if field_name(name).is_none() {
            anyhow::bail!("Unexpected column '{name}'");
        }
        feature_names.push(name.to_string());
    }

    if let Some(missing) = FIELDS
        .iter()
        .find(|field| !feature_names.iter().any(|name| name == **field))
    {
        anyhow::bail!("Missing feature column '{missing}'");
    }
    Ok(feature_names)
}

fn column_values(df: &DataFrame, name: &str) -> crate::Result<Vec<f64>> {
    let field = field_name(name).context("column is not a customer field")?;
    let series = df.column(name)?;

    if CATEGORICAL_FIELDS.contains(&field) {
        return series
            .str()
            .with_context(|| format!("Column '{name}' must hold text"))?
            .into_no_null_iter()
            .map(|raw| {
                encode_value(field, raw)
                    .map(f64::from)
                    .with_context(|| format!("Column '{name}'"))
            })
            .collect();
    }

    Ok(series
        .cast(&DataType::Float64)
        .with_context(|| format!("Column '{name}' must be numeric"))?
        .f64()?
        .into_no_null_iter()
        .collect())
}
