//! Fitted mean/std scaling and column reordering into the trained layout

use crate::encoder::EncodedRecord;
use crate::error::{ArtifactError, PipelineError};
use crate::record::NUMERIC_FIELDS;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Per-field affine transform fitted once on the training data.
///
/// A field whose training column was constant has a fitted std of zero. Such
/// fields are centered and passed through unscaled (the divisor becomes 1),
/// matching how the training scaler itself treats constant columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScalingParams {
    pub fields: Vec<String>,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl ScalingParams {
    /// Fit mean and population std of the numeric fields in `records`.
    ///
    /// `columns` names the columns of `records`.
    pub fn fit(records: ArrayView2<'_, f64>, columns: &[String]) -> Result<Self, PipelineError> {
        if records.nrows() == 0 {
            return Err(PipelineError::SchemaMismatch(
                "cannot fit scaling parameters on an empty matrix".to_string(),
            ));
        }

        let mut fields = Vec::with_capacity(NUMERIC_FIELDS.len());
        let mut mean = Vec::with_capacity(NUMERIC_FIELDS.len());
        let mut std = Vec::with_capacity(NUMERIC_FIELDS.len());

        for field in NUMERIC_FIELDS {
            let index = column_index(columns, field)?;
            let column = records.column(index);
            let fitted_mean = column.mean().unwrap_or(0.0);
            let fitted_std = column.std(0.0);

            fields.push(field.to_string());
            mean.push(fitted_mean);
            std.push(if fitted_std > 0.0 { fitted_std } else { 1.0 });
        }

        Ok(Self { fields, mean, std })
    }

    /// Reject parameter sets that cannot be applied.
    pub fn validate(&self) -> Result<(), ArtifactError> {
        if self.fields.len() != self.mean.len() || self.fields.len() != self.std.len() {
            return Err(ArtifactError::Inconsistent(format!(
                "scaler has {} fields but {} means and {} stds",
                self.fields.len(),
                self.mean.len(),
                self.std.len()
            )));
        }

        let mut seen = HashSet::new();
        for (index, field) in self.fields.iter().enumerate() {
            if !seen.insert(field.as_str()) {
                return Err(ArtifactError::Inconsistent(format!(
                    "scaler lists field '{field}' twice"
                )));
            }
            if !self.mean[index].is_finite() {
                return Err(ArtifactError::Inconsistent(format!(
                    "scaler mean for '{field}' is not finite"
                )));
            }
            let std = self.std[index];
            if !std.is_finite() || std < 0.0 {
                return Err(ArtifactError::Inconsistent(format!(
                    "scaler std for '{field}' must be finite and non-negative, got {std}"
                )));
            }
        }

        Ok(())
    }

    /// Scale one value of the field at position `index`.
    pub fn apply(&self, index: usize, value: f64) -> Result<f64, PipelineError> {
        let (mean, divisor) = self.affine(index)?;
        Ok((value - mean) / divisor)
    }

    /// Mean and divisor of the field at position `index`.
    fn affine(&self, index: usize) -> Result<(f64, f64), PipelineError> {
        match (self.mean.get(index), self.std.get(index)) {
            (Some(&mean), Some(&std)) => Ok((mean, if std == 0.0 { 1.0 } else { std })),
            _ => Err(PipelineError::SchemaMismatch(format!(
                "scaler has no mean/std for field #{index} ({} means, {} stds)",
                self.mean.len(),
                self.std.len()
            ))),
        }
    }

    /// Scale the numeric columns of a training matrix in place.
    pub fn scale_records(
        &self,
        records: &mut Array2<f64>,
        columns: &[String],
    ) -> Result<(), PipelineError> {
        for (index, field) in self.fields.iter().enumerate() {
            let column = column_index(columns, field)?;
            let (mean, divisor) = self.affine(index)?;
            records
                .column_mut(column)
                .mapv_inplace(|value| (value - mean) / divisor);
        }
        Ok(())
    }
}

fn column_index(columns: &[String], field: &str) -> Result<usize, PipelineError> {
    columns
        .iter()
        .position(|column| column == field)
        .ok_or_else(|| PipelineError::SchemaMismatch(format!("column '{field}' is missing")))
}

/// A normalized record laid out in the column order a model was fit on.
///
/// Column names are borrowed from the loaded artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector<'a> {
    columns: &'a [String],
    values: Array1<f64>,
}

impl<'a> FeatureVector<'a> {
    /// Pair already-normalized values with their column names.
    pub fn new(columns: &'a [String], values: Array1<f64>) -> Result<Self, PipelineError> {
        if columns.len() != values.len() {
            return Err(PipelineError::SchemaMismatch(format!(
                "{} columns but {} values",
                columns.len(),
                values.len()
            )));
        }
        Ok(Self { columns, values })
    }

    pub fn columns(&self) -> &'a [String] {
        self.columns
    }

    pub fn values(&self) -> ArrayView1<'_, f64> {
        self.values.view()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, column: &str) -> Option<f64> {
        self.columns
            .iter()
            .position(|name| name == column)
            .map(|index| self.values[index])
    }
}

/// Scale the numeric fields of `encoded` and reorder every field into
/// `column_order`.
///
/// `column_order` is the feature order a trained model recorded when it was
/// fit; it is never derived from the record itself.
pub fn normalize<'a>(
    encoded: &EncodedRecord,
    scaling: &ScalingParams,
    column_order: &'a [String],
) -> Result<FeatureVector<'a>, PipelineError> {
    let mut scaled: BTreeMap<&str, f64> = BTreeMap::new();
    for (index, field) in scaling.fields.iter().enumerate() {
        let raw = encoded.get(field).ok_or_else(|| {
            PipelineError::SchemaMismatch(format!(
                "scaled field '{field}' is missing from the encoded record"
            ))
        })?;
        scaled.insert(field.as_str(), scaling.apply(index, raw)?);
    }

    let values = column_order
        .iter()
        .map(|column| {
            scaled
                .get(column.as_str())
                .copied()
                .or_else(|| encoded.get(column))
                .ok_or_else(|| {
                    PipelineError::SchemaMismatch(format!(
                        "model column '{column}' is not present in the encoded record"
                    ))
                })
        })
        .collect::<Result<Vec<f64>, PipelineError>>()?;

    FeatureVector::new(column_order, Array1::from(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AGE, CONTRACT, SEX, SUBSCRIPTION, TENURE, TOTAL_SPEND};
    use ndarray::array;

    fn params() -> ScalingParams {
        ScalingParams {
            fields: NUMERIC_FIELDS.iter().map(|f| f.to_string()).collect(),
            mean: vec![40.0, 30.0, 15.0, 3.0, 12.0, 600.0, 14.0],
            std: vec![10.0, 15.0, 5.0, 2.0, 8.0, 200.0, 7.0],
        }
    }

    fn encoded() -> EncodedRecord {
        EncodedRecord::from_pairs([
            ("idade", 35.0),
            ("sexo", 0.0),
            ("tempo_como_cliente", 24.0),
            ("frequencia_uso", 10.0),
            ("ligacoes_callcenter", 2.0),
            ("dias_atraso", 0.0),
            ("assinatura", 1.0),
            ("duracao_contrato", 0.0),
            ("total_gasto", 500.0),
            ("meses_ultima_interacao", 1.0),
        ])
    }

    fn order(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn scales_numeric_fields_and_keeps_codes() {
        let columns = order(&[AGE, SEX, TOTAL_SPEND, SUBSCRIPTION]);
        let vector = normalize(&encoded(), &params(), &columns).unwrap();

        assert_eq!(vector.columns(), columns.as_slice());
        assert!((vector.get(AGE).unwrap() - (-0.5)).abs() < 1e-12);
        assert!((vector.get(TOTAL_SPEND).unwrap() - (-0.5)).abs() < 1e-12);
        assert_eq!(vector.get(SEX), Some(0.0));
        assert_eq!(vector.get(SUBSCRIPTION), Some(1.0));
    }

    #[test]
    fn follows_the_supplied_column_order() {
        let forward = order(&[AGE, TENURE, CONTRACT]);
        let backward = order(&[CONTRACT, TENURE, AGE]);

        let a = normalize(&encoded(), &params(), &forward).unwrap();
        let b = normalize(&encoded(), &params(), &backward).unwrap();

        assert_eq!(a.values()[0], b.values()[2]);
        assert_eq!(a.values()[1], b.values()[1]);
        assert_eq!(a.values()[2], b.values()[0]);
    }

    #[test]
    fn unknown_column_is_schema_mismatch() {
        let columns = order(&[AGE, "plano_familia"]);
        let err = normalize(&encoded(), &params(), &columns).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch(m) if m.contains("plano_familia")));
    }

    #[test]
    fn missing_scaled_field_is_schema_mismatch() {
        let partial = EncodedRecord::from_pairs([("sexo", 0.0), ("total_gasto", 500.0)]);
        let columns = order(&[SEX]);
        let err = normalize(&partial, &params(), &columns).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch(m) if m.contains("idade")));
    }

    #[test]
    fn zero_std_centers_without_scaling() {
        let mut constant = params();
        constant.std[0] = 0.0;
        let columns = order(&[AGE]);
        let vector = normalize(&encoded(), &constant, &columns).unwrap();
        assert_eq!(vector.get(AGE), Some(-5.0));
        assert!(constant.validate().is_ok());
    }

    #[test]
    fn validate_rejects_malformed_parameters() {
        let mut short = params();
        short.mean.pop();
        assert!(short.validate().is_err());

        let mut negative = params();
        negative.std[2] = -1.0;
        assert!(negative.validate().is_err());

        let mut nan = params();
        nan.mean[1] = f64::NAN;
        assert!(nan.validate().is_err());
    }

    #[test]
    fn unvalidated_short_parameters_are_schema_mismatch() {
        let mut short = params();
        short.std.truncate(3);
        let columns = order(&[AGE, TOTAL_SPEND]);

        let err = normalize(&encoded(), &short, &columns).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch(m) if m.contains("#3")));
        assert!(short.apply(6, 1.0).is_err());
        assert_eq!(short.apply(0, 50.0).unwrap(), 1.0);
    }

    #[test]
    fn fit_uses_population_std_and_replaces_zero() {
        let columns = order(&[
            AGE,
            "tempo_como_cliente",
            "frequencia_uso",
            "ligacoes_callcenter",
            "dias_atraso",
            "total_gasto",
            "meses_ultima_interacao",
        ]);
        let records = array![
            [20.0, 1.0, 5.0, 0.0, 0.0, 100.0, 3.0],
            [40.0, 1.0, 7.0, 2.0, 0.0, 300.0, 5.0],
        ];

        let fitted = ScalingParams::fit(records.view(), &columns).unwrap();
        assert_eq!(fitted.mean[0], 30.0);
        assert_eq!(fitted.std[0], 10.0);
        // constant tenure column
        assert_eq!(fitted.std[1], 1.0);

        let mut scaled = records.clone();
        fitted.scale_records(&mut scaled, &columns).unwrap();
        assert_eq!(scaled[[0, 0]], -1.0);
        assert_eq!(scaled[[1, 0]], 1.0);
        assert_eq!(scaled[[0, 1]], 0.0);
    }
}
