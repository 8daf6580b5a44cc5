//! Closed lookup tables mapping categorical values to their training codes

use crate::error::PipelineError;
use crate::record::{CustomerRecord, CONTRACT, SEX, SUBSCRIPTION};
use std::collections::BTreeMap;

// Codes follow the alphabetical order the training encoder assigned.
const SEX_CODES: &[(&str, u32)] = &[("female", 0), ("male", 1)];
const SUBSCRIPTION_CODES: &[(&str, u32)] = &[("basic", 0), ("premium", 1), ("standard", 2)];
const CONTRACT_CODES: &[(&str, u32)] = &[("annual", 0), ("monthly", 1), ("quarterly", 2)];

/// Lookup table for a categorical field, if the field is categorical.
pub fn table(field: &str) -> Option<&'static [(&'static str, u32)]> {
    match field {
        SEX => Some(SEX_CODES),
        SUBSCRIPTION => Some(SUBSCRIPTION_CODES),
        CONTRACT => Some(CONTRACT_CODES),
        _ => None,
    }
}

/// Encode one categorical value, ignoring case and surrounding whitespace.
pub fn encode_value(field: &'static str, raw: &str) -> Result<u32, PipelineError> {
    let codes = table(field).ok_or_else(|| {
        PipelineError::SchemaMismatch(format!("'{field}' is not a categorical field"))
    })?;

    let normalized = raw.trim().to_lowercase();
    codes
        .iter()
        .find(|(label, _)| *label == normalized)
        .map(|(_, code)| *code)
        .ok_or_else(|| PipelineError::InvalidCategory {
            field,
            value: raw.to_string(),
        })
}

/// A customer record with every field expressed as a number.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedRecord {
    values: BTreeMap<&'static str, f64>,
}

impl EncodedRecord {
    /// Build an encoded record from already-numeric field values.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (&'static str, f64)>) -> Self {
        Self {
            values: pairs.into_iter().collect(),
        }
    }

    pub fn get(&self, field: &str) -> Option<f64> {
        self.values.get(field).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.values.keys().copied()
    }
}

/// Replace the categorical fields of `record` with their integer codes.
pub fn encode(record: &CustomerRecord) -> Result<EncodedRecord, PipelineError> {
    let mut values: BTreeMap<&'static str, f64> = record.numeric_values().into_iter().collect();

    for (field, raw) in record.categorical_values() {
        let code = encode_value(field, raw)?;
        values.insert(field, f64::from(code));
    }

    Ok(EncodedRecord { values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FIELDS, TOTAL_SPEND};

    fn sample_record() -> CustomerRecord {
        CustomerRecord {
            age: 35.0,
            sex: "female".to_string(),
            tenure: 24.0,
            usage_frequency: 10.0,
            support_calls: 2.0,
            days_overdue: 0.0,
            subscription: "premium".to_string(),
            contract: "annual".to_string(),
            total_spend: 500.0,
            months_since_interaction: 1.0,
        }
    }

    #[test]
    fn encodes_categoricals_with_training_codes() {
        let encoded = encode(&sample_record()).unwrap();
        assert_eq!(encoded.get(SEX), Some(0.0));
        assert_eq!(encoded.get(SUBSCRIPTION), Some(1.0));
        assert_eq!(encoded.get(CONTRACT), Some(0.0));
        assert_eq!(encoded.get(TOTAL_SPEND), Some(500.0));
        assert_eq!(encoded.len(), FIELDS.len());
    }

    #[test]
    fn lookup_ignores_case_and_whitespace() {
        for raw in ["Female ", "female", " FEMALE", "\tfEmAlE\n"] {
            assert_eq!(encode_value(SEX, raw).unwrap(), 0, "value {raw:?}");
        }
        assert_eq!(encode_value(CONTRACT, " Quarterly").unwrap(), 2);
        assert_eq!(encode_value(SUBSCRIPTION, "STANDARD").unwrap(), 2);
    }

    #[test]
    fn unknown_value_is_invalid_category() {
        let mut record = sample_record();
        record.subscription = "gold".to_string();

        let err = encode(&record).unwrap_err();
        assert_eq!(
            err,
            PipelineError::InvalidCategory {
                field: SUBSCRIPTION,
                value: "gold".to_string(),
            }
        );
    }

    #[test]
    fn every_closed_set_rejects_outsiders() {
        assert!(encode_value(SEX, "other").is_err());
        assert!(encode_value(SUBSCRIPTION, "").is_err());
        assert!(encode_value(CONTRACT, "weekly").is_err());
    }

    #[test]
    fn numeric_field_has_no_table() {
        assert!(table(TOTAL_SPEND).is_none());
        assert!(matches!(
            encode_value(TOTAL_SPEND, "1"),
            Err(PipelineError::SchemaMismatch(_))
        ));
    }
}
