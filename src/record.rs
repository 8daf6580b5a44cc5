//! Customer record intake and the column names shared with training data

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};

pub const AGE: &str = "idade";
pub const SEX: &str = "sexo";
pub const TENURE: &str = "tempo_como_cliente";
pub const USAGE_FREQUENCY: &str = "frequencia_uso";
pub const SUPPORT_CALLS: &str = "ligacoes_callcenter";
pub const DAYS_OVERDUE: &str = "dias_atraso";
pub const SUBSCRIPTION: &str = "assinatura";
pub const CONTRACT: &str = "duracao_contrato";
pub const TOTAL_SPEND: &str = "total_gasto";
pub const MONTHS_SINCE_INTERACTION: &str = "meses_ultima_interacao";

/// Binary churn target in the training data.
pub const CHURN_LABEL: &str = "cancelou";

/// Identifier column, dropped before fitting.
pub const CUSTOMER_ID: &str = "CustomerID";

/// Fields scaled by the fitted mean/std transform.
pub const NUMERIC_FIELDS: [&str; 7] = [
    AGE,
    TENURE,
    USAGE_FREQUENCY,
    SUPPORT_CALLS,
    DAYS_OVERDUE,
    TOTAL_SPEND,
    MONTHS_SINCE_INTERACTION,
];

/// Fields encoded through closed lookup tables.
pub const CATEGORICAL_FIELDS: [&str; 3] = [SEX, SUBSCRIPTION, CONTRACT];

/// Every input field, in declaration order.
pub const FIELDS: [&str; 10] = [
    AGE,
    SEX,
    TENURE,
    USAGE_FREQUENCY,
    SUPPORT_CALLS,
    DAYS_OVERDUE,
    SUBSCRIPTION,
    CONTRACT,
    TOTAL_SPEND,
    MONTHS_SINCE_INTERACTION,
];

/// Resolve a column name to its static field name.
pub fn field_name(name: &str) -> Option<&'static str> {
    FIELDS.iter().copied().find(|field| *field == name)
}

/// A single customer as submitted for inference.
///
/// All ten fields are required. Categorical values are free-form strings and
/// are only validated by the encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomerRecord {
    #[serde(rename = "idade")]
    pub age: f64,
    #[serde(rename = "sexo")]
    pub sex: String,
    #[serde(rename = "tempo_como_cliente")]
    pub tenure: f64,
    #[serde(rename = "frequencia_uso")]
    pub usage_frequency: f64,
    #[serde(rename = "ligacoes_callcenter")]
    pub support_calls: f64,
    #[serde(rename = "dias_atraso")]
    pub days_overdue: f64,
    #[serde(rename = "assinatura")]
    pub subscription: String,
    #[serde(rename = "duracao_contrato")]
    pub contract: String,
    #[serde(rename = "total_gasto")]
    pub total_spend: f64,
    #[serde(rename = "meses_ultima_interacao")]
    pub months_since_interaction: f64,
}

impl CustomerRecord {
    /// Build a record from an untyped JSON value.
    ///
    /// Missing, unknown or ill-typed fields are reported as
    /// [`PipelineError::SchemaMismatch`] before any model is consulted.
    pub fn from_json(value: serde_json::Value) -> Result<Self, PipelineError> {
        if !value.is_object() {
            return Err(PipelineError::SchemaMismatch(
                "customer record must be a JSON object".to_string(),
            ));
        }
        serde_json::from_value(value).map_err(|err| PipelineError::SchemaMismatch(err.to_string()))
    }

    /// Numeric fields paired with their column names.
    pub fn numeric_values(&self) -> [(&'static str, f64); 7] {
        [
            (AGE, self.age),
            (TENURE, self.tenure),
            (USAGE_FREQUENCY, self.usage_frequency),
            (SUPPORT_CALLS, self.support_calls),
            (DAYS_OVERDUE, self.days_overdue),
            (TOTAL_SPEND, self.total_spend),
            (MONTHS_SINCE_INTERACTION, self.months_since_interaction),
        ]
    }

    /// Categorical fields paired with their column names.
    pub fn categorical_values(&self) -> [(&'static str, &str); 3] {
        [
            (SEX, self.sex.as_str()),
            (SUBSCRIPTION, self.subscription.as_str()),
            (CONTRACT, self.contract.as_str()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_json() -> serde_json::Value {
        json!({
            "idade": 35,
            "sexo": "female",
            "tempo_como_cliente": 24,
            "frequencia_uso": 10,
            "ligacoes_callcenter": 2,
            "dias_atraso": 0,
            "assinatura": "premium",
            "duracao_contrato": "annual",
            "total_gasto": 500,
            "meses_ultima_interacao": 1
        })
    }

    #[test]
    fn parses_complete_record() {
        let record = CustomerRecord::from_json(sample_json()).unwrap();
        assert_eq!(record.age, 35.0);
        assert_eq!(record.sex, "female");
        assert_eq!(record.total_spend, 500.0);
        assert_eq!(record.numeric_values().len(), NUMERIC_FIELDS.len());
    }

    #[test]
    fn missing_field_is_schema_mismatch() {
        let mut value = sample_json();
        value.as_object_mut().unwrap().remove("idade");

        let err = CustomerRecord::from_json(value).unwrap_err();
        match err {
            PipelineError::SchemaMismatch(message) => assert!(message.contains("idade")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_and_ill_typed_fields_are_rejected() {
        let mut value = sample_json();
        value["plano"] = json!("gold");
        assert!(matches!(
            CustomerRecord::from_json(value),
            Err(PipelineError::SchemaMismatch(_))
        ));

        let mut value = sample_json();
        value["total_gasto"] = json!("five hundred");
        assert!(matches!(
            CustomerRecord::from_json(value),
            Err(PipelineError::SchemaMismatch(_))
        ));

        assert!(matches!(
            CustomerRecord::from_json(json!([1, 2, 3])),
            Err(PipelineError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn echoes_wire_names_when_serialized() {
        let record = CustomerRecord::from_json(sample_json()).unwrap();
        let echoed = serde_json::to_value(&record).unwrap();
        for field in FIELDS {
            assert!(echoed.get(field).is_some(), "missing {field}");
        }
    }

    #[test]
    fn field_name_resolves_known_columns_only() {
        assert_eq!(field_name("total_gasto"), Some(TOTAL_SPEND));
        assert_eq!(field_name(CHURN_LABEL), None);
    }
}
