//! Error types for the inference pipeline and trained artifact loading

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// Failures raised while serving a single prediction.
///
/// Only [`PipelineError::InvalidCategory`] is reported as a client fault. The
/// other variants mean the input or the loaded artifacts do not fit the
/// pipeline's schema, and no retry of the same input can succeed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("invalid value '{value}' for categorical field '{field}'")]
    InvalidCategory { field: &'static str, value: String },

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("{model} rejected its input: {reason}")]
    Prediction { model: &'static str, reason: String },

    #[error("segment {segment} is outside the precomputed range 0..{segments}")]
    UnknownSegment { segment: usize, segments: usize },
}

impl PipelineError {
    /// Stable machine-readable name used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidCategory { .. } => "invalid_category",
            PipelineError::SchemaMismatch(_) => "schema_mismatch",
            PipelineError::Prediction { .. } => "prediction_error",
            PipelineError::UnknownSegment { .. } => "unknown_segment",
        }
    }

    pub fn is_client_fault(&self) -> bool {
        matches!(self, PipelineError::InvalidCategory { .. })
    }

    pub fn status_code(&self) -> StatusCode {
        if self.is_client_fault() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if !self.is_client_fault() {
            tracing::error!(kind = self.kind(), error = %self, "inference pipeline failed");
        }

        let body = Json(json!({ "error": self.kind(), "detail": self.to_string() }));
        (status, body).into_response()
    }
}

/// Failures while reading, writing or cross-checking trained artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to access artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode artifact {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode artifact {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("artifact {path} holds '{found}', expected '{expected}'")]
    WrongKind {
        path: PathBuf,
        expected: &'static str,
        found: String,
    },

    #[error("artifact {path} has schema version {found}, this build reads version {expected}")]
    UnsupportedVersion {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    #[error("inconsistent artifacts: {0}")]
    Inconsistent(String),
}
