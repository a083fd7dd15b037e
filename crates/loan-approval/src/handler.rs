//! Per-request pipeline: ensure models, read body, parse, normalize, dispatch.

use crate::cache::{ModelCache, ModelLoadError};
use crate::dispatcher::{PredictionDispatcher, PredictionError, PredictionResult};
use crate::normalizer::{FieldNormalizer, NormalizeError};
use axum::body::Bytes;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Every way a prediction request can fail. All of them surface as a JSON error envelope.
#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),
    #[error("Empty request body")]
    EmptyBody,
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid value for field {field}: {value}")]
    InvalidField { field: &'static str, value: String },
    #[error(transparent)]
    Prediction(#[from] PredictionError),
    #[error("{0}")]
    Unknown(String),
}

impl PredictError {
    /// Stable error class reported in the `type` field of the envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::ModelLoad(_) => "ModelLoadError",
            PredictError::EmptyBody => "EmptyBodyError",
            PredictError::InvalidJson(_) => "InvalidJsonError",
            PredictError::MissingField(_) => "MissingFieldError",
            PredictError::InvalidField { .. } => "InvalidFieldError",
            PredictError::Prediction(_) => "PredictionError",
            PredictError::Unknown(_) => "UnknownError",
        }
    }
}

impl From<NormalizeError> for PredictError {
    fn from(value: NormalizeError) -> Self {
        match value {
            NormalizeError::NotAnObject => {
                Self::InvalidJson(NormalizeError::NotAnObject.to_string())
            }
            NormalizeError::MissingField { field } => Self::MissingField(field),
            NormalizeError::InvalidValue { field, value } => Self::InvalidField { field, value },
        }
    }
}

/// Orchestrates the model cache, normalizer, and dispatcher for one request at a time.
#[derive(Debug)]
pub struct LoanPredictionService {
    cache: Arc<ModelCache>,
    normalizer: FieldNormalizer,
}

impl LoanPredictionService {
    pub fn new(cache: Arc<ModelCache>) -> Self {
        Self {
            cache,
            normalizer: FieldNormalizer::default(),
        }
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Runs the full pipeline on a raw request body.
    pub fn handle(&self, body: &[u8]) -> Result<PredictionResult, PredictError> {
        let models = self.cache.ensure_loaded()?;
        let raw = parse_body(body)?;
        let record = self.normalizer.normalize(&raw)?;
        debug!(features = ?record.to_vector(), "application normalized");
        let result = PredictionDispatcher::new(models).predict(&record)?;
        Ok(result)
    }

    /// Runs [`Self::handle`] on the blocking pool so a cold-start artifact load never stalls
    /// the async workers. A panicking worker is reported as an unknown error.
    pub async fn handle_blocking(
        self: Arc<Self>,
        body: Bytes,
    ) -> Result<PredictionResult, PredictError> {
        tokio::task::spawn_blocking(move || self.handle(&body))
            .await
            .map_err(|err| {
                if err.is_panic() {
                    PredictError::Unknown("prediction worker panicked".to_string())
                } else {
                    PredictError::Unknown(err.to_string())
                }
            })?
    }
}

fn parse_body(body: &[u8]) -> Result<Value, PredictError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(PredictError::EmptyBody);
    }
    serde_json::from_slice(body).map_err(|err| PredictError::InvalidJson(err.to_string()))
}
