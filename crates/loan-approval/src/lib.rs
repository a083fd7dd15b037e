//! Loan application screening: input normalization, cached classifier artifacts, and the
//! request pipeline that turns a JSON application into one decision per model.

pub mod artifact;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod normalizer;
pub mod router;
pub mod schema;
pub mod telemetry;

pub use artifact::{
    Classifier, ClassifierError, ModelSlot, REQUIRED_RUNTIME_VERSION, RUNTIME_VERSION,
};
pub use cache::{ArtifactLoader, FsArtifactLoader, LoadedModels, ModelCache, ModelLoadError};
pub use dispatcher::{Decision, PredictionDispatcher, PredictionError, PredictionResult};
pub use handler::{LoanPredictionService, PredictError};
pub use normalizer::{FeatureRecord, FeatureValue, FieldNormalizer, NormalizeError};
pub use router::prediction_router;
pub use schema::{FeatureSchema, FieldKind, FieldPolicy, FieldSpec, OnParseFail, FEATURE_SCHEMA};
