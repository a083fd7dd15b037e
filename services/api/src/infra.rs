use loan_approval::config::{AppConfig, ModelConfig};
use loan_approval::error::AppError;
use loan_approval::{LoanPredictionService, ModelCache, FEATURE_SCHEMA};
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) service: Arc<LoanPredictionService>,
}

pub(crate) fn build_service(config: &ModelConfig) -> Arc<LoanPredictionService> {
    let cache = ModelCache::from_dir(
        config.resolved_artifact_dir(),
        &FEATURE_SCHEMA,
        config.required_runtime_version.clone(),
    );
    Arc::new(LoanPredictionService::new(Arc::new(cache)))
}

/// Model settings from the environment, with an optional artifact directory override.
pub(crate) fn load_model_config(model_dir: Option<PathBuf>) -> Result<ModelConfig, AppError> {
    let mut config = AppConfig::load()?.models;
    if let Some(dir) = model_dir {
        config.artifact_dir = dir;
    }
    Ok(config)
}
