use crate::infra::{build_service, load_model_config};
use clap::Args;
use loan_approval::config::ModelConfig;
use loan_approval::error::AppError;
use loan_approval::{ModelSlot, PredictionResult, FEATURE_SCHEMA};
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub(crate) struct PredictArgs {
    /// JSON file holding one loan application
    #[arg(long)]
    pub(crate) input: PathBuf,
    /// Override the directory holding the model artifacts
    #[arg(long)]
    pub(crate) model_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct CheckModelsArgs {
    /// Override the directory holding the model artifacts
    #[arg(long)]
    pub(crate) model_dir: Option<PathBuf>,
}

pub(crate) fn run_predict(args: PredictArgs) -> Result<(), AppError> {
    let config = load_model_config(args.model_dir)?;
    let result = predict_file(&config, &args.input)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

pub(crate) fn run_check_models(args: CheckModelsArgs) -> Result<(), AppError> {
    let config = load_model_config(args.model_dir)?;
    let report = check_models(&config)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn predict_file(config: &ModelConfig, input: &Path) -> Result<PredictionResult, AppError> {
    let service = build_service(config);
    let body = std::fs::read(input)?;
    Ok(service.handle(&body)?)
}

fn check_models(config: &ModelConfig) -> Result<serde_json::Value, AppError> {
    let service = build_service(config);
    let models = service.cache().ensure_loaded()?;
    let artifacts: Vec<_> = ModelSlot::ALL
        .iter()
        .map(|slot| json!({ "model": slot.key(), "file": slot.file_name() }))
        .collect();
    Ok(json!({
        "artifact_dir": config.resolved_artifact_dir(),
        "runtime_version": service.cache().runtime_version(),
        "required_runtime_version": service.cache().required_version(),
        "schema_version": FEATURE_SCHEMA.version,
        "loaded_at": models.loaded_at,
        "artifacts": artifacts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use loan_approval::Decision;

    fn manifest_path(relative: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(relative)
    }

    fn model_config(required_runtime_version: &str) -> ModelConfig {
        ModelConfig {
            base_dir: PathBuf::from(env!("CARGO_MANIFEST_DIR")),
            artifact_dir: PathBuf::from("ml_models"),
            required_runtime_version: required_runtime_version.to_string(),
        }
    }

    #[test]
    fn predict_file_scores_the_demo_application() {
        let result = predict_file(
            &model_config("1.6.1"),
            &manifest_path("demo/application.json"),
        )
        .expect("prediction succeeds");

        assert_eq!(result.logistic_regression, Decision::Approved);
        assert_eq!(result.decision_tree, Decision::Approved);
    }

    #[test]
    fn predict_file_surfaces_missing_input() {
        let error = predict_file(&model_config("1.6.1"), &manifest_path("demo/missing.json"))
            .expect_err("missing input");
        assert!(matches!(error, AppError::Io(_)));
    }

    #[test]
    fn check_models_reports_version_contract() {
        let report = check_models(&model_config("1.6.1")).expect("models load");
        assert_eq!(report["runtime_version"], "1.6.1");
        assert_eq!(report["schema_version"], "loan-v1");
        assert_eq!(report["artifacts"][0]["file"], "logistic_regression_model.json");
        assert_eq!(report["artifacts"][1]["model"], "decision_tree");
    }

    #[test]
    fn check_models_fails_on_version_mismatch() {
        let error = check_models(&model_config("2.0.0")).expect_err("mismatch");
        assert!(matches!(error, AppError::ModelLoad(_)));
    }
}
