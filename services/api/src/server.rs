use crate::cli::ServeArgs;
use crate::infra::{build_service, AppState};
use crate::routes::with_service_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use loan_approval::config::AppConfig;
use loan_approval::error::AppError;
use loan_approval::telemetry;
use loan_approval::LoanPredictionService;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(dir) = args.model_dir.take() {
        config.models.artifact_dir = dir;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let service = build_service(&config.models);
    warm_models(Arc::clone(&service)).await;

    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
        service: Arc::clone(&service),
    };

    let app = with_service_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        model_dir = %config.models.resolved_artifact_dir().display(),
        "loan approval service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

/// Loads the artifacts before accepting traffic. A failure is logged and left for the first
/// request to retry, so `/predict` reports it as a `ModelLoadError`.
async fn warm_models(service: Arc<LoanPredictionService>) {
    let outcome =
        tokio::task::spawn_blocking(move || service.cache().ensure_loaded().map(|_| ())).await;

    match outcome {
        Ok(Ok(())) => info!("model artifacts warmed"),
        Ok(Err(err)) => warn!(error = %err, "model warm-up failed; requests will retry the load"),
        Err(err) => warn!(error = %err, "model warm-up task did not complete"),
    }
}
