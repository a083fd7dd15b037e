use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN,
        },
        StatusCode,
    },
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::json;
use tracing::{info, warn};

use super::handler::{LoanPredictionService, PredictError};

/// Router exposing `POST /predict` and its CORS preflight.
pub fn prediction_router(service: Arc<LoanPredictionService>) -> Router {
    Router::new()
        .route("/predict", post(predict_handler).options(preflight_handler))
        .with_state(service)
}

pub(crate) async fn predict_handler(
    State(service): State<Arc<LoanPredictionService>>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            let error = PredictError::Unknown(rejection.body_text());
            warn!(error_type = error.kind(), %error, "request body rejected");
            return error.into_response();
        }
    };
    match service.handle_blocking(body).await {
        Ok(result) => {
            info!(
                logistic_regression = result.logistic_regression.label(),
                decision_tree = result.decision_tree.label(),
                "prediction served"
            );
            (
                StatusCode::OK,
                [(ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
                Json(result),
            )
                .into_response()
        }
        Err(error) => {
            warn!(error_type = error.kind(), %error, "prediction request failed");
            error.into_response()
        }
    }
}

pub(crate) async fn preflight_handler() -> Response {
    (
        StatusCode::OK,
        [
            (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"),
            (ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
        ],
    )
        .into_response()
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let payload = json!({
            "error": self.to_string(),
            "type": self.kind(),
        });
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
            Json(payload),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{Classifier, ClassifierError, ModelSlot, REQUIRED_RUNTIME_VERSION};
    use crate::cache::{ModelCache, ModelLoadError};
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    struct AlwaysApprove;

    impl Classifier for AlwaysApprove {
        fn predict(&self, _features: &[f64]) -> Result<f64, ClassifierError> {
            Ok(1.0)
        }
    }

    fn service() -> Arc<LoanPredictionService> {
        let cache = ModelCache::new(
            |_slot: ModelSlot| -> Result<Arc<dyn Classifier>, ModelLoadError> {
                Ok(Arc::new(AlwaysApprove))
            },
            REQUIRED_RUNTIME_VERSION,
        );
        Arc::new(LoanPredictionService::new(Arc::new(cache)))
    }

    async fn read_json_body(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), 4096)
            .await
            .expect("read body");
        serde_json::from_slice(&body).expect("json payload")
    }

    #[tokio::test]
    async fn preflight_returns_cors_headers_without_body() {
        let response = prediction_router(service())
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/predict")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("route executes");

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], "POST, OPTIONS");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type");

        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .expect("read body");
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn errors_carry_type_and_cors_header() {
        let response = predict_handler(State(service()), Ok(Bytes::new())).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let payload = read_json_body(response).await;
        assert_eq!(payload["error"], "Empty request body");
        assert_eq!(payload["type"], "EmptyBodyError");
    }

    #[tokio::test]
    async fn predict_route_returns_decisions() {
        let body = r#"{"Gender":"Female","Married":"No","Dependents":"","Education":"Graduate",
            "Self_Employed":"No","ApplicantIncome":"abc","CoapplicantIncome":"1508",
            "LoanAmount":128,"Loan_Amount_Term":360,"Credit_History":1,"Property_Area":"Rural"}"#;

        let response = prediction_router(service())
            .oneshot(
                Request::post("/predict")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .expect("route executes");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let payload = read_json_body(response).await;
        assert_eq!(
            payload,
            json!({ "logistic_regression": "Approved", "decision_tree": "Approved" })
        );
    }

    #[tokio::test]
    async fn oversized_body_becomes_json_error_with_cors() {
        let mut body = br#"{"Gender":"Male"}"#.to_vec();
        body.resize(body.len() + 3 * 1024 * 1024, b' ');

        let response = prediction_router(service())
            .oneshot(
                Request::post("/predict")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .expect("route executes");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let payload = read_json_body(response).await;
        assert_eq!(payload["type"], "UnknownError");
        assert!(payload["error"]
            .as_str()
            .is_some_and(|message| message.contains("length limit")));
    }
}
