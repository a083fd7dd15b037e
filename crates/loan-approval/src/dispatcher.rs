use crate::artifact::{ClassifierError, ModelSlot};
use crate::cache::LoadedModels;
use crate::normalizer::FeatureRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Human-readable outcome for one classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    /// Label `1` approves; every other label, including unexpected classes, rejects.
    pub fn from_label(label: f64) -> Self {
        if label == 1.0 {
            Decision::Approved
        } else {
            Decision::Rejected
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Decision::Approved => "Approved",
            Decision::Rejected => "Rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub logistic_regression: Decision,
    pub decision_tree: Decision,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{model} prediction failed: {source}")]
pub struct PredictionError {
    pub model: ModelSlot,
    pub source: ClassifierError,
}

/// Runs one record through both classifiers. Either failure aborts the whole prediction.
#[derive(Debug, Clone)]
pub struct PredictionDispatcher {
    models: Arc<LoadedModels>,
}

impl PredictionDispatcher {
    pub fn new(models: Arc<LoadedModels>) -> Self {
        Self { models }
    }

    pub fn predict(&self, record: &FeatureRecord) -> Result<PredictionResult, PredictionError> {
        let features = record.to_vector();
        let logistic_regression = self.decide(ModelSlot::LogisticRegression, &features)?;
        let decision_tree = self.decide(ModelSlot::DecisionTree, &features)?;

        Ok(PredictionResult {
            logistic_regression,
            decision_tree,
        })
    }

    fn decide(&self, model: ModelSlot, features: &[f64]) -> Result<Decision, PredictionError> {
        let label = self
            .models
            .get(model)
            .predict(features)
            .map_err(|source| PredictionError { model, source })?;
        debug!(%model, label, "classifier returned label");
        Ok(Decision::from_label(label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Classifier;
    use crate::normalizer::FieldNormalizer;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(f64);

    impl Classifier for Fixed {
        fn predict(&self, _features: &[f64]) -> Result<f64, ClassifierError> {
            Ok(self.0)
        }
    }

    struct Failing;

    impl Classifier for Failing {
        fn predict(&self, _features: &[f64]) -> Result<f64, ClassifierError> {
            Err(ClassifierError::Inference("tree corrupted".to_string()))
        }
    }

    #[derive(Default)]
    struct Recording {
        calls: AtomicUsize,
    }

    impl Classifier for Arc<Recording> {
        fn predict(&self, features: &[f64]) -> Result<f64, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(features[9])
        }
    }

    fn models(lr: Arc<dyn Classifier>, dt: Arc<dyn Classifier>) -> Arc<LoadedModels> {
        Arc::new(LoadedModels {
            logistic_regression: lr,
            decision_tree: dt,
            loaded_at: Utc::now(),
        })
    }

    fn record() -> FeatureRecord {
        FieldNormalizer::default()
            .normalize(&json!({
                "Gender": "Female",
                "Married": "No",
                "Dependents": "1",
                "Education": "Not Graduate",
                "Self_Employed": "No",
                "ApplicantIncome": "2583",
                "CoapplicantIncome": 2358,
                "LoanAmount": 120,
                "Loan_Amount_Term": 360,
                "Credit_History": 1,
                "Property_Area": "Semiurban"
            }))
            .expect("normalizes")
    }

    #[test]
    fn maps_labels_to_decisions() {
        assert_eq!(Decision::from_label(1.0), Decision::Approved);
        assert_eq!(Decision::from_label(0.0), Decision::Rejected);
        assert_eq!(Decision::from_label(2.0), Decision::Rejected);
        assert_eq!(Decision::from_label(-1.0), Decision::Rejected);
        assert_eq!(Decision::from_label(f64::NAN), Decision::Rejected);
    }

    #[test]
    fn both_models_see_the_same_vector() {
        let recording = Arc::new(Recording::default());
        let dispatcher = PredictionDispatcher::new(models(
            Arc::new(Arc::clone(&recording)),
            Arc::new(Arc::clone(&recording)),
        ));

        let result = dispatcher.predict(&record()).expect("predicts");
        assert_eq!(
            result,
            PredictionResult {
                logistic_regression: Decision::Approved,
                decision_tree: Decision::Approved,
            }
        );
        assert_eq!(recording.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unexpected_classes_reject_silently() {
        let dispatcher =
            PredictionDispatcher::new(models(Arc::new(Fixed(1.0)), Arc::new(Fixed(3.0))));
        let result = dispatcher.predict(&record()).expect("predicts");
        assert_eq!(result.logistic_regression, Decision::Approved);
        assert_eq!(result.decision_tree, Decision::Rejected);
    }

    #[test]
    fn a_failing_model_aborts_without_partial_result() {
        let dispatcher =
            PredictionDispatcher::new(models(Arc::new(Fixed(1.0)), Arc::new(Failing)));
        let error = dispatcher.predict(&record()).expect_err("prediction fails");

        assert_eq!(error.model, ModelSlot::DecisionTree);
        assert_eq!(
            error.to_string(),
            "decision_tree prediction failed: inference failed: tree corrupted"
        );
    }

    #[test]
    fn result_serializes_with_decision_labels() {
        let result = PredictionResult {
            logistic_regression: Decision::Approved,
            decision_tree: Decision::Rejected,
        };
        assert_eq!(
            serde_json::to_value(result).expect("serializes"),
            json!({ "logistic_regression": "Approved", "decision_tree": "Rejected" })
        );
    }
}
