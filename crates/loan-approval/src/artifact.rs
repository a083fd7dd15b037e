//! Serialized classifier artifacts and the inference runtime that interprets them.
//!
//! An artifact is a JSON envelope recording the runtime version it was serialized with, the
//! feature schema it was trained against, and the estimator parameters.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Version of the estimator runtime compiled into this build.
pub const RUNTIME_VERSION: &str = "1.6.1";

/// Version the shipped artifacts were serialized with.
pub const REQUIRED_RUNTIME_VERSION: &str = "1.6.1";

/// The two artifacts the service holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelSlot {
    LogisticRegression,
    DecisionTree,
}

impl ModelSlot {
    pub const ALL: [ModelSlot; 2] = [ModelSlot::LogisticRegression, ModelSlot::DecisionTree];

    pub fn key(self) -> &'static str {
        match self {
            ModelSlot::LogisticRegression => "logistic_regression",
            ModelSlot::DecisionTree => "decision_tree",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            ModelSlot::LogisticRegression => "logistic_regression_model.json",
            ModelSlot::DecisionTree => "decision_tree_model.json",
        }
    }
}

impl fmt::Display for ModelSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A trained binary classifier. Implementations must not mutate state in `predict`.
pub trait Classifier: Send + Sync {
    /// Returns the decision label for one feature vector.
    fn predict(&self, features: &[f64]) -> Result<f64, ClassifierError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassifierError {
    #[error("expected {expected} features, received {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("feature {index} is not a finite number")]
    NonFiniteInput { index: usize },
    #[error("malformed decision tree: {0}")]
    MalformedTree(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

fn check_inputs(features: &[f64], expected: usize) -> Result<(), ClassifierError> {
    if features.len() != expected {
        return Err(ClassifierError::DimensionMismatch {
            expected,
            actual: features.len(),
        });
    }
    match features.iter().position(|value| !value.is_finite()) {
        Some(index) => Err(ClassifierError::NonFiniteInput { index }),
        None => Ok(()),
    }
}

fn default_classes() -> [f64; 2] {
    [0.0, 1.0]
}

/// Binary logistic regression: `classes[1]` when `w·x + b > 0`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogisticRegression {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    #[serde(default = "default_classes")]
    pub classes: [f64; 2],
}

impl LogisticRegression {
    pub fn decision_function(&self, features: &[f64]) -> Result<f64, ClassifierError> {
        check_inputs(features, self.coefficients.len())?;
        let margin = self
            .coefficients
            .iter()
            .zip(features)
            .map(|(weight, value)| weight * value)
            .sum::<f64>();
        Ok(margin + self.intercept)
    }

}

impl Classifier for LogisticRegression {
    fn predict(&self, features: &[f64]) -> Result<f64, ClassifierError> {
        let margin = self.decision_function(features)?;
        Ok(if margin > 0.0 {
            self.classes[1]
        } else {
            self.classes[0]
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        label: f64,
    },
}

/// Binary decision tree; `x[feature] <= threshold` descends left.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DecisionTree {
    pub n_features: usize,
    pub nodes: Vec<TreeNode>,
}

impl Classifier for DecisionTree {
    fn predict(&self, features: &[f64]) -> Result<f64, ClassifierError> {
        check_inputs(features, self.n_features)?;

        let mut index = 0;
        for _ in 0..self.nodes.len() {
            match self.nodes.get(index) {
                Some(TreeNode::Leaf { label }) => return Ok(*label),
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let value = features.get(*feature).ok_or_else(|| {
                        ClassifierError::MalformedTree(format!(
                            "node {index} splits on missing feature {feature}"
                        ))
                    })?;
                    index = if value <= threshold { *left } else { *right };
                }
                None => {
                    return Err(ClassifierError::MalformedTree(format!(
                        "node {index} does not exist"
                    )))
                }
            }
        }

        Err(ClassifierError::MalformedTree(
            "traversal did not reach a leaf".to_string(),
        ))
    }
}

/// Estimator parameters tagged by kind.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Estimator {
    LogisticRegression(LogisticRegression),
    DecisionTree(DecisionTree),
}

impl Estimator {
    /// The slot this estimator kind belongs in.
    pub fn slot(&self) -> ModelSlot {
        match self {
            Estimator::LogisticRegression(_) => ModelSlot::LogisticRegression,
            Estimator::DecisionTree(_) => ModelSlot::DecisionTree,
        }
    }

    /// Structural checks against the number of features the service produces.
    pub fn validate(&self, n_features: usize) -> Result<(), String> {
        match self {
            Estimator::LogisticRegression(model) => {
                if model.coefficients.len() != n_features {
                    return Err(format!(
                        "{} coefficients for {n_features} features",
                        model.coefficients.len()
                    ));
                }
                if !model.intercept.is_finite()
                    || model.coefficients.iter().any(|weight| !weight.is_finite())
                {
                    return Err("non-finite coefficient".to_string());
                }
                Ok(())
            }
            Estimator::DecisionTree(tree) => {
                if tree.n_features != n_features {
                    return Err(format!(
                        "tree expects {} features, service provides {n_features}",
                        tree.n_features
                    ));
                }
                if tree.nodes.is_empty() {
                    return Err("tree has no nodes".to_string());
                }
                for (index, node) in tree.nodes.iter().enumerate() {
                    if let TreeNode::Split {
                        feature,
                        left,
                        right,
                        ..
                    } = node
                    {
                        if *feature >= n_features {
                            return Err(format!("node {index} splits on feature {feature}"));
                        }
                        if *left >= tree.nodes.len() || *right >= tree.nodes.len() {
                            return Err(format!("node {index} points past the node table"));
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

impl Classifier for Estimator {
    fn predict(&self, features: &[f64]) -> Result<f64, ClassifierError> {
        match self {
            Estimator::LogisticRegression(model) => model.predict(features),
            Estimator::DecisionTree(tree) => tree.predict(features),
        }
    }
}

/// Feature schema copy stored with each artifact.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SchemaManifest {
    pub version: String,
    pub features: Vec<String>,
}

/// On-disk artifact envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelArtifact {
    pub runtime_version: String,
    pub schema: SchemaManifest,
    pub estimator: Estimator,
    /// Fields this runtime does not understand; tolerated and only logged.
    #[serde(flatten)]
    pub unrecognized: BTreeMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stump() -> DecisionTree {
        DecisionTree {
            n_features: 2,
            nodes: vec![
                TreeNode::Split {
                    feature: 1,
                    threshold: 0.5,
                    left: 1,
                    right: 2,
                },
                TreeNode::Leaf { label: 0.0 },
                TreeNode::Leaf { label: 1.0 },
            ],
        }
    }

    #[test]
    fn logistic_regression_thresholds_margin_at_zero() {
        let model = LogisticRegression {
            coefficients: vec![2.0, -1.0],
            intercept: -0.5,
            classes: default_classes(),
        };

        assert_eq!(model.predict(&[1.0, 0.0]).expect("predicts"), 1.0);
        assert_eq!(model.predict(&[0.0, 1.0]).expect("predicts"), 0.0);
        assert_eq!(model.decision_function(&[0.25, 0.0]).expect("margin"), 0.0);
        assert_eq!(model.predict(&[0.25, 0.0]).expect("predicts"), 0.0);
    }

    #[test]
    fn logistic_regression_rejects_wrong_dimension() {
        let model = LogisticRegression {
            coefficients: vec![1.0, 1.0, 1.0],
            intercept: 0.0,
            classes: default_classes(),
        };
        assert_eq!(
            model.predict(&[1.0]),
            Err(ClassifierError::DimensionMismatch {
                expected: 3,
                actual: 1
            })
        );
        assert_eq!(
            model.predict(&[1.0, f64::NAN, 0.0]),
            Err(ClassifierError::NonFiniteInput { index: 1 })
        );
    }

    #[test]
    fn decision_tree_descends_left_on_equal_threshold() {
        let tree = stump();
        assert_eq!(tree.predict(&[9.0, 0.5]).expect("predicts"), 0.0);
        assert_eq!(tree.predict(&[9.0, 0.51]).expect("predicts"), 1.0);
    }

    #[test]
    fn decision_tree_detects_cycles() {
        let tree = DecisionTree {
            n_features: 1,
            nodes: vec![TreeNode::Split {
                feature: 0,
                threshold: 1.0,
                left: 0,
                right: 0,
            }],
        };
        assert!(matches!(
            tree.predict(&[0.0]),
            Err(ClassifierError::MalformedTree(_))
        ));
    }

    #[test]
    fn validate_checks_structure_against_feature_count() {
        let tree = Estimator::DecisionTree(stump());
        assert!(tree.validate(2).is_ok());
        assert!(tree.validate(3).is_err());

        let dangling = Estimator::DecisionTree(DecisionTree {
            n_features: 2,
            nodes: vec![TreeNode::Split {
                feature: 0,
                threshold: 1.0,
                left: 4,
                right: 5,
            }],
        });
        assert!(dangling
            .validate(2)
            .expect_err("dangling children")
            .contains("points past"));

        let short = Estimator::LogisticRegression(LogisticRegression {
            coefficients: vec![1.0],
            intercept: 0.0,
            classes: default_classes(),
        });
        assert!(short.validate(2).is_err());
    }

    #[test]
    fn artifact_envelope_collects_unrecognized_fields() {
        let artifact: ModelArtifact = serde_json::from_value(json!({
            "runtime_version": "1.6.1",
            "schema": { "version": "loan-v1", "features": ["a", "b"] },
            "estimator": {
                "kind": "logistic_regression",
                "coefficients": [0.1, 0.2],
                "intercept": 0.0
            },
            "trained_on": "2024-03-02",
            "deprecated_params": { "multi_class": "auto" }
        }))
        .expect("artifact deserializes");

        assert_eq!(artifact.estimator.slot(), ModelSlot::LogisticRegression);
        assert_eq!(artifact.schema.features, vec!["a", "b"]);
        let keys: Vec<_> = artifact.unrecognized.keys().cloned().collect();
        assert_eq!(keys, vec!["deprecated_params", "trained_on"]);
    }

    #[test]
    fn tree_nodes_deserialize_from_tagged_objects() {
        let estimator: Estimator = serde_json::from_value(json!({
            "kind": "decision_tree",
            "n_features": 1,
            "nodes": [
                { "split": { "feature": 0, "threshold": 2.5, "left": 1, "right": 2 } },
                { "leaf": { "label": 0 } },
                { "leaf": { "label": 1 } }
            ]
        }))
        .expect("tree deserializes");

        assert_eq!(estimator.slot(), ModelSlot::DecisionTree);
        assert_eq!(estimator.predict(&[3.0]).expect("predicts"), 1.0);
    }
}
