//! Lazily loaded, process-lifetime cache for the two classifier artifacts.

use crate::artifact::{Classifier, ModelArtifact, ModelSlot, RUNTIME_VERSION};
use crate::schema::FeatureSchema;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::{debug, error, info};

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("model runtime version mismatch: running {running}, artifacts require {required}")]
    RuntimeVersionMismatch { running: String, required: String },
    #[error("{slot} model artifact not found at {}", .path.display())]
    MissingArtifact { slot: ModelSlot, path: PathBuf },
    #[error("failed to read {slot} model artifact at {}: {source}", .path.display())]
    Io {
        slot: ModelSlot,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to deserialize {slot} model artifact: {source}")]
    Deserialize {
        slot: ModelSlot,
        source: serde_json::Error,
    },
    #[error("{slot} model artifact was serialized with runtime {found}, expected {required}")]
    ArtifactVersionMismatch {
        slot: ModelSlot,
        found: String,
        required: String,
    },
    #[error("{slot} model artifact was trained on schema {found}, service uses {expected}")]
    SchemaMismatch {
        slot: ModelSlot,
        found: String,
        expected: &'static str,
    },
    #[error("{slot} model artifact holds a {found} estimator")]
    UnexpectedEstimator { slot: ModelSlot, found: ModelSlot },
    #[error("{slot} model artifact is invalid: {reason}")]
    InvalidArtifact { slot: ModelSlot, reason: String },
    #[error("{slot} model failed to load: {reason}")]
    Other { slot: ModelSlot, reason: String },
}

/// Loads one artifact. Closures of the matching shape implement this directly.
pub trait ArtifactLoader: Send + Sync {
    fn load(&self, slot: ModelSlot) -> Result<Arc<dyn Classifier>, ModelLoadError>;
}

impl<F> ArtifactLoader for F
where
    F: Fn(ModelSlot) -> Result<Arc<dyn Classifier>, ModelLoadError> + Send + Sync,
{
    fn load(&self, slot: ModelSlot) -> Result<Arc<dyn Classifier>, ModelLoadError> {
        self(slot)
    }
}

/// Reads JSON artifacts from a directory and checks them against the service schema.
#[derive(Debug, Clone)]
pub struct FsArtifactLoader {
    dir: PathBuf,
    schema: &'static FeatureSchema,
    required_version: String,
}

impl FsArtifactLoader {
    pub fn new(
        dir: impl Into<PathBuf>,
        schema: &'static FeatureSchema,
        required_version: impl Into<String>,
    ) -> Self {
        Self {
            dir: dir.into(),
            schema,
            required_version: required_version.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, slot: ModelSlot) -> PathBuf {
        self.dir.join(slot.file_name())
    }

    fn read_artifact(&self, slot: ModelSlot) -> Result<ModelArtifact, ModelLoadError> {
        let path = self.artifact_path(slot);
        if !path.is_file() {
            return Err(ModelLoadError::MissingArtifact { slot, path });
        }

        let bytes = std::fs::read(&path).map_err(|source| ModelLoadError::Io {
            slot,
            path: path.clone(),
            source,
        })?;

        let artifact: ModelArtifact = serde_json::from_slice(&bytes)
            .map_err(|source| ModelLoadError::Deserialize { slot, source })?;

        if !artifact.unrecognized.is_empty() {
            let fields: Vec<&str> = artifact.unrecognized.keys().map(String::as_str).collect();
            debug!(%slot, ?fields, "ignoring unrecognized artifact fields");
        }

        Ok(artifact)
    }

    fn check_artifact(
        &self,
        slot: ModelSlot,
        artifact: &ModelArtifact,
    ) -> Result<(), ModelLoadError> {
        if artifact.runtime_version != self.required_version {
            return Err(ModelLoadError::ArtifactVersionMismatch {
                slot,
                found: artifact.runtime_version.clone(),
                required: self.required_version.clone(),
            });
        }

        if !self
            .schema
            .matches(&artifact.schema.version, &artifact.schema.features)
        {
            return Err(ModelLoadError::SchemaMismatch {
                slot,
                found: artifact.schema.version.clone(),
                expected: self.schema.version,
            });
        }

        let found = artifact.estimator.slot();
        if found != slot {
            return Err(ModelLoadError::UnexpectedEstimator { slot, found });
        }

        artifact
            .estimator
            .validate(self.schema.len())
            .map_err(|reason| ModelLoadError::InvalidArtifact { slot, reason })
    }
}

impl ArtifactLoader for FsArtifactLoader {
    fn load(&self, slot: ModelSlot) -> Result<Arc<dyn Classifier>, ModelLoadError> {
        let artifact = self.read_artifact(slot)?;
        self.check_artifact(slot, &artifact)?;
        info!(%slot, path = %self.artifact_path(slot).display(), "model artifact loaded");
        Ok(Arc::new(artifact.estimator))
    }
}

/// Both classifiers, resident and read-only.
pub struct LoadedModels {
    pub logistic_regression: Arc<dyn Classifier>,
    pub decision_tree: Arc<dyn Classifier>,
    pub loaded_at: DateTime<Utc>,
}

impl LoadedModels {
    pub fn get(&self, slot: ModelSlot) -> &dyn Classifier {
        match slot {
            ModelSlot::LogisticRegression => self.logistic_regression.as_ref(),
            ModelSlot::DecisionTree => self.decision_tree.as_ref(),
        }
    }
}

impl fmt::Debug for LoadedModels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModels")
            .field("loaded_at", &self.loaded_at)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct PendingSlots {
    logistic_regression: Option<Arc<dyn Classifier>>,
    decision_tree: Option<Arc<dyn Classifier>>,
}

/// Holds the artifacts for the life of the process.
///
/// The first successful [`ModelCache::ensure_loaded`] publishes both models; later calls are a
/// lock-free read. Until then, loads are serialized behind a mutex and any slot that failed is
/// retried on the next call while slots that succeeded are kept.
pub struct ModelCache {
    loader: Box<dyn ArtifactLoader>,
    runtime_version: String,
    required_version: String,
    loaded: OnceLock<Arc<LoadedModels>>,
    pending: Mutex<PendingSlots>,
}

impl ModelCache {
    pub fn new(
        loader: impl ArtifactLoader + 'static,
        required_version: impl Into<String>,
    ) -> Self {
        Self {
            loader: Box::new(loader),
            runtime_version: RUNTIME_VERSION.to_string(),
            required_version: required_version.into(),
            loaded: OnceLock::new(),
            pending: Mutex::new(PendingSlots::default()),
        }
    }

    /// Cache backed by JSON artifacts under `dir`.
    pub fn from_dir(
        dir: impl Into<PathBuf>,
        schema: &'static FeatureSchema,
        required_version: impl Into<String>,
    ) -> Self {
        let required_version = required_version.into();
        let loader = FsArtifactLoader::new(dir, schema, required_version.clone());
        Self::new(loader, required_version)
    }

    /// Overrides the version reported for the active runtime.
    pub fn with_runtime_version(mut self, version: impl Into<String>) -> Self {
        self.runtime_version = version.into();
        self
    }

    pub fn runtime_version(&self) -> &str {
        &self.runtime_version
    }

    pub fn required_version(&self) -> &str {
        &self.required_version
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded.get().map(|models| models.loaded_at)
    }

    pub fn ensure_loaded(&self) -> Result<Arc<LoadedModels>, ModelLoadError> {
        if let Some(models) = self.loaded.get() {
            return Ok(Arc::clone(models));
        }

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(models) = self.loaded.get() {
            return Ok(Arc::clone(models));
        }

        if self.runtime_version != self.required_version {
            let err = ModelLoadError::RuntimeVersionMismatch {
                running: self.runtime_version.clone(),
                required: self.required_version.clone(),
            };
            error!(error = %err, "refusing to load model artifacts");
            return Err(err);
        }

        let logistic_regression = self.load_slot(
            ModelSlot::LogisticRegression,
            &mut pending.logistic_regression,
        )?;
        let decision_tree = self.load_slot(ModelSlot::DecisionTree, &mut pending.decision_tree)?;

        let models = self.loaded.get_or_init(|| {
            Arc::new(LoadedModels {
                logistic_regression,
                decision_tree,
                loaded_at: Utc::now(),
            })
        });
        info!(runtime_version = %self.runtime_version, "model cache ready");
        Ok(Arc::clone(models))
    }

    fn load_slot(
        &self,
        slot: ModelSlot,
        entry: &mut Option<Arc<dyn Classifier>>,
    ) -> Result<Arc<dyn Classifier>, ModelLoadError> {
        if let Some(model) = entry {
            return Ok(Arc::clone(model));
        }

        let model = self.loader.load(slot).map_err(|err| {
            error!(%slot, error = %err, "model artifact failed to load");
            err
        })?;
        *entry = Some(Arc::clone(&model));
        Ok(model)
    }
}

impl fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCache")
            .field("runtime_version", &self.runtime_version)
            .field("required_version", &self.required_version)
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}
