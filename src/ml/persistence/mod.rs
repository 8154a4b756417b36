use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

use super::model::ModelState;
use crate::error::{Result, ScoringError};

/// File stem shared by every stored model
const MODEL_FILE_PREFIX: &str = "investment_forest_";
const MODEL_FILE_EXTENSION: &str = "json";

/// Semantic version for models
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ModelVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    pub fn initial() -> Self {
        Self::new(1, 0, 0)
    }

    pub fn bump_major(&self) -> Self {
        Self::new(self.major + 1, 0, 0)
    }

    pub fn bump_minor(&self) -> Self {
        Self::new(self.major, self.minor + 1, 0)
    }

    pub fn bump_patch(&self) -> Self {
        Self::new(self.major, self.minor, self.patch + 1)
    }
}

impl FromStr for ModelVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(format!("invalid version format: {}", s));
        }
        let part = |p: &str| p.parse::<u32>().map_err(|e| format!("invalid version '{}': {}", s, e));

        Ok(Self {
            major: part(parts[0])?,
            minor: part(parts[1])?,
            patch: part(parts[2])?,
        })
    }
}

impl std::fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Hold-out metrics stored with a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub accuracy: f64,
    /// Macro averages over the labels seen in the hold-out set
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub oob_accuracy: Option<f64>,
    pub train_samples: usize,
    pub test_samples: usize,
}

/// Versioned model files in a single directory:
/// `<dir>/investment_forest_<major.minor.patch>.json`
pub struct ModelStore {
    models_dir: PathBuf,
}

impl ModelStore {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Ensure models directory exists
    pub fn ensure_models_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.models_dir)?;
        Ok(())
    }

    pub fn model_path(&self, version: &ModelVersion) -> PathBuf {
        self.models_dir
            .join(format!("{}{}.{}", MODEL_FILE_PREFIX, version, MODEL_FILE_EXTENSION))
    }

    /// Write a model under its own version, replacing any file of that version
    pub fn save(&self, state: &ModelState) -> Result<PathBuf> {
        self.ensure_models_dir()?;

        let path = self.model_path(&state.version);
        if path.exists() {
            warn!("Overwriting stored model v{}", state.version);
        }
        std::fs::write(&path, state.to_json()?)?;

        info!(
            "Saved model v{} ({} trees, accuracy {:.1}%) to {}",
            state.version,
            state.forest.n_trees(),
            state.metrics.accuracy * 100.0,
            path.display()
        );

        Ok(path)
    }

    pub fn load(&self, version: &ModelVersion) -> Result<ModelState> {
        let path = self.model_path(version);
        if !path.exists() {
            return Err(ScoringError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("model file not found: {}", path.display()),
            )));
        }

        let state = ModelState::from_json(&std::fs::read_to_string(&path)?)?;
        info!("Loaded model v{} from {}", version, path.display());
        Ok(state)
    }

    /// Stored versions, oldest first. A missing directory is an empty store.
    pub fn list_versions(&self) -> Result<Vec<ModelVersion>> {
        if !self.models_dir.exists() {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        for entry in std::fs::read_dir(&self.models_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(MODEL_FILE_EXTENSION) {
                continue;
            }
            let version = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.strip_prefix(MODEL_FILE_PREFIX))
                .and_then(|v| v.parse::<ModelVersion>().ok());
            if let Some(version) = version {
                versions.push(version);
            }
        }
        versions.sort();
        Ok(versions)
    }

    pub fn latest_version(&self) -> Result<Option<ModelVersion>> {
        Ok(self.list_versions()?.pop())
    }

    pub fn load_latest(&self) -> Result<Option<ModelState>> {
        match self.latest_version()? {
            Some(version) => self.load(&version).map(Some),
            None => Ok(None),
        }
    }

    /// Suggest next version (defaults to patch bump)
    pub fn suggest_next_version(&self) -> Result<ModelVersion> {
        match self.latest_version()? {
            Some(latest) => Ok(latest.bump_patch()),
            None => Ok(ModelVersion::initial()),
        }
    }

    pub fn delete(&self, version: &ModelVersion) -> Result<()> {
        let path = self.model_path(version);
        std::fs::remove_file(&path)?;
        info!("Deleted model v{} ({})", version, path.display());
        Ok(())
    }
}
