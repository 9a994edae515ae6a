use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

#[allow(unused_imports)]
use log::{debug, info, warn, error};

use crate::error::ConfigError;

// Default values for configuration
// These serve as fallback values for settings.yaml fields that are not set
pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_SELECTION_DIR: &str = "selected_annotations";
pub const DEFAULT_EXPORT_DIR: &str = "exports";
pub const DEFAULT_IMAGE_EXTENSION: &str = "jpg";
pub const DEFAULT_MASK_EXTENSION: &str = "png";
pub const DEFAULT_BACKGROUND_ID: u32 = 0;
pub const DEFAULT_HIGH_COVERAGE_THRESHOLD: f64 = 90.0;
pub const DEFAULT_OVERLAY_ALPHA: f32 = 0.5;

/// Directory roots for one dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub image_dir: PathBuf,
    #[serde(alias = "ann_file")]
    pub annotation_file: PathBuf,
    pub mask_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    datasets: BTreeMap<String, DatasetConfig>,
}

/// Configured datasets, keyed by lower-cased name
#[derive(Debug, Clone, Default)]
pub struct DatasetCatalog {
    datasets: BTreeMap<String, DatasetConfig>,
}

impl DatasetCatalog {
    /// Load the catalog from a JSON (default) or YAML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
            Some("yaml") | Some("yml")
        );

        let file: CatalogFile = if is_yaml {
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        };

        let catalog = Self::from_entries(file.datasets);
        info!("Loaded {} dataset(s) from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// Build a catalog, normalizing names to lower case
    pub fn from_entries(entries: impl IntoIterator<Item = (String, DatasetConfig)>) -> Self {
        let mut datasets = BTreeMap::new();
        for (name, config) in entries {
            let key = normalize_dataset_name(&name);
            if datasets.contains_key(&key) {
                warn!("Dataset name '{}' collides with an existing entry after normalization, ignoring", name);
                continue;
            }
            datasets.insert(key, config);
        }
        Self { datasets }
    }

    pub fn get(&self, name: &str) -> Result<&DatasetConfig, ConfigError> {
        self.datasets
            .get(&normalize_dataset_name(name))
            .ok_or_else(|| ConfigError::UnknownDataset(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

pub fn normalize_dataset_name(name: &str) -> String {
    name.trim().to_lowercase()
}
