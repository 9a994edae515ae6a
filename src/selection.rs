use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[allow(unused_imports)]
use log::{debug, error, info, warn};

use crate::dataset::DatasetIndex;
use crate::error::SelectionError;
use crate::frame_key::{FRAME_KEY_SCHEME_VERSION, FRAME_KEY_SEPARATOR};

/// Selected frame keys of the active dataset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    keys: HashSet<String>,
    last_viewed: Option<String>,
    dirty: bool, // Flag to track if we need to save
    /// The selection file holds entries this set does not represent (it was
    /// unreadable or listed frames missing from the dataset). Only an explicit
    /// save may overwrite it.
    guarded: bool,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_keys(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Returns true if the key was newly selected
    pub fn add(&mut self, key: &str) -> bool {
        let added = self.keys.insert(key.to_string());
        self.dirty |= added;
        added
    }

    /// Returns true if the key was selected before
    pub fn remove(&mut self, key: &str) -> bool {
        let removed = self.keys.remove(key);
        self.dirty |= removed;
        removed
    }

    /// Flip the selection state of a key, returning the new state
    pub fn toggle(&mut self, key: &str) -> bool {
        if self.remove(key) {
            false
        } else {
            self.add(key)
        }
    }

    pub fn clear(&mut self) {
        if !self.keys.is_empty() {
            self.keys.clear();
            self.dirty = true;
            debug!("Cleared selection");
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &HashSet<String> {
        &self.keys
    }

    pub fn sorted_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.keys.iter().cloned().collect();
        keys.sort();
        keys
    }

    pub fn last_viewed(&self) -> Option<&str> {
        self.last_viewed.as_deref()
    }

    /// Browsing position. Written with the selection but never makes it dirty.
    pub fn set_last_viewed(&mut self, key: Option<&str>) {
        self.last_viewed = key.map(str::to_string);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_guarded(&self) -> bool {
        self.guarded
    }

    fn mark_clean(&mut self) {
        self.dirty = false;
        self.guarded = false;
    }
}

/// On-disk object form of a selection file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default)]
    pub selected_files: Vec<String>,
    #[serde(default)]
    pub last_viewed: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredFormat {
    /// Old format: a bare list of selected keys
    Legacy(Vec<String>),
    Object(SelectionDocument),
}

/// A selection file as read from disk, before matching against a dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSelection {
    /// Frame key scheme version; 1 for legacy and untagged files
    pub version: u32,
    pub keys: Vec<String>,
    pub last_viewed: Option<String>,
}

impl StoredSelection {
    pub fn parse(content: &str, path: &Path) -> Result<Self, SelectionError> {
        let format: StoredFormat = serde_json::from_str(content).map_err(|e| SelectionError::Format {
            path: path.to_path_buf(),
            message: format!("expected a list or an object with a 'selected_files' list ({e})"),
        })?;

        Ok(match format {
            StoredFormat::Legacy(keys) => Self { version: 1, keys, last_viewed: None },
            StoredFormat::Object(doc) => Self {
                version: doc.version.unwrap_or(1),
                keys: doc.selected_files,
                last_viewed: doc.last_viewed,
            },
        })
    }

    pub fn read(path: &Path) -> Result<Self, SelectionError> {
        let content = std::fs::read_to_string(path).map_err(|source| SelectionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }
}

/// Result of matching a stored selection against the active dataset
#[derive(Debug, Clone, Default)]
pub struct SelectionLoad {
    pub selection: SelectionSet,
    pub path: PathBuf,
    pub stored: usize,
    pub matched: usize,
    pub migrated: usize,
    /// Human readable reason when the stored selection could not be used as is
    pub warning: Option<String>,
}

/// Reads and writes `selected_<dataset>.json` files in one directory
#[derive(Debug, Clone)]
pub struct SelectionStore {
    data_dir: PathBuf,
}

impl SelectionStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn path_for(&self, dataset_name: &str) -> PathBuf {
        self.data_dir.join(format!("selected_{}.json", sanitize_dataset_name(dataset_name)))
    }

    /// Load the selection for `dataset_name`, keeping only keys that exist in
    /// `index`. Never fails: unreadable files yield an empty selection and a warning.
    pub fn load(&self, dataset_name: &str, index: &DatasetIndex) -> SelectionLoad {
        let path = self.path_for(dataset_name);

        if !path.exists() {
            debug!("No existing selection file for dataset: {}", dataset_name);
            return SelectionLoad { path, ..SelectionLoad::default() };
        }

        let stored = match StoredSelection::read(&path) {
            Ok(stored) => stored,
            Err(e) => {
                error!("Could not load or parse selection file: {e}. Starting with empty selection.");
                return SelectionLoad {
                    path,
                    selection: SelectionSet { guarded: true, ..SelectionSet::default() },
                    warning: Some(e.to_string()),
                    ..SelectionLoad::default()
                };
            }
        };

        let mut load = reconcile(&stored, index);
        load.path = path;
        info!("Loaded {} selections for dataset: {}", load.matched, dataset_name);
        load
    }

    /// Write the selection in the current object format with sorted keys
    pub fn save(&self, dataset_name: &str, selection: &mut SelectionSet) -> Result<PathBuf, SelectionError> {
        let path = self.path_for(dataset_name);
        std::fs::create_dir_all(&self.data_dir).map_err(|source| SelectionError::Io {
            path: self.data_dir.clone(),
            source,
        })?;

        let document = SelectionDocument {
            version: Some(FRAME_KEY_SCHEME_VERSION),
            selected_files: selection.sorted_keys(),
            last_viewed: selection.last_viewed.clone(),
        };
        let json_str = serde_json::to_string_pretty(&document).map_err(|e| SelectionError::Format {
            path: path.clone(),
            message: e.to_string(),
        })?;

        std::fs::write(&path, json_str).map_err(|source| SelectionError::Io {
            path: path.clone(),
            source,
        })?;
        selection.mark_clean();
        info!("Saved {} selections to: {}", selection.len(), path.display());
        Ok(path)
    }
}

/// Intersect stored keys with the dataset, migrating file-name-only keys of
/// older files when they identify exactly one video frame
pub fn reconcile(stored: &StoredSelection, index: &DatasetIndex) -> SelectionLoad {
    let needs_migration = stored.version < FRAME_KEY_SCHEME_VERSION && index.is_video_dataset();
    let resolve = |key: &str| -> Option<(String, bool)> {
        if index.contains(key) {
            return Some((key.to_string(), false));
        }
        if needs_migration && !key.contains(FRAME_KEY_SEPARATOR) {
            match index.keys_for_file_name(key).as_slice() {
                [only] => return Some((only.to_string(), true)),
                [] => {}
                many => warn!("Dropping ambiguous selection '{}' ({} videos contain it)", key, many.len()),
            }
        }
        None
    };

    let mut keys = HashSet::new();
    let mut migrated = 0;
    for key in &stored.keys {
        if let Some((resolved, was_migrated)) = resolve(key) {
            if keys.insert(resolved) && was_migrated {
                migrated += 1;
            }
        }
    }

    let stored_count = stored.keys.iter().collect::<HashSet<_>>().len();
    let warning = if stored_count > 0 && keys.is_empty() {
        let message = format!(
            "None of the {} stored selections match the current dataset: {}",
            stored_count,
            index.name()
        );
        warn!("{message}");
        Some(message)
    } else {
        None
    };

    let matched = keys.len();
    let mut selection = SelectionSet::from_keys(keys);
    selection.guarded = matched < stored_count;
    selection.last_viewed = stored.last_viewed.as_deref().and_then(resolve).map(|(key, _)| key);

    SelectionLoad {
        selection,
        path: PathBuf::new(),
        stored: stored_count,
        matched,
        migrated,
        warning,
    }
}

/// Lower-case and replace whitespace runs with underscores
pub fn sanitize_dataset_name(name: &str) -> String {
    whitespace_runs().replace_all(name.trim(), "_").to_lowercase()
}

fn whitespace_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}
