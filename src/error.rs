/// Error types for dataset loading, index queries, selection files and export.
///
/// Loading is lenient (per-frame problems are counted in `LoadReport`, not
/// raised) so only unrecoverable conditions appear in `ConfigError`. Queries
/// are strict: an unknown key is always an error, never an empty answer.
use std::path::PathBuf;
use thiserror::Error;

/// Fatal-at-load failures. Nothing else can proceed for the dataset.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("No 'categories' found in annotation file '{0}'")]
    MissingCategories(PathBuf),
    #[error("Dataset '{0}' not found in config")]
    UnknownDataset(String),
}

/// Per-query failures surfaced by the index and the visualization adapter.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("No dataset is loaded")]
    NoActiveDataset,
    #[error("Dataset '{0}' has no frames")]
    EmptyDataset(String),
    #[error("Frame '{key}' not found in dataset")]
    NotFound { key: String },
    #[error("Render metadata for '{key}' not registered; render the full frame first")]
    NotRegistered { key: String },
    #[error("Invalid segment index {index} for '{key}' ({len} segments)")]
    SegmentOutOfRange { key: String, index: usize, len: usize },
    #[error("Failed to decode image {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// Problems reading or writing a selection file.
#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("Selection file I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Unsupported selection file format in {path}: {message}")]
    Format { path: PathBuf, message: String },
}

/// Rejections and failures reported by the background loader and the session.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("A dataset is already being loaded ('{loading}'). Please wait.")]
    Busy { loading: String },
    #[error("Dataset '{0}' not found in config")]
    UnknownDataset(String),
    #[error("Dataset '{0}' is already active")]
    AlreadyActive(String),
    #[error("Dataset load failed: {0}")]
    Failed(#[from] ConfigError),
    #[error("Dataset loader for '{0}' exited without reporting a result")]
    WorkerLost(String),
}

/// Failures that abort the export of a whole selection file.
///
/// Individual frames that cannot be exported are reported in `ExportReport`
/// instead.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Invalid selection file name '{0}'. Expected 'selected_<dataset>.json'")]
    InvalidFileName(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error("No files found in selection file: {0}")]
    EmptySelection(PathBuf),
    #[error("Failed to create export directory {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}
