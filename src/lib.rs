//! Browse, curate and export panoptic segmentation datasets.
//!
//! A dataset (COCO panoptic style annotations, image files and RGB-encoded
//! id masks) is ingested into a [`dataset::DatasetIndex`]. Selections of
//! frames are compared against the whole dataset through label frequency,
//! label area and histogram queries, persisted per dataset, and exported as
//! image / overlay / label bundles.

pub mod build_info;
pub mod config;
pub mod dataset;
pub mod error;
pub mod export;
pub mod frame_key;
pub mod ingest;
pub mod loader;
pub mod logging;
pub mod mask;
pub mod panoptic_parser;
pub mod render;
pub mod selection;
pub mod session;
pub mod settings;
pub mod stats;

#[cfg(test)]
mod test_support;

pub use dataset::{DatasetIndex, Frame, LoadReport};
pub use error::{ConfigError, ExportError, LoadError, QueryError, SelectionError};
pub use session::Session;
