/// Batch export of selection files
///
/// For every frame listed in `selected_<dataset>.json` a directory is written
/// under `<export_dir>/<dataset>/` holding a copy of the original image, the
/// rendered overlay and the segment labels. Frames that cannot be exported are
/// skipped and listed in the report.
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[allow(unused_imports)]
use log::{debug, error, info, warn};

use crate::config::{normalize_dataset_name, DatasetCatalog};
use crate::dataset::{file_stem, DatasetIndex};
use crate::error::{ConfigError, ExportError};
use crate::frame_key::natural_cmp;
use crate::ingest;
use crate::render::{SegmentRenderer, Visualizer};
use crate::selection::{reconcile, sanitize_dataset_name, StoredSelection};
use crate::settings::UserSettings;

const SELECTION_FILE_PREFIX: &str = "selected_";
const SELECTION_FILE_SUFFIX: &str = ".json";

#[derive(Debug, Clone, Default)]
pub struct ExportReport {
    pub dataset: String,
    pub output_dir: PathBuf,
    pub exported: usize,
    /// `(frame key, reason)` for every frame that was not exported
    pub skipped: Vec<(String, String)>,
}

/// Dataset name encoded in a `selected_<dataset>.json` file name
pub fn dataset_name_from_selection_file(path: &Path) -> Result<String, ExportError> {
    let base_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ExportError::InvalidFileName(path.display().to_string()))?;

    base_name
        .strip_prefix(SELECTION_FILE_PREFIX)
        .and_then(|rest| rest.strip_suffix(SELECTION_FILE_SUFFIX))
        .filter(|name| !name.is_empty())
        .map(normalize_dataset_name)
        .ok_or_else(|| ExportError::InvalidFileName(base_name.to_string()))
}

/// Catalog name of the dataset a selection file belongs to.
///
/// Selection files carry the sanitized dataset name (`VIP Seg` is stored as
/// `selected_vip_seg.json`), so a name that is not in the catalog as is gets
/// matched against the sanitized catalog names.
pub fn resolve_dataset_name(catalog: &DatasetCatalog, file_dataset: &str) -> Result<String, ConfigError> {
    if catalog.get(file_dataset).is_ok() {
        return Ok(normalize_dataset_name(file_dataset));
    }
    let wanted = sanitize_dataset_name(file_dataset);
    catalog
        .names()
        .find(|name| sanitize_dataset_name(name) == wanted)
        .map(str::to_string)
        .ok_or_else(|| ConfigError::UnknownDataset(file_dataset.to_string()))
}

/// All `selected_*.json` files in `dir`, in natural order
pub fn find_selection_files(dir: &Path) -> Result<Vec<PathBuf>, ExportError> {
    let entries = fs::read_dir(dir).map_err(|source| ExportError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(SELECTION_FILE_PREFIX) && n.ends_with(SELECTION_FILE_SUFFIX))
        })
        .collect();
    files.sort_by(|a, b| natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()));
    Ok(files)
}

/// Export directory name of a frame: its stem, prefixed by the video id in
/// video datasets so equal file names from different videos stay apart
pub fn output_dir_name(video_id: Option<&str>, file_name: &str) -> String {
    match video_id {
        Some(video_id) => format!("{}_{}", video_id, file_stem(file_name)),
        None => file_stem(file_name).to_string(),
    }
}

pub fn export_selection_file<R: SegmentRenderer>(
    selection_file: &Path,
    catalog: &DatasetCatalog,
    settings: &UserSettings,
    renderer: R,
) -> Result<ExportReport, ExportError> {
    info!("Processing: {}", selection_file.display());
    let start = Instant::now();

    let dataset_name = resolve_dataset_name(catalog, &dataset_name_from_selection_file(selection_file)?)?;
    let config = catalog.get(&dataset_name)?;
    let stored = StoredSelection::read(selection_file)?;
    if stored.keys.is_empty() {
        return Err(ExportError::EmptySelection(selection_file.to_path_buf()));
    }

    let (index, _) = ingest::load(&dataset_name, config, settings)?;
    let selection = reconcile(&stored, &index).selection;
    info!("Found {} files to export for '{}'", selection.len(), dataset_name);

    let output_dir = settings.export_dir.join(sanitize_dataset_name(&dataset_name));
    fs::create_dir_all(&output_dir).map_err(|source| ExportError::Io {
        path: output_dir.clone(),
        source,
    })?;

    let mut report = ExportReport {
        dataset: dataset_name.clone(),
        output_dir: output_dir.clone(),
        ..ExportReport::default()
    };

    let selected = selection.sorted_keys();
    for key in &stored.keys {
        if !index.contains(key) && !selection_covers(&index, &selected, key) {
            warn!("Skipping '{}': not part of dataset '{}'", key, dataset_name);
            report.skipped.push((key.clone(), "not found in dataset".to_string()));
        }
    }

    let mut visualizer = Visualizer::new(renderer);
    for key in selected {
        match export_frame(&mut visualizer, &index, &key, &output_dir) {
            Ok(dir) => {
                debug!("Exported '{}' to {}", key, dir.display());
                report.exported += 1;
            }
            Err(reason) => {
                warn!("Skipping '{}': {}", key, reason);
                report.skipped.push((key, reason));
            }
        }
    }

    info!(
        "Finished exporting {} items to '{}' in {:?} ({} skipped)",
        report.exported,
        output_dir.display(),
        start.elapsed(),
        report.skipped.len()
    );
    Ok(report)
}

/// Whether a stored file-name-only key was migrated to a selected frame key
fn selection_covers(index: &DatasetIndex, selected: &[String], stored_key: &str) -> bool {
    match index.keys_for_file_name(stored_key).as_slice() {
        [only] => selected.iter().any(|k| k == only),
        _ => false,
    }
}

/// Write `original.<ext>`, `overlay.png` and `labels.txt` for one frame
fn export_frame<R: SegmentRenderer>(
    visualizer: &mut Visualizer<R>,
    index: &DatasetIndex,
    key: &str,
    output_dir: &Path,
) -> Result<PathBuf, String> {
    let frame = index.frame(key).map_err(|e| e.to_string())?;
    let rendered = visualizer.render(index, key).map_err(|e| e.to_string())?;

    let item_dir = output_dir.join(output_dir_name(frame.video_id.as_deref(), &frame.file_name));
    fs::create_dir_all(&item_dir).map_err(|e| format!("cannot create {}: {e}", item_dir.display()))?;

    let image_path = index.image_path(key).map_err(|e| e.to_string())?;
    let original = item_dir.join(format!("original.{}", index.layout().image_extension));
    fs::copy(&image_path, &original)
        .map_err(|e| format!("original image {} not copied: {e}", image_path.display()))?;

    let overlay = item_dir.join("overlay.png");
    rendered
        .overlay
        .save(&overlay)
        .map_err(|e| format!("failed to save overlay to {}: {e}", overlay.display()))?;

    let labels = item_dir.join("labels.txt");
    fs::write(&labels, rendered.segment_labels().join("\n"))
        .map_err(|e| format!("failed to write {}: {e}", labels.display()))?;

    Ok(item_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::OverlayRenderer;
    use crate::selection::{SelectionSet, SelectionStore};
    use crate::test_support::{write_dataset, FixtureFrame};

    fn settings_in(root: &Path) -> UserSettings {
        UserSettings {
            selection_dir: root.join("selected_annotations"),
            export_dir: root.join("exports"),
            ..UserSettings::default()
        }
    }

    #[test]
    fn test_dataset_name_from_file_name() {
        assert_eq!(dataset_name_from_selection_file(Path::new("dir/selected_COCO.json")).unwrap(), "coco");
        assert!(matches!(
            dataset_name_from_selection_file(Path::new("coco.json")),
            Err(ExportError::InvalidFileName(_))
        ));
        assert!(dataset_name_from_selection_file(Path::new("selected_.json")).is_err());
    }

    #[test]
    fn test_output_dir_name_prefixes_video_id() {
        assert_eq!(output_dir_name(None, "0001.png"), "0001");
        assert_eq!(output_dir_name(Some("vidA"), "0001.png"), "vidA_0001");
    }

    #[test]
    fn test_export_writes_original_overlay_and_labels() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_dataset(&dir.path().join("data"), &[
            FixtureFrame::video("vidA", "0001.png").segment(1, 1, 4).segment(2, 3, 4),
            FixtureFrame::video("vidB", "0001.png").segment(1, 2, 4),
        ]);
        let catalog = DatasetCatalog::from_entries([("demo".to_string(), config)]);
        let settings = settings_in(dir.path());

        fs::create_dir_all(&settings.selection_dir).unwrap();
        let selection_file = settings.selection_dir.join("selected_demo.json");
        fs::write(&selection_file, r#"{"version": 2, "selected_files": ["vidA/0001.png", "vidB/0001.png", "vidC/9.png"], "last_viewed": null}"#).unwrap();

        let report = export_selection_file(&selection_file, &catalog, &settings, OverlayRenderer::default()).unwrap();
        assert_eq!(report.exported, 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, "vidC/9.png");

        let item = settings.export_dir.join("demo").join("vidA_0001");
        assert!(item.join("original.jpg").is_file());
        assert!(item.join("overlay.png").is_file());
        assert_eq!(fs::read_to_string(item.join("labels.txt")).unwrap(), "0: person\n1: sky");
        assert!(settings.export_dir.join("demo").join("vidB_0001").is_dir());
    }

    #[test]
    fn test_dataset_names_with_spaces_export_from_saved_selection() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_dataset(&dir.path().join("data"), &[FixtureFrame::image("a.png").segment(1, 1, 4)]);
        let catalog = DatasetCatalog::from_entries([("VIP Seg".to_string(), config)]);
        let settings = settings_in(dir.path());

        let store = SelectionStore::new(settings.selection_dir.clone());
        let mut selection = SelectionSet::from_keys(["a.png".to_string()]);
        let selection_file = store.save("VIP Seg", &mut selection).unwrap();
        assert!(selection_file.ends_with("selected_vip_seg.json"));

        assert_eq!(resolve_dataset_name(&catalog, "vip_seg").unwrap(), "vip seg");
        let report = export_selection_file(&selection_file, &catalog, &settings, OverlayRenderer::default()).unwrap();
        assert_eq!(report.dataset, "vip seg");
        assert_eq!(report.exported, 1);
        assert!(settings.export_dir.join("vip_seg").join("a").join("overlay.png").is_file());
    }

    #[test]
    fn test_frame_with_missing_media_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_dataset(&dir.path().join("data"), &[
            FixtureFrame::image("a.png").segment(1, 1, 4),
            FixtureFrame::image("b.png").segment(1, 1, 4),
        ]);
        let catalog = DatasetCatalog::from_entries([("demo".to_string(), config.clone())]);
        let settings = settings_in(dir.path());
        fs::create_dir_all(&settings.selection_dir).unwrap();
        let selection_file = settings.selection_dir.join("selected_demo.json");
        fs::write(&selection_file, r#"["a.png", "b.png"]"#).unwrap();

        // Removed after the selection was made: the load drops it
        fs::remove_file(config.image_dir.join("b.jpg")).unwrap();

        let report = export_selection_file(&selection_file, &catalog, &settings, OverlayRenderer::default()).unwrap();
        assert_eq!(report.exported, 1);
        assert_eq!(report.skipped, vec![("b.png".to_string(), "not found in dataset".to_string())]);
    }

    #[test]
    fn test_empty_selection_and_unknown_dataset_fail_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = DatasetCatalog::default();
        let settings = settings_in(dir.path());
        fs::create_dir_all(&settings.selection_dir).unwrap();

        let unknown = settings.selection_dir.join("selected_other.json");
        fs::write(&unknown, r#"["a.png"]"#).unwrap();
        assert!(matches!(
            export_selection_file(&unknown, &catalog, &settings, OverlayRenderer::default()),
            Err(ExportError::Config(_))
        ));

        let config = write_dataset(&dir.path().join("data"), &[FixtureFrame::image("a.png")]);
        let catalog = DatasetCatalog::from_entries([("empty".to_string(), config)]);
        let empty = settings.selection_dir.join("selected_empty.json");
        fs::write(&empty, r#"{"selected_files": []}"#).unwrap();
        assert!(matches!(
            export_selection_file(&empty, &catalog, &settings, OverlayRenderer::default()),
            Err(ExportError::EmptySelection(_))
        ));
    }

    #[test]
    fn test_find_selection_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["selected_b10.json", "selected_b2.json", "notes.json", "selected_x.txt"] {
            fs::write(dir.path().join(name), "[]").unwrap();
        }
        let names: Vec<String> = find_selection_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["selected_b2.json", "selected_b10.json"]);
    }
}
