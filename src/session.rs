/// Session context: the active dataset, its selection and browse cursor
///
/// Everything the controller needs lives here and is passed explicitly;
/// queries go through the active `DatasetIndex` and never touch globals.
/// A dataset switch is requested, runs on the loader thread and is applied in
/// one step when it completes. Until then, and whenever it fails, the
/// previously active dataset stays usable.
use std::path::PathBuf;
use std::sync::Arc;
use image::RgbImage;

#[allow(unused_imports)]
use log::{debug, error, info, warn};

use crate::config::{normalize_dataset_name, DatasetCatalog};
use crate::dataset::{DatasetIndex, Frame, LoadReport};
use crate::error::{LoadError, QueryError, SelectionError};
use crate::loader::{DatasetLoader, LoadOutcome};
use crate::render::{OverlayRenderer, RenderedFrame, SegmentRenderer, Visualizer};
use crate::selection::{SelectionSet, SelectionStore};
use crate::settings::UserSettings;
use crate::stats::{self, HistogramComparison, LabelStats};

/// The loaded dataset and the user's state on it
pub struct ActiveDataset {
    name: String,
    index: Arc<DatasetIndex>,
    report: LoadReport,
    selection: SelectionSet,
    cursor: Option<usize>,
}

impl ActiveDataset {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> &Arc<DatasetIndex> {
        &self.index
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }
}

/// Summary of an applied dataset switch
#[derive(Debug, Clone)]
pub struct SwitchOutcome {
    pub name: String,
    pub report: LoadReport,
    /// Selections restored from the dataset's selection file
    pub restored: usize,
    pub migrated: usize,
    pub warning: Option<String>,
}

pub struct Session<R: SegmentRenderer = OverlayRenderer> {
    catalog: DatasetCatalog,
    settings: UserSettings,
    store: SelectionStore,
    active: Option<ActiveDataset>,
    visualizer: Visualizer<R>,
    loader: DatasetLoader,
}

impl Session<OverlayRenderer> {
    pub fn new(catalog: DatasetCatalog, settings: UserSettings) -> Self {
        let renderer = OverlayRenderer::new(settings.overlay_alpha);
        Self::with_renderer(catalog, settings, renderer)
    }
}

impl<R: SegmentRenderer> Session<R> {
    pub fn with_renderer(catalog: DatasetCatalog, settings: UserSettings, renderer: R) -> Self {
        let store = SelectionStore::new(settings.selection_dir.clone());
        Self {
            catalog,
            settings,
            store,
            active: None,
            visualizer: Visualizer::new(renderer),
            loader: DatasetLoader::new(),
        }
    }

    pub fn catalog(&self) -> &DatasetCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &UserSettings {
        &self.settings
    }

    pub fn selection_store(&self) -> &SelectionStore {
        &self.store
    }

    pub fn active(&self) -> Option<&ActiveDataset> {
        self.active.as_ref()
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.name.as_str())
    }

    pub fn index(&self) -> Option<&DatasetIndex> {
        self.active.as_ref().map(|a| a.index.as_ref())
    }

    /// Name of the dataset being loaded, if a switch is in flight
    pub fn loading(&self) -> Option<&str> {
        self.loader.loading()
    }

    // ---- dataset switching ----

    /// Start loading `name` in the background.
    ///
    /// Rejected while another load is running, for names missing from the
    /// catalog, and for the dataset that is already active.
    pub fn request_switch(&mut self, name: &str) -> Result<(), LoadError> {
        if let Some(loading) = self.loader.loading() {
            return Err(LoadError::Busy { loading: loading.to_string() });
        }

        let name = normalize_dataset_name(name);
        let config = self
            .catalog
            .get(&name)
            .map_err(|_| LoadError::UnknownDataset(name.clone()))?
            .clone();
        if self.active_name() == Some(name.as_str()) {
            return Err(LoadError::AlreadyActive(name));
        }

        info!("Switching to dataset: {}", name);
        self.loader.start(&name, config, self.settings.clone())
    }

    /// Apply a finished load, if there is one, without blocking
    pub fn poll(&mut self) -> Option<Result<SwitchOutcome, LoadError>> {
        let (name, outcome) = self.loader.try_finish()?;
        Some(self.apply(name, outcome))
    }

    /// Wait for the in-flight load and apply it. Returns None when idle.
    pub async fn wait_for_load(&mut self) -> Option<Result<SwitchOutcome, LoadError>> {
        let (name, outcome) = self.loader.wait().await?;
        Some(self.apply(name, outcome))
    }

    /// Request a switch and wait for it
    pub async fn switch_to(&mut self, name: &str) -> Result<SwitchOutcome, LoadError> {
        self.request_switch(name)?;
        match self.wait_for_load().await {
            Some(result) => result,
            None => Err(LoadError::WorkerLost(name.to_string())),
        }
    }

    fn apply(&mut self, name: String, outcome: LoadOutcome) -> Result<SwitchOutcome, LoadError> {
        let (index, report) = match outcome {
            Ok(loaded) => loaded,
            Err(e) => {
                error!("Failed to load dataset '{}': {}", name, e);
                if let Some(active) = &self.active {
                    info!("Keeping dataset '{}' active", active.name);
                }
                return Err(e);
            }
        };

        self.save_if_dirty();

        let load = self.store.load(&name, &index);
        let selection = load.selection;
        let cursor = selection
            .last_viewed()
            .and_then(|key| index.position(key))
            .or_else(|| (!index.is_empty()).then_some(0));

        self.visualizer.invalidate();
        self.active = Some(ActiveDataset {
            name: name.clone(),
            index: Arc::new(index),
            report: report.clone(),
            selection,
            cursor,
        });
        info!("Dataset '{}' is now active", name);

        Ok(SwitchOutcome {
            name,
            report,
            restored: load.matched,
            migrated: load.migrated,
            warning: load.warning,
        })
    }

    fn save_if_dirty(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if !active.selection.is_dirty() {
            return;
        }
        if active.selection.is_guarded() {
            warn!(
                "Not overwriting {}: it has entries the loaded selection does not. Save explicitly to replace it.",
                self.store.path_for(&active.name).display()
            );
            return;
        }
        if let Err(e) = self.store.save(&active.name, &mut active.selection) {
            error!("Failed to save selection for '{}': {}", active.name, e);
        }
    }

    // ---- selection ----

    fn active_ref(&self) -> Result<&ActiveDataset, QueryError> {
        self.active.as_ref().ok_or(QueryError::NoActiveDataset)
    }

    /// Active dataset, after checking that `key` is one of its frames
    fn active_for_key(&mut self, key: &str) -> Result<&mut ActiveDataset, QueryError> {
        let active = self.active.as_mut().ok_or(QueryError::NoActiveDataset)?;
        if !active.index.contains(key) {
            return Err(QueryError::NotFound { key: key.to_string() });
        }
        Ok(active)
    }

    pub fn select(&mut self, key: &str) -> Result<bool, QueryError> {
        Ok(self.active_for_key(key)?.selection.add(key))
    }

    pub fn deselect(&mut self, key: &str) -> Result<bool, QueryError> {
        Ok(self.active_for_key(key)?.selection.remove(key))
    }

    /// Returns the new selection state of `key`
    pub fn toggle(&mut self, key: &str) -> Result<bool, QueryError> {
        Ok(self.active_for_key(key)?.selection.toggle(key))
    }

    pub fn clear_selection(&mut self) -> Result<(), QueryError> {
        self.active.as_mut().ok_or(QueryError::NoActiveDataset)?.selection.clear();
        Ok(())
    }

    pub fn is_selected(&self, key: &str) -> bool {
        self.active.as_ref().is_some_and(|a| a.selection.contains(key))
    }

    /// Select the current frame and move to the next visible one.
    /// In video datasets that is the first visible frame of the next video.
    pub fn select_current_and_advance(&mut self, high_coverage_only: bool) -> Result<Option<&str>, QueryError> {
        let key = self.require_current_key()?;
        self.select(&key)?;
        self.advance(high_coverage_only)
    }

    pub fn deselect_current_and_advance(&mut self, high_coverage_only: bool) -> Result<Option<&str>, QueryError> {
        let key = self.require_current_key()?;
        self.deselect(&key)?;
        self.advance(high_coverage_only)
    }

    /// Write the active selection to its selection file, replacing whatever
    /// it held before
    pub fn save_selection(&mut self) -> Result<Option<PathBuf>, SelectionError> {
        match self.active.as_mut() {
            Some(active) => self.store.save(&active.name, &mut active.selection).map(Some),
            None => Ok(None),
        }
    }

    pub fn current_stats(&self) -> Result<LabelStats, QueryError> {
        let active = self.active_ref()?;
        Ok(stats::current_stats(&active.index, active.selection.keys()))
    }

    pub fn histograms(&self) -> Result<HistogramComparison, QueryError> {
        let active = self.active_ref()?;
        Ok(stats::compare_histograms(&active.index, active.selection.keys()))
    }

    // ---- navigation ----

    pub fn current_key(&self) -> Option<&str> {
        let active = self.active.as_ref()?;
        active.index.frame_at(active.cursor?).map(|f| f.key.as_str())
    }

    fn require_current_key(&self) -> Result<String, QueryError> {
        let active = self.active_ref()?;
        self.current_key()
            .map(str::to_string)
            .ok_or_else(|| QueryError::EmptyDataset(active.name.clone()))
    }

    /// Move to the next frame, or the next high-coverage frame when
    /// `high_coverage_only` is set. Wraps around at the end of the dataset;
    /// returns None and stays put when no frame passes the filter.
    pub fn next(&mut self, high_coverage_only: bool) -> Option<&str> {
        self.step(true, high_coverage_only)
    }

    pub fn previous(&mut self, high_coverage_only: bool) -> Option<&str> {
        self.step(false, high_coverage_only)
    }

    fn step(&mut self, forward: bool, high_coverage_only: bool) -> Option<&str> {
        let threshold = self.settings.high_coverage_threshold;
        let active = self.active.as_ref()?;
        let current = active.cursor?;

        let visible = |frame: &Frame| !high_coverage_only || frame.coverage > threshold;
        let target = wrapped_search(&active.index, current, forward, visible)?;
        self.move_cursor(target)
    }

    /// Cursor target after marking the current frame: the first visible frame
    /// of a later video, else the next visible frame, else the current one
    fn advance(&mut self, high_coverage_only: bool) -> Result<Option<&str>, QueryError> {
        let threshold = self.settings.high_coverage_threshold;
        let active = self.active.as_ref().ok_or(QueryError::NoActiveDataset)?;
        let Some(current) = active.cursor else {
            return Ok(None);
        };
        let index = &active.index;
        let visible = |frame: &Frame| !high_coverage_only || frame.coverage > threshold;

        let in_next_video = index
            .frame_at(current)
            .and_then(|frame| frame.video_id.as_deref())
            .and_then(|video_id| {
                index
                    .videos()
                    .into_iter()
                    .skip_while(|(id, _)| *id != video_id)
                    .skip(1)
                    .flat_map(|(_, keys)| keys)
                    .find(|key| index.frame(key).is_ok_and(visible))
                    .and_then(|key| index.position(key))
            });
        let target = in_next_video
            .or_else(|| wrapped_search(index, current, true, visible))
            .unwrap_or(current);
        Ok(self.move_cursor(target))
    }

    fn move_cursor(&mut self, target: usize) -> Option<&str> {
        let active = self.active.as_mut()?;
        active.cursor = Some(target);
        let key = active.index.frame_at(target).map(|f| f.key.as_str());
        active.selection.set_last_viewed(key);
        self.current_key()
    }

    pub fn jump_to(&mut self, key: &str) -> Result<(), QueryError> {
        let active = self.active_for_key(key)?;
        active.cursor = active.index.position(key);
        active.selection.set_last_viewed(Some(key));
        Ok(())
    }

    // ---- rendering ----

    pub fn render(&mut self, key: &str) -> Result<RenderedFrame, QueryError> {
        let index = Arc::clone(&self.active_ref()?.index);
        self.visualizer.render(&index, key)
    }

    pub fn render_current(&mut self) -> Result<RenderedFrame, QueryError> {
        let key = self.require_current_key()?;
        self.render(&key)
    }

    pub fn render_segment(&self, key: &str, segment_index: usize) -> Result<RgbImage, QueryError> {
        self.active_ref()?;
        self.visualizer.render_segment(key, segment_index)
    }
}

/// First position after `current` (before it when going backwards) whose frame
/// is `visible`, wrapping around the dataset. `current` itself is checked last.
fn wrapped_search(
    index: &DatasetIndex,
    current: usize,
    forward: bool,
    visible: impl Fn(&Frame) -> bool,
) -> Option<usize> {
    let len = index.len();
    (1..=len)
        .map(|step| if forward { (current + step) % len } else { (current + len - step) % len })
        .find(|&pos| index.frame_at(pos).is_some_and(&visible))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatasetConfig;
    use crate::test_support::{write_dataset, FixtureFrame};
    use std::path::Path;

    struct Fixture {
        _dir: tempfile::TempDir,
        session: Session,
    }

    fn dataset(root: &Path) -> DatasetConfig {
        std::fs::create_dir_all(root).unwrap();
        write_dataset(root, &[
            FixtureFrame::image("a.png").segment(1, 1, 16),
            FixtureFrame::image("b.png").segment(1, 3, 4),
            FixtureFrame::image("c.png").segment(1, 1, 8).segment(2, 7, 8),
        ])
    }

    /// vidB/0001.png covers 25%, every other frame 100%
    fn video_dataset(root: &Path) -> DatasetConfig {
        std::fs::create_dir_all(root).unwrap();
        write_dataset(root, &[
            FixtureFrame::video("vidA", "0001.png").segment(1, 1, 16),
            FixtureFrame::video("vidA", "0002.png").segment(1, 1, 16),
            FixtureFrame::video("vidB", "0001.png").segment(1, 3, 4),
            FixtureFrame::video("vidB", "0002.png").segment(1, 1, 16),
            FixtureFrame::video("vidC", "0001.png").segment(1, 1, 16),
        ])
    }

    fn empty_dataset(root: &Path) -> DatasetConfig {
        std::fs::create_dir_all(root).unwrap();
        write_dataset(root, &[])
    }

    fn write_selection_file(session: &Session, dataset: &str, content: &str) -> PathBuf {
        let path = session.selection_store().path_for(dataset);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let broken = DatasetConfig {
            image_dir: dir.path().join("nowhere"),
            annotation_file: dir.path().join("nowhere.json"),
            mask_dir: dir.path().join("nowhere"),
        };
        let catalog = DatasetCatalog::from_entries([
            ("One".to_string(), dataset(&dir.path().join("one"))),
            ("two".to_string(), dataset(&dir.path().join("two"))),
            ("videos".to_string(), video_dataset(&dir.path().join("videos"))),
            ("empty".to_string(), empty_dataset(&dir.path().join("empty"))),
            ("broken".to_string(), broken),
        ]);
        let settings = UserSettings {
            selection_dir: dir.path().join("selections"),
            ..UserSettings::default()
        };
        Fixture { session: Session::new(catalog, settings), _dir: dir }
    }

    #[tokio::test]
    async fn test_switch_activates_dataset_and_positions_cursor() {
        let mut fx = fixture();
        let outcome = fx.session.switch_to("ONE").await.unwrap();

        assert_eq!(outcome.name, "one");
        assert_eq!(outcome.report.frames_loaded, 3);
        assert_eq!(fx.session.active_name(), Some("one"));
        assert_eq!(fx.session.current_key(), Some("a.png"));
        assert!(fx.session.loading().is_none());
    }

    #[tokio::test]
    async fn test_switch_rejections() {
        let mut fx = fixture();
        assert!(matches!(fx.session.request_switch("missing"), Err(LoadError::UnknownDataset(_))));

        fx.session.request_switch("one").unwrap();
        assert!(matches!(
            fx.session.request_switch("two"),
            Err(LoadError::Busy { ref loading }) if loading == "one"
        ));
        fx.session.wait_for_load().await.unwrap().unwrap();

        assert!(matches!(fx.session.request_switch("one"), Err(LoadError::AlreadyActive(_))));
    }

    #[tokio::test]
    async fn test_failed_switch_keeps_previous_dataset() {
        let mut fx = fixture();
        fx.session.switch_to("one").await.unwrap();
        fx.session.select("b.png").unwrap();

        let err = fx.session.switch_to("broken").await.unwrap_err();
        assert!(matches!(err, LoadError::Failed(_)));
        assert_eq!(fx.session.active_name(), Some("one"));
        assert!(fx.session.is_selected("b.png"));
    }

    #[tokio::test]
    async fn test_selection_round_trips_across_switches() {
        let mut fx = fixture();
        fx.session.switch_to("one").await.unwrap();
        fx.session.select("a.png").unwrap();
        assert!(fx.session.toggle("c.png").unwrap());
        fx.session.jump_to("c.png").unwrap();

        // Unsaved changes of the previous dataset are written on switch
        fx.session.switch_to("two").await.unwrap();
        assert!(!fx.session.is_selected("a.png"));

        let outcome = fx.session.switch_to("one").await.unwrap();
        assert_eq!(outcome.restored, 2);
        assert!(fx.session.is_selected("a.png"));
        assert!(fx.session.is_selected("c.png"));
        assert_eq!(fx.session.current_key(), Some("c.png"));
    }

    #[tokio::test]
    async fn test_selection_ops_validate_keys() {
        let mut fx = fixture();
        assert!(matches!(fx.session.select("a.png"), Err(QueryError::NoActiveDataset)));

        fx.session.switch_to("one").await.unwrap();
        assert!(matches!(fx.session.select("zzz.png"), Err(QueryError::NotFound { .. })));
        assert!(matches!(fx.session.deselect("zzz.png"), Err(QueryError::NotFound { .. })));

        for key in ["a.png", "b.png", "c.png"] {
            fx.session.select(key).unwrap();
        }
        let goal = fx.session.index().unwrap().goal_stats().clone();
        assert_eq!(fx.session.current_stats().unwrap(), goal);

        fx.session.clear_selection().unwrap();
        let empty = fx.session.current_stats().unwrap();
        assert_eq!(empty.labels, goal.labels);
        assert!(empty.freqs.iter().all(|&f| f == 0));
        assert_eq!(fx.session.histograms().unwrap().selected_mask_counts.total(), 0);
    }

    #[tokio::test]
    async fn test_navigation_with_coverage_filter() {
        let mut fx = fixture();
        fx.session.switch_to("one").await.unwrap();

        // b.png covers 25% and is skipped by the filter
        assert_eq!(fx.session.next(true), Some("c.png"));
        assert_eq!(fx.session.next(true), Some("a.png"));
        assert_eq!(fx.session.previous(false), Some("c.png"));
        assert_eq!(fx.session.previous(false), Some("b.png"));
        assert_eq!(fx.session.previous(false), Some("a.png"));

        assert!(fx.session.jump_to("nope.png").is_err());
        assert_eq!(fx.session.active().unwrap().selection().last_viewed(), Some("a.png"));
    }

    #[tokio::test]
    async fn test_marking_advances_to_next_visible_frame() {
        let mut fx = fixture();
        fx.session.switch_to("one").await.unwrap();

        assert_eq!(fx.session.select_current_and_advance(true).unwrap(), Some("c.png"));
        assert_eq!(fx.session.deselect_current_and_advance(false).unwrap(), Some("a.png"));
        assert!(fx.session.is_selected("a.png"));
        assert!(!fx.session.is_selected("c.png"));
    }

    #[tokio::test]
    async fn test_marking_in_video_dataset_jumps_to_next_video() {
        let mut fx = fixture();
        fx.session.switch_to("videos").await.unwrap();
        assert_eq!(fx.session.current_key(), Some("vidA/0001.png"));

        // vidA/0002.png is skipped, and the filter also skips vidB/0001.png
        assert_eq!(fx.session.select_current_and_advance(true).unwrap(), Some("vidB/0002.png"));
        assert_eq!(fx.session.deselect_current_and_advance(false).unwrap(), Some("vidC/0001.png"));
        // No later video: fall back to the next frame, wrapping around
        assert_eq!(fx.session.select_current_and_advance(false).unwrap(), Some("vidA/0001.png"));

        let selected = fx.session.active().unwrap().selection().sorted_keys();
        assert_eq!(selected, vec!["vidA/0001.png", "vidC/0001.png"]);
    }

    #[tokio::test]
    async fn test_previous_dataset_stays_usable_while_loading() {
        let mut fx = fixture();
        fx.session.switch_to("one").await.unwrap();

        fx.session.request_switch("two").unwrap();
        assert_eq!(fx.session.loading(), Some("two"));
        assert_eq!(fx.session.index().unwrap().name(), "one");
        assert!(fx.session.select("b.png").unwrap());
        assert_eq!(fx.session.current_stats().unwrap().total_segments(), 1);
        assert!(fx.session.render("a.png").is_ok());

        fx.session.wait_for_load().await.unwrap().unwrap();
        assert_eq!(fx.session.active_name(), Some("two"));
        fx.session.switch_to("one").await.unwrap();
        assert!(fx.session.is_selected("b.png"));
    }

    #[tokio::test]
    async fn test_unreadable_selection_file_is_not_overwritten_on_switch() {
        let mut fx = fixture();
        let original = r#"{"selected_files": ["a.png", "old/x.png",], "last_viewed": "a.png"}"#;
        let path = write_selection_file(&fx.session, "one", original);

        let outcome = fx.session.switch_to("one").await.unwrap();
        assert!(outcome.warning.is_some());
        fx.session.next(false);
        fx.session.select("c.png").unwrap();
        fx.session.switch_to("two").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);

        // An explicit save replaces the file
        fx.session.switch_to("one").await.unwrap();
        fx.session.select("c.png").unwrap();
        assert_eq!(fx.session.save_selection().unwrap(), Some(path.clone()));
        let saved = crate::selection::StoredSelection::read(&path).unwrap();
        assert_eq!(saved.keys, vec!["c.png"]);
    }

    #[tokio::test]
    async fn test_partially_matched_selection_file_keeps_stale_entries() {
        let mut fx = fixture();
        let original = r#"{"version": 2, "selected_files": ["a.png", "gone.png"]}"#;
        let path = write_selection_file(&fx.session, "one", original);

        let outcome = fx.session.switch_to("one").await.unwrap();
        assert_eq!(outcome.restored, 1);
        fx.session.select("c.png").unwrap();
        fx.session.switch_to("two").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    }

    #[tokio::test]
    async fn test_browsing_alone_does_not_write_selection_file() {
        let mut fx = fixture();
        fx.session.switch_to("one").await.unwrap();
        fx.session.next(false);
        fx.session.switch_to("two").await.unwrap();
        assert!(!fx.session.selection_store().path_for("one").exists());
    }

    #[tokio::test]
    async fn test_empty_dataset_has_no_current_frame() {
        let mut fx = fixture();
        fx.session.switch_to("empty").await.unwrap();
        assert!(fx.session.current_key().is_none());
        assert_eq!(fx.session.next(false), None);
        assert!(matches!(fx.session.render_current(), Err(QueryError::EmptyDataset(ref name)) if name == "empty"));
        assert!(matches!(
            fx.session.select_current_and_advance(false),
            Err(QueryError::EmptyDataset(_))
        ));
    }

    #[tokio::test]
    async fn test_render_cache_is_dropped_on_switch() {
        let mut fx = fixture();
        fx.session.switch_to("one").await.unwrap();
        let rendered = fx.session.render_current().unwrap();
        assert_eq!(rendered.labels.last().map(String::as_str), Some("Coverage: 100.00%"));
        assert!(fx.session.render_segment("a.png", 0).is_ok());

        fx.session.switch_to("two").await.unwrap();
        assert!(matches!(
            fx.session.render_segment("a.png", 0),
            Err(QueryError::NotRegistered { .. })
        ));
    }
}
