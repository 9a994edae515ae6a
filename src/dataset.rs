/// In-memory index of one loaded panoptic dataset
///
/// Holds per-frame label data in browse order plus the dataset-wide ("goal")
/// aggregates. All aggregate vectors are indexed by the sorted label universe,
/// so lookups must always go through `label_position`, never by assuming two
/// datasets share a column order.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use serde::Serialize;

#[allow(unused_imports)]
use log::{debug, info, warn};

use crate::config::DatasetConfig;
use crate::error::QueryError;
use crate::frame_key::compare_frames;
use crate::panoptic_parser::{PanopticCategory, SchemaKind};
use crate::stats::LabelStats;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Category {
    pub id: u32,
    pub name: String,
    pub is_thing: bool,
}

impl From<&PanopticCategory> for Category {
    fn from(cat: &PanopticCategory) -> Self {
        Self {
            id: cat.id,
            name: cat.name.clone(),
            is_thing: cat.isthing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    /// Panoptic id of the segment's pixels in the mask
    pub id: u32,
    pub category_id: u32,
    pub area: u64,
    pub iscrowd: bool,
    pub bbox: Option<[f32; 4]>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub key: String,
    pub video_id: Option<String>,
    pub file_name: String,
    /// One category id per segment, in segment order
    pub labels: Vec<u32>,
    pub area_by_label: BTreeMap<u32, u64>,
    /// Percentage of non-background mask pixels, 0..=100
    pub coverage: f64,
    pub segments: Vec<Segment>,
}

impl Frame {
    pub fn mask_count(&self) -> usize {
        self.segments.len()
    }

    pub fn unique_label_count(&self) -> usize {
        self.labels.iter().collect::<BTreeSet<_>>().len()
    }
}

/// Where a dataset's images and masks live on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaLayout {
    pub image_dir: PathBuf,
    pub mask_dir: PathBuf,
    pub image_extension: String,
    pub mask_extension: String,
}

impl MediaLayout {
    pub fn new(config: &DatasetConfig, image_extension: &str, mask_extension: &str) -> Self {
        Self {
            image_dir: config.image_dir.clone(),
            mask_dir: config.mask_dir.clone(),
            image_extension: image_extension.to_string(),
            mask_extension: mask_extension.to_string(),
        }
    }

    /// `<image_dir>[/<video_id>]/<file_name without extension>.<image_extension>`
    pub fn image_path(&self, video_id: Option<&str>, file_name: &str) -> PathBuf {
        Self::resolve(&self.image_dir, video_id, file_name, &self.image_extension)
    }

    /// `<mask_dir>[/<video_id>]/<file_name without extension>.<mask_extension>`
    pub fn mask_path(&self, video_id: Option<&str>, file_name: &str) -> PathBuf {
        Self::resolve(&self.mask_dir, video_id, file_name, &self.mask_extension)
    }

    fn resolve(root: &Path, video_id: Option<&str>, file_name: &str, extension: &str) -> PathBuf {
        let dir = match video_id {
            Some(video_id) => root.join(video_id),
            None => root.to_path_buf(),
        };
        dir.join(format!("{}.{}", strip_extension(file_name), extension))
    }
}

/// `file_name` without its final extension. Directory components are kept,
/// so `train/a.png` becomes `train/a`.
pub fn strip_extension(file_name: &str) -> &str {
    let name_start = file_name
        .rfind(|c: char| c == '/' || c == '\\')
        .map_or(0, |i| i + 1);
    match file_name[name_start..].rfind('.') {
        Some(dot) if dot > 0 => &file_name[..name_start + dot],
        _ => file_name,
    }
}

/// Base name without its final extension
pub fn file_stem(file_name: &str) -> &str {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
}

/// Per-frame conditions skipped or tolerated during a load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub frames_loaded: usize,
    pub duplicates: usize,
    pub missing_files: usize,
    pub decode_failures: usize,
    pub skipped_videos: usize,
    pub empty_frames: usize,
    pub malformed_records: usize,
}

impl LoadReport {
    pub fn log_summary(&self, dataset_name: &str) {
        info!("{} dataset loaded: {} files processed.", dataset_name, self.frames_loaded);
        if self.duplicates > 0 {
            info!("Skipped {} duplicate entries.", self.duplicates);
        }
        if self.missing_files > 0 {
            warn!("Skipped {} entries due to missing image or mask files.", self.missing_files);
        }
        if self.decode_failures > 0 {
            warn!("Skipped {} entries whose mask could not be decoded.", self.decode_failures);
        }
        if self.skipped_videos > 0 {
            warn!("Skipped {} video records without id or frames.", self.skipped_videos);
        }
        if self.malformed_records > 0 {
            warn!("Skipped {} malformed frame records.", self.malformed_records);
        }
        if self.empty_frames > 0 {
            warn!("{} frames have no segments.", self.empty_frames);
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatasetIndex {
    name: String,
    schema: SchemaKind,
    layout: MediaLayout,
    categories: BTreeMap<u32, Category>,
    /// Browse order: natural by video id, then by file name
    frames: Vec<Frame>,
    positions: HashMap<String, usize>,
    label_positions: HashMap<u32, usize>,
    goal: LabelStats,
    goal_mask_counts: Vec<usize>,
    goal_unique_label_counts: Vec<usize>,
}

impl DatasetIndex {
    /// Build the index from already-ingested frames, sorting them into browse
    /// order and computing every goal aggregate once.
    pub fn from_frames(
        name: &str,
        schema: SchemaKind,
        layout: MediaLayout,
        categories: impl IntoIterator<Item = Category>,
        mut frames: Vec<Frame>,
    ) -> Self {
        frames.sort_by(|a, b| {
            compare_frames(
                (a.video_id.as_deref(), a.file_name.as_str()),
                (b.video_id.as_deref(), b.file_name.as_str()),
            )
        });

        let positions = frames
            .iter()
            .enumerate()
            .map(|(i, frame)| (frame.key.clone(), i))
            .collect();

        let all_labels: Vec<u32> = frames
            .iter()
            .flat_map(|frame| frame.labels.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let label_positions: HashMap<u32, usize> =
            all_labels.iter().enumerate().map(|(i, &label)| (label, i)).collect();

        let mut goal = LabelStats::zeroed(all_labels);
        for frame in &frames {
            goal.accumulate(frame, &label_positions);
        }

        let goal_mask_counts = frames.iter().map(Frame::mask_count).collect();
        let goal_unique_label_counts = frames.iter().map(Frame::unique_label_count).collect();

        Self {
            name: name.to_string(),
            schema,
            layout,
            categories: categories.into_iter().map(|c| (c.id, c)).collect(),
            frames,
            positions,
            label_positions,
            goal,
            goal_mask_counts,
            goal_unique_label_counts,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> SchemaKind {
        self.schema
    }

    pub fn is_video_dataset(&self) -> bool {
        self.schema == SchemaKind::Video
    }

    pub fn layout(&self) -> &MediaLayout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.positions.contains_key(key)
    }

    /// Frame keys in browse order
    pub fn frame_keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.frames.iter().map(|frame| frame.key.as_str())
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frame(&self, key: &str) -> Result<&Frame, QueryError> {
        self.positions
            .get(key)
            .map(|&i| &self.frames[i])
            .ok_or_else(|| QueryError::NotFound { key: key.to_string() })
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.positions.get(key).copied()
    }

    pub fn frame_at(&self, position: usize) -> Option<&Frame> {
        self.frames.get(position)
    }

    pub fn labels_for(&self, key: &str) -> Result<&[u32], QueryError> {
        Ok(&self.frame(key)?.labels)
    }

    pub fn segments_for(&self, key: &str) -> Result<&[Segment], QueryError> {
        Ok(&self.frame(key)?.segments)
    }

    pub fn coverage_for(&self, key: &str) -> Result<f64, QueryError> {
        Ok(self.frame(key)?.coverage)
    }

    pub fn image_path(&self, key: &str) -> Result<PathBuf, QueryError> {
        let frame = self.frame(key)?;
        Ok(self.layout.image_path(frame.video_id.as_deref(), &frame.file_name))
    }

    pub fn mask_path(&self, key: &str) -> Result<PathBuf, QueryError> {
        let frame = self.frame(key)?;
        Ok(self.layout.mask_path(frame.video_id.as_deref(), &frame.file_name))
    }

    pub fn category(&self, id: u32) -> Option<&Category> {
        self.categories.get(&id)
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> + '_ {
        self.categories.values()
    }

    pub fn category_name(&self, id: u32) -> String {
        self.categories
            .get(&id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| format!("unknown ({id})"))
    }

    /// Sorted ascending union of every label observed in the dataset
    pub fn label_universe(&self) -> &[u32] {
        &self.goal.labels
    }

    pub fn label_position(&self, label: u32) -> Option<usize> {
        self.label_positions.get(&label).copied()
    }

    pub(crate) fn label_positions(&self) -> &HashMap<u32, usize> {
        &self.label_positions
    }

    /// Per-label frequency and area over every frame
    pub fn goal_stats(&self) -> &LabelStats {
        &self.goal
    }

    /// `(mask_count per frame, unique_label_count per frame)` in browse order
    pub fn goal_histograms(&self) -> (&[usize], &[usize]) {
        (&self.goal_mask_counts, &self.goal_unique_label_counts)
    }

    /// Keys whose coverage is strictly above `threshold`, in browse order
    pub fn frames_with_min_coverage(&self, threshold: f64) -> Vec<&str> {
        self.frames
            .iter()
            .filter(|frame| frame.coverage > threshold)
            .map(|frame| frame.key.as_str())
            .collect()
    }

    /// Frames grouped by video in browse order; empty for image datasets
    pub fn videos(&self) -> Vec<(&str, Vec<&str>)> {
        let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
        for frame in &self.frames {
            let Some(video_id) = frame.video_id.as_deref() else {
                continue;
            };
            match groups.last_mut() {
                Some((current, keys)) if *current == video_id => keys.push(&frame.key),
                _ => groups.push((video_id, vec![frame.key.as_str()])),
            }
        }
        groups
    }

    /// Keys of every frame with the given file name (across videos)
    pub fn keys_for_file_name(&self, file_name: &str) -> Vec<&str> {
        self.frames
            .iter()
            .filter(|frame| frame.file_name == file_name)
            .map(|frame| frame.key.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{frame, index_of, video_frame};

    #[test]
    fn test_goal_vectors_align_with_label_universe() {
        let index = index_of(vec![
            frame("b.png", &[(7, 10), (1, 5), (7, 2)]),
            frame("a.png", &[(3, 1)]),
        ]);

        let goal = index.goal_stats();
        assert_eq!(goal.labels, vec![1, 3, 7]);
        assert_eq!(goal.freqs, vec![1, 1, 2]);
        assert_eq!(goal.areas, vec![5, 1, 12]);
        assert_eq!(goal.freqs.len(), goal.labels.len());
        assert_eq!(goal.areas.len(), goal.labels.len());
        assert_eq!(index.label_position(7), Some(2));
    }

    #[test]
    fn test_frame_keys_use_natural_order() {
        let index = index_of(vec![
            frame("frame10.png", &[]),
            frame("frame2.png", &[]),
            frame("frame1.png", &[]),
        ]);
        assert_eq!(
            index.frame_keys().collect::<Vec<_>>(),
            vec!["frame1.png", "frame2.png", "frame10.png"]
        );
    }

    #[test]
    fn test_video_frames_sorted_by_video_then_file_and_grouped() {
        let index = index_of(vec![
            video_frame("vid10", "2.png", &[]),
            video_frame("vid2", "10.png", &[]),
            video_frame("vid2", "9.png", &[]),
        ]);
        assert_eq!(
            index.frame_keys().collect::<Vec<_>>(),
            vec!["vid2/9.png", "vid2/10.png", "vid10/2.png"]
        );
        let videos = index.videos();
        assert_eq!(videos.len(), 2);
        assert_eq!(videos[0], ("vid2", vec!["vid2/9.png", "vid2/10.png"]));
    }

    #[test]
    fn test_empty_frame_counts_zero_in_histograms() {
        let index = index_of(vec![
            frame("a.png", &[(1, 4), (1, 4), (2, 1)]),
            frame("b.png", &[]),
        ]);
        let (mask_counts, unique_counts) = index.goal_histograms();
        assert_eq!(mask_counts, &[3, 0]);
        assert_eq!(unique_counts, &[2, 0]);
        assert_eq!(index.goal_stats().freqs, vec![2, 1]);
    }

    #[test]
    fn test_unknown_key_is_not_found() {
        let index = index_of(vec![frame("a.png", &[(1, 1)])]);
        assert!(matches!(index.labels_for("zzz.png"), Err(QueryError::NotFound { .. })));
        assert!(matches!(index.coverage_for("zzz.png"), Err(QueryError::NotFound { .. })));
        assert!(index.segments_for("a.png").is_ok());
    }

    #[test]
    fn test_paths_are_resolved_from_layout() {
        let index = index_of(vec![video_frame("vidA", "0001.png", &[])]);
        let image = index.image_path("vidA/0001.png").unwrap();
        let mask = index.mask_path("vidA/0001.png").unwrap();
        assert_eq!(image, PathBuf::from("images/vidA/0001.jpg"));
        assert_eq!(mask, PathBuf::from("masks/vidA/0001.png"));
    }

    #[test]
    fn test_subdirectories_in_file_names_are_kept() {
        let config = DatasetConfig {
            image_dir: PathBuf::from("images"),
            annotation_file: PathBuf::from("ann.json"),
            mask_dir: PathBuf::from("masks"),
        };
        let layout = MediaLayout::new(&config, "jpg", "png");
        assert_eq!(layout.image_path(None, "train/a.png"), PathBuf::from("images/train/a.jpg"));
        assert_eq!(layout.mask_path(Some("vidA"), "sub/0001.png"), PathBuf::from("masks/vidA/sub/0001.png"));

        assert_eq!(strip_extension("train/a.b.png"), "train/a.b");
        assert_eq!(strip_extension("dir.v2/frame"), "dir.v2/frame");
        assert_eq!(strip_extension(".hidden"), ".hidden");
        assert_eq!(file_stem("train/a.png"), "a");
    }

    #[test]
    fn test_coverage_filter_is_strictly_greater() {
        let mut high = frame("a.png", &[]);
        high.coverage = 95.0;
        let mut edge = frame("b.png", &[]);
        edge.coverage = 90.0;
        let index = index_of(vec![high, edge]);
        assert_eq!(index.frames_with_min_coverage(90.0), vec!["a.png"]);
    }
}
