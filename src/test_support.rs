//! Fixtures shared by unit tests: in-memory frames and on-disk datasets.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use image::{Rgb, RgbImage};
use serde_json::{json, Value};

use crate::config::DatasetConfig;
use crate::dataset::{strip_extension, Category, DatasetIndex, Frame, MediaLayout, Segment};
use crate::frame_key::make_frame_key;
use crate::mask::id_to_rgb;
use crate::panoptic_parser::SchemaKind;

/// Side length of every fixture image and mask
pub const MASK_SIDE: u32 = 4;

pub fn categories() -> Vec<Category> {
    vec![
        Category { id: 1, name: "person".to_string(), is_thing: true },
        Category { id: 2, name: "car".to_string(), is_thing: true },
        Category { id: 3, name: "sky".to_string(), is_thing: false },
        Category { id: 7, name: "road".to_string(), is_thing: false },
    ]
}

fn categories_json() -> Value {
    Value::Array(
        categories()
            .into_iter()
            .map(|c| json!({"id": c.id, "name": c.name, "isthing": if c.is_thing { 1 } else { 0 }}))
            .collect(),
    )
}

/// In-memory frame; each `(label, area)` pair becomes one segment
pub fn frame(file_name: &str, segments: &[(u32, u64)]) -> Frame {
    build_frame(None, file_name, segments)
}

pub fn video_frame(video_id: &str, file_name: &str, segments: &[(u32, u64)]) -> Frame {
    build_frame(Some(video_id), file_name, segments)
}

fn build_frame(video_id: Option<&str>, file_name: &str, segments: &[(u32, u64)]) -> Frame {
    let mut area_by_label = BTreeMap::new();
    for &(label, area) in segments {
        *area_by_label.entry(label).or_insert(0) += area;
    }
    Frame {
        key: make_frame_key(video_id, file_name),
        video_id: video_id.map(str::to_string),
        file_name: file_name.to_string(),
        labels: segments.iter().map(|&(label, _)| label).collect(),
        area_by_label,
        coverage: 0.0,
        segments: segments
            .iter()
            .enumerate()
            .map(|(i, &(label, area))| Segment {
                id: i as u32 + 1,
                category_id: label,
                area,
                iscrowd: false,
                bbox: None,
            })
            .collect(),
    }
}

pub fn index_of(frames: Vec<Frame>) -> DatasetIndex {
    let schema = if frames.iter().any(|f| f.video_id.is_some()) {
        SchemaKind::Video
    } else {
        SchemaKind::Image
    };
    let layout = MediaLayout {
        image_dir: PathBuf::from("images"),
        mask_dir: PathBuf::from("masks"),
        image_extension: "jpg".to_string(),
        mask_extension: "png".to_string(),
    };
    DatasetIndex::from_frames("test", schema, layout, categories(), frames)
}

/// One frame of an on-disk fixture dataset
#[derive(Debug, Clone)]
pub struct FixtureFrame {
    pub video_id: Option<String>,
    pub file_name: String,
    /// `(segment id, category id, painted pixel count)`
    pub segments: Vec<(u32, u32, u64)>,
    pub write_image: bool,
    pub write_mask: bool,
    pub corrupt_mask: bool,
}

impl FixtureFrame {
    pub fn image(file_name: &str) -> Self {
        Self {
            video_id: None,
            file_name: file_name.to_string(),
            segments: Vec::new(),
            write_image: true,
            write_mask: true,
            corrupt_mask: false,
        }
    }

    pub fn video(video_id: &str, file_name: &str) -> Self {
        Self {
            video_id: Some(video_id.to_string()),
            ..Self::image(file_name)
        }
    }

    /// Paint the next `pixels` mask pixels (row-major) with `segment_id`
    pub fn segment(mut self, segment_id: u32, category_id: u32, pixels: u64) -> Self {
        self.segments.push((segment_id, category_id, pixels));
        self
    }

    pub fn without_image(mut self) -> Self {
        self.write_image = false;
        self
    }

    pub fn without_mask(mut self) -> Self {
        self.write_mask = false;
        self
    }

    pub fn with_corrupt_mask(mut self) -> Self {
        self.corrupt_mask = true;
        self
    }

    fn record(&self) -> Value {
        json!({
            "file_name": self.file_name,
            "image_id": self.file_name.trim_end_matches(".png"),
            "segments_info": self.segments.iter().map(|&(id, category_id, area)| json!({
                "id": id,
                "category_id": category_id,
                "area": area,
                "iscrowd": 0,
                "bbox": [0, 0, MASK_SIDE, MASK_SIDE],
            })).collect::<Vec<_>>(),
        })
    }

    fn write_media(&self, root: &Path) {
        let sub = self.video_id.as_deref().map(PathBuf::from).unwrap_or_default();
        let stem = strip_extension(&self.file_name);

        if self.write_image {
            let path = root.join("images").join(&sub).join(format!("{stem}.jpg"));
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            RgbImage::from_pixel(MASK_SIDE, MASK_SIDE, Rgb([120, 130, 140]))
                .save(&path)
                .unwrap();
        }

        if self.write_mask {
            let path = root.join("masks").join(&sub).join(format!("{stem}.png"));
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            if self.corrupt_mask {
                fs::write(&path, b"definitely not a png").unwrap();
            } else {
                self.mask_image().save(&path).unwrap();
            }
        }
    }

    fn mask_image(&self) -> RgbImage {
        let mut mask = RgbImage::new(MASK_SIDE, MASK_SIDE);
        let mut cursor = 0u32;
        for &(segment_id, _, pixels) in &self.segments {
            for _ in 0..pixels {
                if cursor >= MASK_SIDE * MASK_SIDE {
                    break;
                }
                mask.put_pixel(cursor % MASK_SIDE, cursor / MASK_SIDE, id_to_rgb(segment_id));
                cursor += 1;
            }
        }
        mask
    }
}

/// Write images, masks and an annotation file under `root`.
/// The document uses the video layout if any frame has a video id.
pub fn write_dataset(root: &Path, frames: &[FixtureFrame]) -> DatasetConfig {
    for frame in frames {
        frame.write_media(root);
    }

    let annotations: Vec<Value> = if frames.iter().any(|f| f.video_id.is_some()) {
        let mut videos: Vec<(String, Vec<Value>)> = Vec::new();
        for frame in frames {
            let video_id = frame.video_id.clone().unwrap_or_default();
            match videos.iter_mut().find(|(id, _)| *id == video_id) {
                Some((_, records)) => records.push(frame.record()),
                None => videos.push((video_id, vec![frame.record()])),
            }
        }
        videos
            .into_iter()
            .map(|(video_id, records)| json!({"video_id": video_id, "annotations": records}))
            .collect()
    } else {
        frames.iter().map(FixtureFrame::record).collect()
    };

    let annotation_file = root.join("annotations.json");
    let document = json!({"annotations": annotations, "categories": categories_json()});
    fs::write(&annotation_file, serde_json::to_string_pretty(&document).unwrap()).unwrap();

    DatasetConfig {
        image_dir: root.join("images"),
        annotation_file,
        mask_dir: root.join("masks"),
    }
}
