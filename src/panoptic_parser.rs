/// Panoptic segmentation annotation parser
///
/// Parses COCO-panoptic style annotation documents in two flavours:
/// - image datasets: `annotations` is a flat list of per-image records
/// - video datasets (VIPSeg style): `annotations` is a list of videos, each with
///   a `video_id` and a nested `annotations` list of frame records
///
/// Format reference: https://cocodataset.org/#format-data (panoptic section)
use std::path::Path;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[allow(unused_imports)]
use log::{debug, info, warn};

use crate::error::ConfigError;

/// Warnings about individual malformed records are capped so a broken file
/// does not flood the log; the totals are still reported.
const MAX_RECORD_WARNINGS: usize = 10;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PanopticCategory {
    pub id: u32,
    pub name: String,
    #[serde(default, deserialize_with = "bool_from_int_or_bool")]
    pub isthing: bool,
    #[serde(default)]
    pub supercategory: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SegmentInfo {
    /// Panoptic segment id, as encoded in the RGB mask
    #[serde(default)]
    pub id: u32,
    pub category_id: u32,
    #[serde(default, deserialize_with = "u64_from_number")]
    pub area: u64,
    #[serde(default)]
    pub iscrowd: u8,
    #[serde(default)]
    pub bbox: Option<Vec<f32>>,
}

/// One annotated frame after flattening
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FrameRecord {
    pub file_name: String,
    #[serde(default)]
    pub segments_info: Vec<SegmentInfo>,
    /// Injected from the owning video record, never read from the frame itself
    #[serde(skip)]
    pub video_id: Option<String>,
}

/// Image vs. video layout of an annotation document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaKind {
    Image,
    Video,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    annotations: Vec<Value>,
    #[serde(default)]
    categories: Option<Vec<PanopticCategory>>,
}

#[derive(Debug, Clone)]
pub struct PanopticDocument {
    pub annotations: Vec<Value>,
    pub categories: Vec<PanopticCategory>,
}

/// Frame records plus the bookkeeping of what was skipped while flattening
#[derive(Debug, Clone, Default)]
pub struct FlattenedFrames {
    pub frames: Vec<FrameRecord>,
    pub skipped_videos: usize,
    pub malformed_records: usize,
}

impl PanopticDocument {
    /// Parse an annotation document from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content, path)
    }

    /// Parse an annotation document from a string; `path` is only used for error reporting
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let raw: RawDocument = serde_json::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let categories = match raw.categories {
            Some(categories) if !categories.is_empty() => categories,
            _ => return Err(ConfigError::MissingCategories(path.to_path_buf())),
        };

        Ok(Self {
            annotations: raw.annotations,
            categories,
        })
    }

    /// Decide the schema from the first annotation entry only.
    ///
    /// Documents are assumed to be homogeneous: a file mixing video and image
    /// records is read entirely with the schema of its first record.
    pub fn schema(&self) -> SchemaKind {
        match self.annotations.first() {
            Some(Value::Object(first)) if first.contains_key("video_id") => SchemaKind::Video,
            _ => SchemaKind::Image,
        }
    }

    /// Flatten the annotation list into frame records according to `schema`
    pub fn flatten(&self, schema: SchemaKind) -> FlattenedFrames {
        let mut out = FlattenedFrames::default();

        match schema {
            SchemaKind::Image => {
                for record in &self.annotations {
                    push_frame(&mut out, record, None);
                }
            }
            SchemaKind::Video => {
                for (position, video) in self.annotations.iter().enumerate() {
                    let video_id = video.get("video_id").and_then(video_id_to_string);
                    let frames = video
                        .get("annotations")
                        .and_then(Value::as_array)
                        .filter(|frames| !frames.is_empty());

                    let (video_id, frames) = match (video_id, frames) {
                        (Some(id), Some(frames)) => (id, frames),
                        (None, _) => {
                            warn!("Skipping video record #{position}: missing video_id");
                            out.skipped_videos += 1;
                            continue;
                        }
                        (Some(id), None) => {
                            warn!("Skipping video '{id}': no frame annotations");
                            out.skipped_videos += 1;
                            continue;
                        }
                    };

                    for frame in frames {
                        push_frame(&mut out, frame, Some(&video_id));
                    }
                }
            }
        }

        if out.malformed_records > MAX_RECORD_WARNINGS {
            warn!("{} malformed frame records skipped in total", out.malformed_records);
        }
        out
    }
}

fn push_frame(out: &mut FlattenedFrames, record: &Value, video_id: Option<&str>) {
    match FrameRecord::deserialize(record) {
        Ok(mut frame) => {
            frame.video_id = video_id.map(str::to_string);
            out.frames.push(frame);
        }
        Err(e) => {
            out.malformed_records += 1;
            if out.malformed_records <= MAX_RECORD_WARNINGS {
                warn!("Skipping malformed frame record: {e}");
            }
        }
    }
}

fn video_id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn bool_from_int_or_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i == 1,
    })
}

fn u64_from_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if value.is_finite() && value >= 0.0 {
        Ok(value.round() as u64)
    } else {
        Err(serde::de::Error::custom(format!("invalid area {value}")))
    }
}
