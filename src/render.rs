/// Visualization adapter between the dataset index and a segment renderer
///
/// The renderer is a seam: anything that can paint panoptic segments over an
/// image implements `SegmentRenderer`. `OverlayRenderer` is the built-in
/// alpha-blend implementation used by the CLI export.
///
/// Category ids are remapped per class (things and stuff each numbered from 0)
/// for the renderer only; the index keeps the dataset's own label space.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use image::{Rgb, RgbImage};

#[allow(unused_imports)]
use log::{debug, info, warn};

use crate::dataset::{DatasetIndex, Frame};
use crate::error::QueryError;
use crate::mask::PanopticMask;

pub const COVERAGE_LABEL_PREFIX: &str = "Coverage: ";

/// Segment as passed to the renderer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VizSegment {
    /// Panoptic id of the segment's pixels in the mask
    pub id: u32,
    /// Contiguous index within `thing_classes` or `stuff_classes`
    pub category_id: u32,
    pub is_thing: bool,
    pub iscrowd: bool,
}

/// Per-frame class tables, in the renderer's remapped id space
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VizMetadata {
    pub thing_classes: Vec<String>,
    pub stuff_classes: Vec<String>,
}

pub trait SegmentRenderer {
    /// Draw `segments` of `mask` over `image`
    fn draw_panoptic(
        &self,
        image: &RgbImage,
        mask: &PanopticMask,
        segments: &[VizSegment],
        metadata: &VizMetadata,
    ) -> RgbImage;
}

#[derive(Debug, Clone)]
pub struct RenderedFrame {
    pub original: RgbImage,
    pub overlay: RgbImage,
    /// `"<ordinal>: <name>"` per segment, then the coverage line
    pub labels: Vec<String>,
}

impl RenderedFrame {
    /// Segment labels without the trailing coverage line
    pub fn segment_labels(&self) -> &[String] {
        match self.labels.split_last() {
            Some((last, rest)) if last.starts_with(COVERAGE_LABEL_PREFIX) => rest,
            _ => &self.labels,
        }
    }
}

/// Render metadata registered by the first full-frame render of a key
#[derive(Debug, Clone)]
struct RenderEntry {
    image_path: PathBuf,
    mask_path: PathBuf,
    segments: Vec<VizSegment>,
    metadata: VizMetadata,
}

pub struct Visualizer<R: SegmentRenderer> {
    renderer: R,
    cache: HashMap<String, RenderEntry>,
}

impl<R: SegmentRenderer> Visualizer<R> {
    pub fn new(renderer: R) -> Self {
        Self {
            renderer,
            cache: HashMap::new(),
        }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Decode the original image and draw every segment of `key`
    pub fn render(&mut self, index: &DatasetIndex, key: &str) -> Result<RenderedFrame, QueryError> {
        let frame = index.frame(key)?;
        let image_path = existing(index.image_path(key)?, key)?;
        let mask_path = existing(index.mask_path(key)?, key)?;

        let (segments, metadata, mut labels) = remap_segments(index, frame);
        labels.push(coverage_label(frame.coverage));

        let original = open_rgb(&image_path)?;
        let mask = open_mask(&mask_path)?;
        let overlay = self.renderer.draw_panoptic(&original, &mask, &segments, &metadata);

        self.cache.insert(
            key.to_string(),
            RenderEntry { image_path, mask_path, segments, metadata },
        );

        Ok(RenderedFrame { original, overlay, labels })
    }

    /// Draw only segment `segment_index` of a key rendered before
    pub fn render_segment(&self, key: &str, segment_index: usize) -> Result<RgbImage, QueryError> {
        let entry = self.cache.get(key).ok_or_else(|| QueryError::NotRegistered {
            key: key.to_string(),
        })?;

        let segment = entry.segments.get(segment_index).ok_or_else(|| QueryError::SegmentOutOfRange {
            key: key.to_string(),
            index: segment_index,
            len: entry.segments.len(),
        })?;

        let original = open_rgb(&existing(entry.image_path.clone(), key)?)?;
        let mask = open_mask(&existing(entry.mask_path.clone(), key)?)?;
        Ok(self.renderer.draw_panoptic(&original, &mask, std::slice::from_ref(segment), &entry.metadata))
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    /// Drop every registered frame, e.g. when the active dataset changes
    pub fn invalidate(&mut self) {
        if !self.cache.is_empty() {
            debug!("Invalidating {} cached render entries", self.cache.len());
        }
        self.cache.clear();
    }
}

/// Remap category ids per class and build the label strings of a frame
fn remap_segments(index: &DatasetIndex, frame: &Frame) -> (Vec<VizSegment>, VizMetadata, Vec<String>) {
    let mut metadata = VizMetadata::default();
    let mut labels = Vec::with_capacity(frame.segments.len() + 1);
    let mut segments = Vec::with_capacity(frame.segments.len());

    for (ordinal, seg) in frame.segments.iter().enumerate() {
        let is_thing = index.category(seg.category_id).map(|c| c.is_thing).unwrap_or(false);
        let label = format!("{}: {}", ordinal, index.category_name(seg.category_id));

        let classes = if is_thing {
            &mut metadata.thing_classes
        } else {
            &mut metadata.stuff_classes
        };
        let category_id = classes.len() as u32;
        classes.push(label.clone());
        labels.push(label);

        segments.push(VizSegment {
            id: seg.id,
            category_id,
            is_thing,
            iscrowd: seg.iscrowd,
        });
    }

    (segments, metadata, labels)
}

/// Label strings of a frame without decoding any media
pub fn label_strings(index: &DatasetIndex, key: &str) -> Result<Vec<String>, QueryError> {
    let frame = index.frame(key)?;
    let (_, _, mut labels) = remap_segments(index, frame);
    labels.push(coverage_label(frame.coverage));
    Ok(labels)
}

pub fn coverage_label(coverage: f64) -> String {
    format!("{COVERAGE_LABEL_PREFIX}{coverage:.2}%")
}

fn existing(path: PathBuf, key: &str) -> Result<PathBuf, QueryError> {
    if path.exists() {
        Ok(path)
    } else {
        warn!("Media for '{}' not found: {}", key, path.display());
        Err(QueryError::NotFound { key: key.to_string() })
    }
}

fn open_rgb(path: &Path) -> Result<RgbImage, QueryError> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|source| QueryError::Image { path: path.to_path_buf(), source })
}

fn open_mask(path: &Path) -> Result<PanopticMask, QueryError> {
    PanopticMask::open(path).map_err(|source| QueryError::Image { path: path.to_path_buf(), source })
}

/// Alpha-blends a palette color over every pixel of each drawn segment
#[derive(Debug, Clone, Copy)]
pub struct OverlayRenderer {
    alpha: f32,
}

impl OverlayRenderer {
    pub fn new(alpha: f32) -> Self {
        Self { alpha: alpha.clamp(0.0, 1.0) }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_OVERLAY_ALPHA)
    }
}

impl SegmentRenderer for OverlayRenderer {
    fn draw_panoptic(
        &self,
        image: &RgbImage,
        mask: &PanopticMask,
        segments: &[VizSegment],
        _metadata: &VizMetadata,
    ) -> RgbImage {
        let colors: HashMap<u32, Rgb<u8>> = segments
            .iter()
            .map(|seg| (seg.id, segment_color(seg)))
            .collect();

        let mut out = image.clone();
        if (mask.width, mask.height) != image.dimensions() {
            warn!(
                "Mask size {}x{} differs from image size {}x{}, overlaying the common area",
                mask.width, mask.height, image.width(), image.height()
            );
        }
        let width = mask.width.min(image.width());
        let height = mask.height.min(image.height());

        for y in 0..height {
            for x in 0..width {
                if let Some(color) = colors.get(&mask.id_at(x, y)) {
                    let pixel = out.get_pixel_mut(x, y);
                    for c in 0..3 {
                        let blended = color.0[c] as f32 * self.alpha + pixel.0[c] as f32 * (1.0 - self.alpha);
                        pixel.0[c] = blended.round() as u8;
                    }
                }
            }
        }
        out
    }
}

/// Color for a remapped segment class (YOLO/YOLOX color scheme); stuff
/// classes start half way through the palette so the two classes differ
fn segment_color(seg: &VizSegment) -> Rgb<u8> {
    const COLORS: [[f32; 3]; 30] = [
        [0.000, 0.447, 0.741], [0.850, 0.325, 0.098], [0.929, 0.694, 0.125],
        [0.494, 0.184, 0.556], [0.466, 0.674, 0.188], [0.301, 0.745, 0.933],
        [0.635, 0.078, 0.184], [0.300, 0.300, 0.300], [0.600, 0.600, 0.600],
        [1.000, 0.000, 0.000], [1.000, 0.500, 0.000], [0.749, 0.749, 0.000],
        [0.000, 1.000, 0.000], [0.000, 0.000, 1.000], [0.667, 0.000, 1.000],
        [0.333, 0.333, 0.000], [0.333, 0.667, 0.000], [0.333, 1.000, 0.000],
        [0.667, 0.333, 0.000], [0.667, 0.667, 0.000], [0.667, 1.000, 0.000],
        [1.000, 0.333, 0.000], [1.000, 0.667, 0.000], [1.000, 1.000, 0.000],
        [0.000, 0.333, 0.500], [0.000, 0.667, 0.500], [0.000, 1.000, 0.500],
        [0.333, 0.000, 0.500], [0.333, 0.333, 0.500], [0.333, 0.667, 0.500],
    ];

    let offset = if seg.is_thing { 0 } else { COLORS.len() / 2 };
    let rgb = COLORS[(seg.category_id as usize + offset) % COLORS.len()];
    Rgb([
        (rgb[0] * 255.0).round() as u8,
        (rgb[1] * 255.0).round() as u8,
        (rgb[2] * 255.0).round() as u8,
    ])
}
