/// Dataset ingestion
///
/// Builds a `DatasetIndex` from an annotation document and the media on disk.
/// Only a broken annotation file or a missing category table aborts the load;
/// every per-frame problem is counted in the `LoadReport` and the frame skipped.
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Instant;
use rayon::prelude::*;

#[allow(unused_imports)]
use log::{debug, info, warn};

use crate::config::DatasetConfig;
use crate::dataset::{Category, DatasetIndex, Frame, LoadReport, MediaLayout, Segment};
use crate::error::ConfigError;
use crate::frame_key::make_frame_key;
use crate::mask::PanopticMask;
use crate::panoptic_parser::{FrameRecord, PanopticDocument, SchemaKind};
use crate::settings::UserSettings;

const MAX_FRAME_WARNINGS: usize = 10;

/// A frame that passed the duplicate and file-existence checks
struct Candidate {
    key: String,
    record: FrameRecord,
    mask_path: PathBuf,
}

/// Load the dataset `name` described by `config`
pub fn load(
    name: &str,
    config: &DatasetConfig,
    settings: &UserSettings,
) -> Result<(DatasetIndex, LoadReport), ConfigError> {
    info!("Loading {} dataset... This may take a few seconds.", name);
    let start = Instant::now();

    let document = PanopticDocument::from_file(&config.annotation_file)?;
    let schema = document.schema();
    match schema {
        SchemaKind::Video => info!("Detected video dataset format."),
        SchemaKind::Image => info!("Detected image dataset format."),
    }

    let flattened = document.flatten(schema);
    let mut report = LoadReport {
        skipped_videos: flattened.skipped_videos,
        malformed_records: flattened.malformed_records,
        ..LoadReport::default()
    };

    let layout = MediaLayout::new(config, &settings.image_extension, &settings.mask_extension);
    let candidates = collect_candidates(flattened.frames, &layout, &mut report);

    // Mask decoding dominates load time; decode in parallel, accumulate in order
    let coverages: Vec<Result<f64, image::ImageError>> = candidates
        .par_iter()
        .map(|candidate| {
            PanopticMask::open(&candidate.mask_path).map(|mask| mask.coverage(settings.background_id))
        })
        .collect();

    let mut frames = Vec::with_capacity(candidates.len());
    for (candidate, coverage) in candidates.into_iter().zip(coverages) {
        match coverage {
            Ok(coverage) => {
                if candidate.record.segments_info.is_empty() {
                    report.empty_frames += 1;
                    if report.empty_frames <= MAX_FRAME_WARNINGS {
                        warn!("Frame '{}' has no segments", candidate.key);
                    }
                }
                frames.push(build_frame(candidate, coverage));
            }
            Err(e) => {
                report.decode_failures += 1;
                if report.decode_failures <= MAX_FRAME_WARNINGS {
                    warn!("Could not process mask file {}. Error: {}", candidate.mask_path.display(), e);
                }
            }
        }
    }

    let categories = document.categories.iter().map(Category::from);
    let index = DatasetIndex::from_frames(name, schema, layout, categories, frames);
    report.frames_loaded = index.len();
    report.log_summary(name);
    debug!("Loaded '{}' in {:?}", name, start.elapsed());

    Ok((index, report))
}

/// Drop duplicate keys and frames whose image or mask is missing on disk
fn collect_candidates(
    records: Vec<FrameRecord>,
    layout: &MediaLayout,
    report: &mut LoadReport,
) -> Vec<Candidate> {
    let mut seen: HashSet<String> = HashSet::with_capacity(records.len());
    let mut candidates = Vec::with_capacity(records.len());

    for record in records {
        let key = make_frame_key(record.video_id.as_deref(), &record.file_name);
        if !seen.insert(key.clone()) {
            report.duplicates += 1;
            continue;
        }

        let image_path = layout.image_path(record.video_id.as_deref(), &record.file_name);
        let mask_path = layout.mask_path(record.video_id.as_deref(), &record.file_name);
        if !image_path.exists() || !mask_path.exists() {
            report.missing_files += 1;
            if report.missing_files <= MAX_FRAME_WARNINGS {
                debug!("Missing media for '{}': {} / {}", key, image_path.display(), mask_path.display());
            }
            continue;
        }

        candidates.push(Candidate { key, record, mask_path });
    }

    candidates
}

fn build_frame(candidate: Candidate, coverage: f64) -> Frame {
    let Candidate { key, record, .. } = candidate;

    let mut area_by_label: BTreeMap<u32, u64> = BTreeMap::new();
    for seg in &record.segments_info {
        *area_by_label.entry(seg.category_id).or_insert(0) += seg.area;
    }

    let segments = record
        .segments_info
        .iter()
        .map(|seg| Segment {
            id: seg.id,
            category_id: seg.category_id,
            area: seg.area,
            iscrowd: seg.iscrowd != 0,
            bbox: seg
                .bbox
                .as_deref()
                .and_then(|b| <[f32; 4]>::try_from(b).ok()),
        })
        .collect();

    Frame {
        key,
        video_id: record.video_id,
        file_name: record.file_name,
        labels: record.segments_info.iter().map(|seg| seg.category_id).collect(),
        area_by_label,
        coverage,
        segments,
    }
}
