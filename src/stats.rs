/// Goal vs. selection statistics
///
/// Goal aggregates are computed once by `DatasetIndex`. Everything here only
/// walks the frames of a given selection, so the cost of a query is
/// proportional to the selection size, not the dataset size.
use std::collections::{HashMap, HashSet};
use serde::Serialize;

#[allow(unused_imports)]
use log::{debug, warn};

use crate::dataset::{DatasetIndex, Frame};

/// Per-label frequency and area, indexed by the label universe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelStats {
    pub labels: Vec<u32>,
    pub freqs: Vec<u64>,
    pub areas: Vec<u64>,
}

impl LabelStats {
    pub fn zeroed(labels: Vec<u32>) -> Self {
        let len = labels.len();
        Self {
            labels,
            freqs: vec![0; len],
            areas: vec![0; len],
        }
    }

    pub(crate) fn accumulate(&mut self, frame: &Frame, positions: &HashMap<u32, usize>) {
        for label in &frame.labels {
            if let Some(&i) = positions.get(label) {
                self.freqs[i] += 1;
            }
        }
        for (label, area) in &frame.area_by_label {
            if let Some(&i) = positions.get(label) {
                self.areas[i] += area;
            }
        }
    }

    /// Total segment count represented by these stats
    pub fn total_segments(&self) -> u64 {
        self.freqs.iter().sum()
    }
}

/// Frequency and area aggregates over `selection`, projected onto the
/// dataset's label universe. Keys not present in the index are ignored.
pub fn current_stats(index: &DatasetIndex, selection: &HashSet<String>) -> LabelStats {
    let mut stats = LabelStats::zeroed(index.label_universe().to_vec());
    let positions = index.label_positions();
    let mut unknown = 0usize;

    for key in selection {
        match index.frame(key) {
            Ok(frame) => stats.accumulate(frame, positions),
            Err(_) => unknown += 1,
        }
    }

    if unknown > 0 {
        debug!("{unknown} selected keys are not part of dataset '{}'", index.name());
    }
    stats
}

/// `(mask_count, unique_label_count)` per selected frame, in selection iteration order
pub fn selected_histograms(index: &DatasetIndex, selection: &HashSet<String>) -> (Vec<usize>, Vec<usize>) {
    selection
        .iter()
        .filter_map(|key| index.frame(key).ok())
        .map(|frame| (frame.mask_count(), frame.unique_label_count()))
        .unzip()
}

/// Lower bin edges for "masks per image"; the last bin is open-ended
pub const MASK_COUNT_BIN_EDGES: [usize; 11] = [0, 10, 20, 30, 40, 50, 60, 70, 80, 90, 100];

/// Lower bin edges for "unique labels per image"; the last bin is open-ended
pub const UNIQUE_LABEL_BIN_EDGES: [usize; 6] = [0, 5, 10, 15, 20, 25];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Histogram {
    pub labels: Vec<String>,
    pub counts: Vec<usize>,
}

impl Histogram {
    /// Bin `values` into `[edges[i], edges[i + 1])`, with the final bin
    /// collecting everything at or above the last edge
    pub fn from_values(values: &[usize], edges: &[usize]) -> Self {
        let labels = edges
            .iter()
            .enumerate()
            .map(|(i, lo)| match edges.get(i + 1) {
                Some(hi) => format!("{lo}-{hi}"),
                None => format!("{lo}+"),
            })
            .collect();

        let mut counts = vec![0; edges.len()];
        for &value in values {
            // partition_point gives the number of edges <= value
            let bin = edges.partition_point(|&edge| edge <= value);
            if bin > 0 {
                counts[bin - 1] += 1;
            }
        }

        Self { labels, counts }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

/// Goal and selected histograms side by side for one dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistogramComparison {
    pub goal_mask_counts: Histogram,
    pub goal_unique_labels: Histogram,
    pub selected_mask_counts: Histogram,
    pub selected_unique_labels: Histogram,
}

pub fn compare_histograms(index: &DatasetIndex, selection: &HashSet<String>) -> HistogramComparison {
    let (goal_masks, goal_labels) = index.goal_histograms();
    let (selected_masks, selected_labels) = selected_histograms(index, selection);

    HistogramComparison {
        goal_mask_counts: Histogram::from_values(goal_masks, &MASK_COUNT_BIN_EDGES),
        goal_unique_labels: Histogram::from_values(goal_labels, &UNIQUE_LABEL_BIN_EDGES),
        selected_mask_counts: Histogram::from_values(&selected_masks, &MASK_COUNT_BIN_EDGES),
        selected_unique_labels: Histogram::from_values(&selected_labels, &UNIQUE_LABEL_BIN_EDGES),
    }
}
