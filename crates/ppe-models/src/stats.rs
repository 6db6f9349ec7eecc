//! Aggregated detection statistics for a processed video.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ppe_class::PpeClass;

/// Per-class detection counts summed over every frame.
///
/// An object visible in 100 frames contributes 100 to its class count; this
/// is a detection tally, not an object census.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionStats {
    /// Class name -> number of detections
    pub counts: BTreeMap<String, u64>,
    /// Frames seen by the detector
    pub frames_processed: u64,
    /// Frames with at least one detection
    pub frames_with_detections: u64,
}

impl DetectionStats {
    /// Count one frame worth of detections.
    ///
    /// Returns the per-class counts for this frame alone.
    pub fn record_frame<I, S>(&mut self, names: I) -> BTreeMap<String, u64>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut frame_counts: BTreeMap<String, u64> = BTreeMap::new();
        for name in names {
            *frame_counts.entry(name.as_ref().to_string()).or_insert(0) += 1;
        }

        self.frames_processed += 1;
        if !frame_counts.is_empty() {
            self.frames_with_detections += 1;
        }
        for (name, count) in &frame_counts {
            *self.counts.entry(name.clone()).or_insert(0) += count;
        }

        frame_counts
    }

    /// Fold another set of statistics into this one.
    pub fn merge(&mut self, other: &DetectionStats) {
        for (name, count) in &other.counts {
            *self.counts.entry(name.clone()).or_insert(0) += count;
        }
        self.frames_processed += other.frames_processed;
        self.frames_with_detections += other.frames_with_detections;
    }

    /// Total detections across classes.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Detections for a single class (exact label match).
    pub fn count(&self, name: &str) -> u64 {
        self.counts.get(name).copied().unwrap_or(0)
    }

    /// Detections whose class signals missing equipment.
    pub fn violations(&self) -> u64 {
        self.counts
            .iter()
            .filter(|(name, _)| PpeClass::from_label(name).is_violation())
            .map(|(_, count)| count)
            .sum()
    }

    /// Classes ordered by descending count, then by name.
    pub fn sorted(&self) -> Vec<(&str, u64)> {
        let mut entries: Vec<(&str, u64)> = self
            .counts
            .iter()
            .map(|(name, count)| (name.as_str(), *count))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        entries
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
