//! Scores detection results against ground-truth intro annotations.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::intro::DetectionResult;
use crate::Result;

/// A prediction is counted as correct when its IoU with the annotation exceeds this value.
pub const IOU_MATCH_THRESHOLD: f64 = 0.5;

/// Ground-truth intro position for one video.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub end_time: f64,
}

/// Annotations keyed by video file name.
pub type Annotations = BTreeMap<String, Annotation>;

/// Aggregate accuracy of a set of predictions.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub accuracy: f64,
    pub mean_iou: f64,
    pub correct: usize,
    pub total: usize,
}

/// Loads annotations from a JSON file keyed by file name, of the form
/// `{"<file name>": {"start_time": .., "end_time": ..}}`.
pub fn load_annotations(path: impl AsRef<Path>) -> Result<Annotations> {
    let f = std::fs::File::open(path.as_ref())?;
    Ok(serde_json::from_reader(std::io::BufReader::new(f))?)
}

/// Loads detection results as written by the `detect` command.
pub fn load_predictions(path: impl AsRef<Path>) -> Result<BTreeMap<String, DetectionResult>> {
    let f = std::fs::File::open(path.as_ref())?;
    Ok(serde_json::from_reader(std::io::BufReader::new(f))?)
}

/// Intersection over union of two time ranges. Returns 0 for an empty union.
pub fn iou((a_start, a_end): (f64, f64), (b_start, b_end): (f64, f64)) -> f64 {
    let intersection = (a_end.min(b_end) - a_start.max(b_start)).max(0.0);
    let union = a_end.max(b_end) - a_start.min(b_start);
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Compares predictions with annotations.
///
/// Only predictions that found an intro and have an annotation for the same file name are
/// scored. Missing start or end times are treated as 0.
pub fn evaluate(
    predictions: &BTreeMap<String, DetectionResult>,
    annotations: &Annotations,
) -> Metrics {
    let scores: Vec<f64> = predictions
        .iter()
        .filter(|(_, prediction)| prediction.found)
        .filter_map(|(name, prediction)| {
            let truth = annotations.get(name)?;
            let predicted = (
                prediction.start_time.unwrap_or(0.0),
                prediction.end_time.unwrap_or(0.0),
            );
            Some(iou(predicted, (truth.start_time, truth.end_time)))
        })
        .collect();

    let total = scores.len();
    let correct = scores.iter().filter(|s| **s > IOU_MATCH_THRESHOLD).count();

    if total == 0 {
        return Metrics::default();
    }

    Metrics {
        accuracy: correct as f64 / total as f64,
        mean_iou: scores.iter().sum::<f64>() / total as f64,
        correct,
        total,
    }
}
