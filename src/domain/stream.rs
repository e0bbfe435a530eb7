use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use super::detection::Detection;

/// Metadata published with every annotated webcam frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMeta {
    pub width: u32,
    pub height: u32,
    pub infer_ms: f32,
    pub fps_est: f32,
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsFrameMetaMessage {
    pub r#type: String,
    pub meta: FrameMeta,
}

/// Sent once when a webcam session gives up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsErrorMessage {
    pub r#type: String,
    pub message: String,
}

/// "1 bird, 2 drone" style summary, labels in alphabetical order.
pub fn summarize_detections(detections: &[Detection]) -> String {
    let mut counts = BTreeMap::new();
    for det in detections {
        *counts.entry(det.label.as_str()).or_insert(0usize) += 1;
    }
    counts
        .iter()
        .map(|(label, count)| format!("{} {}", count, label))
        .collect::<Vec<_>>()
        .join(", ")
}
