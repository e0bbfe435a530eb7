use serde::{Deserialize, Serialize};

use crate::domain::{detection::Detection, mode::DetectionMode};

/// Body of `POST /api/detect`, tagged by the selected mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DetectRequest {
    Webcam { model: String },
    VideoFile { model: String, file: String },
    ImageFile { model: String, file: String },
}

impl DetectRequest {
    pub fn mode(&self) -> DetectionMode {
        match self {
            Self::Webcam { .. } => DetectionMode::Webcam,
            Self::VideoFile { .. } => DetectionMode::VideoFile,
            Self::ImageFile { .. } => DetectionMode::ImageFile,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Self::Webcam { model } | Self::VideoFile { model, .. } | Self::ImageFile { model, .. } => model,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DetectResponse {
    Webcam {
        model: String,
        stream: String,
        snapshot: String,
    },
    VideoFile {
        model: String,
        frames: u64,
        detections: u64,
        /// Annotated file name under OUTPUTS.
        output: String,
        /// File under OUTPUTS the browser should play.
        playback: String,
    },
    ImageFile {
        model: String,
        width: u32,
        height: u32,
        detections: Vec<Detection>,
        summary: String,
        /// `data:image/jpeg;base64,...`
        image: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedUpload {
    pub file: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeInfo {
    pub id: DetectionMode,
    pub label: String,
    pub extensions: Vec<String>,
}

impl From<DetectionMode> for ModeInfo {
    fn from(mode: DetectionMode) -> Self {
        Self {
            id: mode,
            label: mode.label().to_string(),
            extensions: mode.allowed_extensions().iter().map(|e| e.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfigResponse {
    pub title: String,
    pub models: Vec<String>,
    pub modes: Vec<ModeInfo>,
    pub default_mode: DetectionMode,
    pub webcam_running: bool,
    /// Why the last webcam session ended by itself, if it did.
    pub webcam_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub stopped: bool,
}
