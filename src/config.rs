//! YAML settings loaded once at startup and handed to each component.
//!
//! Only `MODELS`, `PATHS.SOURCES` and `PATHS.OUTPUTS` are required; every
//! other section falls back to the defaults below.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::domain::camera::{CameraId, CameraMode, FrameSize};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::model::YoloParams;

pub const DEFAULT_CONFIG_PATH: &str = "variables/variables.yaml";
pub const DETECTED_PREFIX: &str = "detected - ";

pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Settings {
    pub models: Vec<String>,
    pub paths: PathSettings,
    #[serde(default)]
    pub detection: YoloParams,
    #[serde(default = "default_classes")]
    pub classes: Vec<String>,
    #[serde(default)]
    pub webcam: WebcamSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PathSettings {
    pub sources: PathBuf,
    pub outputs: PathBuf,
    #[serde(default = "default_weights_dir")]
    pub weights: PathBuf,
    /// TTF for captions; the bundled DejaVu Sans is used when unset.
    #[serde(default)]
    pub font: Option<PathBuf>,
    #[serde(rename = "STATIC", default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl PathSettings {
    /// Where an upload named `file_name` is stored.
    pub fn source_path(&self, file_name: &str) -> PathBuf {
        self.sources.join(file_name)
    }

    /// Where the annotated video for `file_name` is written.
    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.outputs.join(format!("{DETECTED_PREFIX}{file_name}"))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct WebcamSettings {
    pub device: String,
    pub fourcc: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for WebcamSettings {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            fourcc: "MJPG".into(),
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

impl WebcamSettings {
    pub fn camera(&self) -> CameraId {
        CameraId { path: self.device.clone() }
    }

    pub fn mode(&self) -> CameraMode {
        CameraMode {
            format: self.fourcc.clone(),
            size: FrameSize { width: self.width, height: self.height },
            fps: self.fps,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8090".into() }
    }
}

fn default_classes() -> Vec<String> {
    COCO_CLASSES.iter().map(|c| c.to_string()).collect()
}

fn default_weights_dir() -> PathBuf {
    PathBuf::from("weights")
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> DomainResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DomainError::Config(format!("cannot read {}: {e}", path.display())))?;
        let settings = Self::from_yaml_str(&raw)?;
        tracing::info!(
            "Loaded {} ({} model variants, sources={}, outputs={})",
            path.display(),
            settings.models.len(),
            settings.paths.sources.display(),
            settings.paths.outputs.display()
        );
        Ok(settings)
    }

    pub fn from_yaml_str(raw: &str) -> DomainResult<Self> {
        let settings: Settings = serde_yaml::from_str(raw)
            .map_err(|e| DomainError::Config(format!("malformed settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> DomainResult<()> {
        if self.models.is_empty() {
            return Err(DomainError::Config("MODELS must list at least one variant".into()));
        }
        if self.models.iter().any(|m| m.trim().is_empty()) {
            return Err(DomainError::Config("MODELS contains an empty entry".into()));
        }
        if self.classes.is_empty() {
            return Err(DomainError::Config("CLASSES must not be empty".into()));
        }
        let p = &self.detection;
        if p.input_size == 0 {
            return Err(DomainError::Config("DETECTION.INPUT_SIZE must be positive".into()));
        }
        if !(0.0..=1.0).contains(&p.conf_threshold) || !(0.0..=1.0).contains(&p.iou_threshold) {
            return Err(DomainError::Config("DETECTION thresholds must be within 0..1".into()));
        }
        Ok(())
    }
}
