use serde::{Deserialize, Serialize};
use std::path::Path;

pub const VIDEO_EXTENSIONS: &[&str] = &["mov", "avi", "mp4", "mpg", "mpeg", "m4v", "wmv", "mkv"];
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Input source chosen in the UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    Webcam,
    #[default]
    VideoFile,
    ImageFile,
}

impl DetectionMode {
    pub const ALL: [DetectionMode; 3] = [Self::Webcam, Self::VideoFile, Self::ImageFile];

    pub fn label(self) -> &'static str {
        match self {
            Self::Webcam => "Webcam",
            Self::VideoFile => "Video File",
            Self::ImageFile => "Image File",
        }
    }

    /// Extensions the uploader accepts. Webcam mode takes no upload.
    pub fn allowed_extensions(self) -> &'static [&'static str] {
        match self {
            Self::Webcam => &[],
            Self::VideoFile => VIDEO_EXTENSIONS,
            Self::ImageFile => IMAGE_EXTENSIONS,
        }
    }

    pub fn accepts(self, file_name: &str) -> bool {
        let Some(ext) = Path::new(file_name).extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        self.allowed_extensions().iter().any(|allowed| *allowed == ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_lists_follow_the_mode() {
        assert!(DetectionMode::ImageFile.accepts("cat.jpg"));
        assert!(DetectionMode::ImageFile.accepts("CAT.PNG"));
        assert!(!DetectionMode::ImageFile.accepts("clip.mp4"));
        assert!(DetectionMode::VideoFile.accepts("clip.mkv"));
        assert!(!DetectionMode::VideoFile.accepts("notes.txt"));
        assert!(!DetectionMode::VideoFile.accepts("no_extension"));
        assert!(!DetectionMode::Webcam.accepts("cat.jpg"));
    }

    #[test]
    fn serde_names_are_snake_case() {
        let json = serde_json::to_string(&DetectionMode::VideoFile).unwrap();
        assert_eq!(json, "\"video_file\"");
        let mode: DetectionMode = serde_json::from_str("\"image_file\"").unwrap();
        assert_eq!(mode, DetectionMode::ImageFile);
        assert_eq!(DetectionMode::default(), DetectionMode::VideoFile);
    }
}
