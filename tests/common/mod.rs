#![allow(dead_code)]

use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flying_object_detector::adapters::fs::upload_store::FsUploadStore;
use flying_object_detector::adapters::http::state::{Adapters, HttpState};
use flying_object_detector::adapters::onnx::model_catalog::OnnxModelCatalog;
use flying_object_detector::application::ports::{
    CameraPort, DetectorLoaderPort, DetectorPort, FrameSink, FrameSource, VideoCodecPort, VideoInfo,
};
use flying_object_detector::config::Settings;
use flying_object_detector::domain::{
    camera::{CameraId, CameraMode},
    detection::Detection,
    errors::{DomainError, DomainResult},
    model::{ModelId, YoloParams},
};

/// Reports one bird in the upper-left quarter of every frame.
pub struct OneBird;

impl DetectorPort for OneBird {
    fn infer(&mut self, rgb: &RgbImage, _params: &YoloParams) -> DomainResult<Vec<Detection>> {
        let (w, h) = (rgb.width() as f32, rgb.height() as f32);
        Ok(vec![Detection { x1: 0.1 * w, y1: 0.1 * h, x2: 0.4 * w, y2: 0.4 * h, score: 0.83, class_id: 14, label: "bird".into() }])
    }
}

pub struct FakeLoader;

impl DetectorLoaderPort for FakeLoader {
    fn load(&self, _model: &ModelId) -> DomainResult<Box<dyn DetectorPort>> {
        Ok(Box::new(OneBird))
    }
}

struct Blank {
    left: usize,
}

impl FrameSource for Blank {
    fn next_frame(&mut self) -> DomainResult<Option<RgbImage>> {
        if self.left == 0 {
            return Ok(None);
        }
        self.left -= 1;
        std::thread::sleep(std::time::Duration::from_millis(2));
        Ok(Some(RgbImage::from_pixel(48, 32, Rgb([90, 140, 200]))))
    }
}

/// Writes one byte per frame so the output file exists.
struct CountingSink {
    target: PathBuf,
    frames: usize,
}

impl FrameSink for CountingSink {
    fn write_frame(&mut self, _frame: &RgbImage) -> DomainResult<()> {
        self.frames += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> DomainResult<()> {
        std::fs::write(&self.target, vec![0u8; self.frames])
            .map_err(|e| DomainError::OperationFailed(e.to_string()))
    }
}

pub struct FakeCodec;

impl VideoCodecPort for FakeCodec {
    fn open_reader(&self, _source: &Path) -> DomainResult<(Box<dyn FrameSource>, VideoInfo)> {
        Ok((Box::new(Blank { left: 5 }), VideoInfo { width: 48, height: 32, fps: 10.0 }))
    }

    fn open_writer(&self, target: &Path, _info: &VideoInfo) -> DomainResult<Box<dyn FrameSink>> {
        Ok(Box::new(CountingSink { target: target.to_path_buf(), frames: 0 }))
    }

    fn transcode_for_browser(&self, source: &Path, target: &Path) -> DomainResult<()> {
        std::fs::copy(source, target)
            .map(|_| ())
            .map_err(|e| DomainError::OperationFailed(e.to_string()))
    }
}

pub struct FakeCamera;

impl CameraPort for FakeCamera {
    fn open(&self, _camera: &CameraId, _mode: &CameraMode) -> DomainResult<Box<dyn FrameSource>> {
        Ok(Box::new(Blank { left: usize::MAX }))
    }
}

/// Temp SOURCES, OUTPUTS, weights and static directories plus the state wired over them.
pub struct Fixture {
    pub root: tempfile::TempDir,
    pub state: HttpState,
}

impl Fixture {
    pub fn sources(&self) -> PathBuf {
        self.root.path().join("sources")
    }

    pub fn outputs(&self) -> PathBuf {
        self.root.path().join("outputs")
    }
}

pub fn fixture() -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let weights = root.path().join("weights");
    std::fs::create_dir_all(&weights).unwrap();
    std::fs::write(weights.join("tiny.onnx"), b"").unwrap();
    for dir in ["sources", "outputs", "static"] {
        std::fs::create_dir_all(root.path().join(dir)).unwrap();
    }
    std::fs::write(root.path().join("static").join("index.html"), "<h1>Flying Object Detection</h1>").unwrap();

    let yaml = format!(
        "MODELS: [tiny]\nPATHS:\n  SOURCES: {r}/sources\n  OUTPUTS: {r}/outputs\n  WEIGHTS: {r}/weights\n  FONT: null\n  STATIC: {r}/static\n",
        r = root.path().display()
    );
    let settings = Settings::from_yaml_str(&yaml).unwrap();
    let adapters = Adapters {
        catalog: Arc::new(OnnxModelCatalog::from_settings(&settings)),
        loader: Arc::new(FakeLoader),
        codec: Arc::new(FakeCodec),
        camera: Arc::new(FakeCamera),
        store: Arc::new(FsUploadStore::new()),
    };
    Fixture { state: HttpState::assemble(settings, adapters), root }
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Jpeg).unwrap();
    out.into_inner()
}

pub const BOUNDARY: &str = "----flying-object-boundary";

pub fn multipart_body(field: &str, file_name: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}
