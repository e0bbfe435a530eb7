use async_trait::async_trait;
use image::RgbImage;
use std::path::Path;

use crate::domain::{
    camera::{CameraId, CameraMode},
    detection::Detection,
    errors::DomainResult,
    model::{ModelId, YoloParams},
};

/// A loaded detector. Inference needs exclusive access to the runtime session.
pub trait DetectorPort: Send {
    fn infer(&mut self, rgb: &RgbImage, params: &YoloParams) -> DomainResult<Vec<Detection>>;
}

pub trait DetectorLoaderPort: Send + Sync {
    fn load(&self, model: &ModelId) -> DomainResult<Box<dyn DetectorPort>>;
}

#[async_trait]
pub trait ModelCatalogPort: Send + Sync {
    /// Variants offered in the selector, in configuration order.
    fn variants(&self) -> Vec<String>;
    fn resolve(&self, variant: &str) -> DomainResult<ModelId>;
    async fn validate_model(&self, model: &ModelId) -> DomainResult<()>;
}

/// Stream of decoded RGB frames. `Ok(None)` marks end of stream.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> DomainResult<Option<RgbImage>>;
}

pub trait FrameSink: Send {
    fn write_frame(&mut self, frame: &RgbImage) -> DomainResult<()>;
    /// Flushes and closes the output. Must be called for the file to be valid.
    fn finish(self: Box<Self>) -> DomainResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

pub trait VideoCodecPort: Send + Sync {
    fn open_reader(&self, source: &Path) -> DomainResult<(Box<dyn FrameSource>, VideoInfo)>;
    fn open_writer(&self, target: &Path, info: &VideoInfo) -> DomainResult<Box<dyn FrameSink>>;
    /// Re-encodes `source` as H.264 MP4 that browsers can play.
    fn transcode_for_browser(&self, source: &Path, target: &Path) -> DomainResult<()>;
}

pub trait CameraPort: Send + Sync {
    fn open(&self, camera: &CameraId, mode: &CameraMode) -> DomainResult<Box<dyn FrameSource>>;
}

/// An upload being written chunk by chunk as it arrives.
#[async_trait]
pub trait UploadSink: Send {
    async fn write_chunk(&mut self, chunk: &[u8]) -> DomainResult<()>;
    /// Flushes the file and returns the number of bytes written.
    async fn finish(self: Box<Self>) -> DomainResult<u64>;
    /// Removes whatever was written so far.
    async fn abort(self: Box<Self>);
}

#[async_trait]
pub trait UploadStorePort: Send + Sync {
    /// Opens `dest` for writing, truncating any existing file.
    async fn create(&self, dest: &Path) -> DomainResult<Box<dyn UploadSink>>;
}
