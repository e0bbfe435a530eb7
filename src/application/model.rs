use image::RgbImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::application::ports::{DetectorPort, VideoCodecPort};
use crate::application::render::Annotator;
use crate::domain::{
    detection::Detection,
    errors::{DomainError, DomainResult},
    model::{ModelId, YoloParams},
    stream::summarize_detections,
};

const PROGRESS_EVERY: u64 = 100;

#[derive(Debug, Clone)]
pub struct AnnotatedImage {
    pub image: RgbImage,
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoReport {
    pub frames: u64,
    pub detections: u64,
    pub target: PathBuf,
}

/// A loaded detection model variant plus the drawing and codec helpers it feeds.
pub struct Model {
    id: ModelId,
    detector: Box<dyn DetectorPort>,
    params: YoloParams,
    annotator: Arc<Annotator>,
    codec: Arc<dyn VideoCodecPort>,
}

impl Model {
    pub fn new(
        id: ModelId,
        detector: Box<dyn DetectorPort>,
        params: YoloParams,
        annotator: Arc<Annotator>,
        codec: Arc<dyn VideoCodecPort>,
    ) -> Self {
        Self { id, detector, params, annotator, codec }
    }

    /// Raw detections for one decoded frame, nothing drawn.
    pub fn get_detections(&mut self, frame: &RgbImage) -> DomainResult<Vec<Detection>> {
        self.detector.infer(frame, &self.params)
    }

    pub fn predict_image(&mut self, path: &Path) -> DomainResult<AnnotatedImage> {
        let decoded = image::open(path)
            .map_err(|e| DomainError::Upload(format!("cannot decode image {}: {e}", path.display())))?;
        let mut image = decoded.to_rgb8();

        let t0 = Instant::now();
        let detections = self.get_detections(&image)?;
        debug!(
            "{}: {} detections in {:.1} ms",
            self.id.name,
            detections.len(),
            t0.elapsed().as_secs_f32() * 1000.0
        );

        self.annotator.draw_detections(&mut image, &detections);
        info!(
            "Image {} [{}]: {}",
            path.display(),
            self.id.name,
            if detections.is_empty() { "no objects".to_string() } else { summarize_detections(&detections) }
        );
        Ok(AnnotatedImage { image, detections })
    }

    /// Annotates one live frame in place: boxes, center coordinates and
    /// the line from the frame center to each detection.
    pub fn predict_web_cam(&mut self, frame: &mut RgbImage) -> DomainResult<Vec<Detection>> {
        let detections = self.get_detections(frame)?;
        self.annotator.draw_detections(frame, &detections);
        self.annotator.draw_center_overlay(frame, &detections);
        Ok(detections)
    }

    /// Annotates every frame of `source` and encodes the result to `target`.
    pub fn predict_video(&mut self, source: &Path, target: &Path) -> DomainResult<VideoReport> {
        let (mut reader, info) = self.codec.open_reader(source)?;
        info!(
            "Video {} ({}x{} @ {:.2} fps) -> {} [{}]",
            source.display(),
            info.width,
            info.height,
            info.fps,
            target.display(),
            self.id.name
        );
        let mut writer = self.codec.open_writer(target, &info)?;

        let started = Instant::now();
        let mut frames = 0u64;
        let mut total = 0u64;
        while let Some(mut frame) = reader.next_frame()? {
            let detections = self.get_detections(&frame)?;
            self.annotator.draw_detections(&mut frame, &detections);
            writer.write_frame(&frame)?;

            frames += 1;
            total += detections.len() as u64;
            if frames % PROGRESS_EVERY == 0 {
                let elapsed = started.elapsed().as_secs_f32().max(0.001);
                info!("{}: {} frames processed ({:.1} fps)", source.display(), frames, frames as f32 / elapsed);
            }
        }
        writer.finish()?;

        info!(
            "Video {} done: {} frames, {} detections in {:.1} s",
            source.display(),
            frames,
            total,
            started.elapsed().as_secs_f32()
        );
        Ok(VideoReport { frames, detections: total, target: target.to_path_buf() })
    }
}
