use anyhow::Result;
use image::{imageops::FilterType, RgbImage};
use ndarray::{s, Array4, ArrayView2, ArrayViewD, Axis, Ix2, IxDyn};
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::{builder::SessionBuilder, Session};
use ort::value::Tensor;
use std::fs;
use std::sync::Arc;
use tracing::debug;

use crate::application::ports::{DetectorLoaderPort, DetectorPort};
use crate::domain::detection::Detection;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::model::{ModelId, YoloParams};

/// YOLOv8/YOLO11 style detector: one `[1, 4 + classes, candidates]` output.
pub struct OnnxYoloEngine {
    session: Session,
    classes: Arc<[String]>,
}

impl OnnxYoloEngine {
    pub fn load(path: &str, classes: Arc<[String]>) -> Result<Self> {
        let model_bytes = fs::read(path)?;
        let session = session_builder()?.commit_from_memory(&model_bytes)?;
        Ok(Self { session, classes })
    }

    pub fn run(&mut self, rgb: &RgbImage, params: &YoloParams) -> Result<Vec<Detection>> {
        let imgsz = params.input_size as usize;
        let resized = image::imageops::resize(rgb, imgsz as u32, imgsz as u32, FilterType::Triangle);

        let mut input = Array4::<f32>::zeros((1, 3, imgsz, imgsz));
        for (x, y, pixel) in resized.enumerate_pixels() {
            input[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
            input[[0, 1, y as usize, x as usize]] = pixel[1] as f32 / 255.0;
            input[[0, 2, y as usize, x as usize]] = pixel[2] as f32 / 255.0;
        }

        let input_shape = vec![1i64, 3, imgsz as i64, imgsz as i64];
        let (data, _) = input.into_raw_vec_and_offset();
        let input_tensor = Tensor::from_array((input_shape, data))?;

        let outputs = self.session.run(ort::inputs![input_tensor])?;
        let (shape_out, data_out) = outputs[0].try_extract_tensor::<f32>()?;

        let dims: Vec<usize> = shape_out.iter().map(|&x| x as usize).collect();
        let array_view = ArrayViewD::from_shape(IxDyn(&dims), data_out)?;
        let view = array_view.index_axis(Axis(0), 0).into_dimensionality::<Ix2>()?;

        Ok(decode_predictions(view, (rgb.width(), rgb.height()), params, &self.classes))
    }
}

impl DetectorPort for OnnxYoloEngine {
    fn infer(&mut self, rgb: &RgbImage, params: &YoloParams) -> DomainResult<Vec<Detection>> {
        self.run(rgb, params)
            .map_err(|e| DomainError::Inference(format!("YOLO inference failed: {e}")))
    }
}

/// CPU session builder with CUDA registered when the runtime offers it.
fn session_builder() -> ort::Result<SessionBuilder> {
    let builder = Session::builder()?.with_intra_threads(4)?;
    let cuda = CUDAExecutionProvider::default().build();
    match builder.clone().with_execution_providers([cuda]) {
        Ok(with_cuda) => Ok(with_cuda),
        Err(e) => {
            debug!("CUDA execution provider unavailable, running on CPU: {e}");
            Ok(builder)
        }
    }
}

pub struct OnnxDetectorLoader {
    classes: Arc<[String]>,
}

impl OnnxDetectorLoader {
    pub fn new(classes: Vec<String>) -> Self {
        Self { classes: classes.into() }
    }
}

impl DetectorLoaderPort for OnnxDetectorLoader {
    fn load(&self, model: &ModelId) -> DomainResult<Box<dyn DetectorPort>> {
        let engine = OnnxYoloEngine::load(&model.onnx_path, self.classes.clone()).map_err(|e| {
            DomainError::Inference(format!("cannot load {} from {}: {e}", model.name, model.onnx_path))
        })?;
        Ok(Box::new(engine))
    }
}

/// Turns a `[4 + classes, candidates]` prediction matrix into frame-space detections.
/// Rows 0..4 are center x, center y, width, height in model input pixels.
pub fn decode_predictions(
    view: ArrayView2<f32>,
    frame: (u32, u32),
    params: &YoloParams,
    classes: &[String],
) -> Vec<Detection> {
    let (rows, num_candidates) = view.dim();
    if rows <= 4 {
        return Vec::new();
    }
    let imgsz = params.input_size.max(1) as f32;
    let sx = frame.0 as f32 / imgsz;
    let sy = frame.1 as f32 / imgsz;

    let mut candidates = Vec::new();
    for i in 0..num_candidates {
        let scores = view.slice(s![4.., i]);
        let Some((class_id, &max_score)) = scores.indexed_iter().max_by(|(_, a), (_, b)| a.total_cmp(b)) else {
            continue;
        };
        if max_score <= params.conf_threshold {
            continue;
        }

        let cx = view[[0, i]];
        let cy = view[[1, i]];
        let w = view[[2, i]];
        let h = view[[3, i]];

        candidates.push(Detection {
            x1: (cx - w / 2.0) * sx,
            y1: (cy - h / 2.0) * sy,
            x2: (cx + w / 2.0) * sx,
            y2: (cy + h / 2.0) * sy,
            score: max_score,
            class_id,
            label: classes.get(class_id).cloned().unwrap_or_else(|| format!("class {class_id}")),
        });
    }

    non_max_suppression(candidates, params.iou_threshold, params.max_detections)
}

/// Greedy per-class NMS; output sorted by descending score.
pub fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32, max_detections: usize) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Detection> = Vec::new();
    for cand in candidates {
        if kept.len() >= max_detections {
            break;
        }
        if kept.iter().any(|k| k.class_id == cand.class_id && k.iou(&cand) > iou_threshold) {
            continue;
        }
        kept.push(cand);
    }
    kept
}
