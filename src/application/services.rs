use base64::{prelude::BASE64_STANDARD, Engine};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::{
    application::{
        dto::{DetectRequest, DetectResponse, SavedUpload},
        model::Model,
        ports::{DetectorLoaderPort, ModelCatalogPort, UploadSink, UploadStorePort, VideoCodecPort},
        render::{encode_jpeg, Annotator},
        webcam::WebcamService,
    },
    config::{PathSettings, DETECTED_PREFIX},
    domain::{
        errors::{DomainError, DomainResult},
        mode::DetectionMode,
        model::YoloParams,
        stream::summarize_detections,
    },
};

pub type SharedModel = Arc<Mutex<Model>>;

const PLAYBACK_DIR: &str = "playback";
const BROWSER_VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v"];

pub fn lock_model(model: &SharedModel) -> DomainResult<MutexGuard<'_, Model>> {
    model
        .lock()
        .map_err(|_| DomainError::OperationFailed("model lock poisoned".into()))
}

/// Runs blocking work (inference, codecs, camera) off the async runtime.
pub async fn run_blocking<T, F>(f: F) -> DomainResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> DomainResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DomainError::OperationFailed(format!("worker task failed: {e}")))?
}

/// Reduces a client-supplied name to its last path component.
pub fn upload_name(raw: &str) -> DomainResult<String> {
    Path::new(raw.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DomainError::Upload(format!("invalid file name {raw:?}")))
}

/// Loads model variants on first use and keeps them for the process lifetime.
pub struct ModelRegistry {
    catalog: Arc<dyn ModelCatalogPort>,
    loader: Arc<dyn DetectorLoaderPort>,
    codec: Arc<dyn VideoCodecPort>,
    annotator: Arc<Annotator>,
    params: YoloParams,
    loaded: Mutex<HashMap<String, SharedModel>>,
}

impl ModelRegistry {
    pub fn new(
        catalog: Arc<dyn ModelCatalogPort>,
        loader: Arc<dyn DetectorLoaderPort>,
        codec: Arc<dyn VideoCodecPort>,
        annotator: Arc<Annotator>,
        params: YoloParams,
    ) -> Self {
        Self { catalog, loader, codec, annotator, params, loaded: Mutex::new(HashMap::new()) }
    }

    pub fn variants(&self) -> Vec<String> {
        self.catalog.variants()
    }

    fn loaded(&self) -> DomainResult<MutexGuard<'_, HashMap<String, SharedModel>>> {
        self.loaded
            .lock()
            .map_err(|_| DomainError::OperationFailed("model registry lock poisoned".into()))
    }

    pub async fn get(&self, variant: &str) -> DomainResult<SharedModel> {
        let cached = self.loaded()?.get(variant).cloned();
        if let Some(model) = cached {
            return Ok(model);
        }

        let id = self.catalog.resolve(variant)?;
        self.catalog.validate_model(&id).await?;

        info!("Loading model variant {} from {}", id.name, id.onnx_path);
        let loader = self.loader.clone();
        let load_id = id.clone();
        let detector = run_blocking(move || loader.load(&load_id)).await?;

        let model = Arc::new(Mutex::new(Model::new(
            id,
            detector,
            self.params.clone(),
            self.annotator.clone(),
            self.codec.clone(),
        )));
        // A concurrent request may have loaded the same variant meanwhile; keep the first.
        Ok(self.loaded()?.entry(variant.to_string()).or_insert(model).clone())
    }
}

/// Stores uploads under the configured sources directory.
pub struct UploadService {
    store: Arc<dyn UploadStorePort>,
    paths: PathSettings,
}

impl UploadService {
    pub fn new(store: Arc<dyn UploadStorePort>, paths: PathSettings) -> Self {
        Self { store, paths }
    }

    /// Validates the name against `mode` and opens the destination under SOURCES.
    pub async fn begin(&self, mode: DetectionMode, raw_name: &str) -> DomainResult<PendingUpload> {
        match mode {
            DetectionMode::Webcam => {
                return Err(DomainError::Upload("webcam mode takes no file upload".into()));
            }
            DetectionMode::VideoFile | DetectionMode::ImageFile => {}
        }

        let file = upload_name(raw_name)?;
        if !mode.accepts(&file) {
            return Err(DomainError::Upload(format!(
                "{file} is not accepted in {} mode (allowed: {})",
                mode.label(),
                mode.allowed_extensions().join(", ")
            )));
        }

        let dest = self.paths.source_path(&file);
        let sink = self.store.create(&dest).await?;
        Ok(PendingUpload { file, dest, sink })
    }
}

/// An accepted upload whose body is still arriving.
pub struct PendingUpload {
    file: String,
    dest: PathBuf,
    sink: Box<dyn UploadSink>,
}

impl PendingUpload {
    pub async fn write(&mut self, chunk: &[u8]) -> DomainResult<()> {
        self.sink.write_chunk(chunk).await
    }

    pub async fn finish(self) -> DomainResult<SavedUpload> {
        let written = self.sink.finish().await?;
        info!("Stored upload {} ({} bytes)", self.dest.display(), written);
        Ok(SavedUpload { file: self.file, bytes: written })
    }

    /// Drops the partial file after a failed transfer.
    pub async fn discard(self) {
        warn!("Discarding partial upload {}", self.dest.display());
        self.sink.abort().await;
    }
}

/// Dispatches a detect request to the image, video or webcam flow.
pub struct DetectionService {
    registry: Arc<ModelRegistry>,
    webcam: Arc<WebcamService>,
    codec: Arc<dyn VideoCodecPort>,
    paths: PathSettings,
}

impl DetectionService {
    pub fn new(
        registry: Arc<ModelRegistry>,
        webcam: Arc<WebcamService>,
        codec: Arc<dyn VideoCodecPort>,
        paths: PathSettings,
    ) -> Self {
        Self { registry, webcam, codec, paths }
    }

    pub fn variants(&self) -> Vec<String> {
        self.registry.variants()
    }

    pub async fn detect(&self, request: DetectRequest) -> DomainResult<DetectResponse> {
        match request {
            DetectRequest::Webcam { model } => self.detect_webcam(model).await,
            DetectRequest::VideoFile { model, file } => self.detect_video(model, &file).await,
            DetectRequest::ImageFile { model, file } => self.detect_image(model, &file).await,
        }
    }

    fn existing_source(&self, raw_name: &str) -> DomainResult<(String, PathBuf)> {
        let file = upload_name(raw_name)?;
        let source = self.paths.source_path(&file);
        if !source.is_file() {
            return Err(DomainError::NotFound(format!("upload {file} not found, upload it first")));
        }
        Ok((file, source))
    }

    async fn detect_image(&self, variant: String, raw_name: &str) -> DomainResult<DetectResponse> {
        let (_, source) = self.existing_source(raw_name)?;
        let model = self.registry.get(&variant).await?;

        let (annotated, jpeg) = run_blocking(move || {
            let annotated = lock_model(&model)?.predict_image(&source)?;
            let jpeg = encode_jpeg(&annotated.image, 90)?;
            Ok((annotated, jpeg))
        })
        .await?;

        Ok(DetectResponse::ImageFile {
            model: variant,
            width: annotated.image.width(),
            height: annotated.image.height(),
            summary: summarize_detections(&annotated.detections),
            detections: annotated.detections,
            image: format!("data:image/jpeg;base64,{}", BASE64_STANDARD.encode(jpeg)),
        })
    }

    async fn detect_video(&self, variant: String, raw_name: &str) -> DomainResult<DetectResponse> {
        let (file, source) = self.existing_source(raw_name)?;
        let target = self.paths.output_path(&file);
        std::fs::create_dir_all(&self.paths.outputs).map_err(|e| {
            DomainError::OperationFailed(format!("cannot create {}: {e}", self.paths.outputs.display()))
        })?;
        let model = self.registry.get(&variant).await?;

        let output = format!("{DETECTED_PREFIX}{file}");
        let playback = playback_name(&output);
        let playback_path = self.paths.outputs.join(&playback);
        let codec = self.codec.clone();

        let report = run_blocking(move || {
            let report = lock_model(&model)?.predict_video(&source, &target)?;
            if playback_path != target {
                if let Some(dir) = playback_path.parent() {
                    std::fs::create_dir_all(dir).map_err(|e| {
                        DomainError::OperationFailed(format!("cannot create {}: {e}", dir.display()))
                    })?;
                }
                codec.transcode_for_browser(&target, &playback_path)?;
            }
            Ok(report)
        })
        .await?;

        Ok(DetectResponse::VideoFile {
            model: variant,
            frames: report.frames,
            detections: report.detections,
            output,
            playback,
        })
    }

    async fn detect_webcam(&self, variant: String) -> DomainResult<DetectResponse> {
        let model = self.registry.get(&variant).await?;
        let webcam = self.webcam.clone();
        let start_variant = variant.clone();
        run_blocking(move || webcam.start(&start_variant, model)).await?;

        Ok(DetectResponse::Webcam {
            model: variant,
            stream: "/ws/stream".into(),
            snapshot: "/api/webcam/snapshot".into(),
        })
    }
}

/// Name, relative to OUTPUTS, of the file the browser should play for `output`.
pub fn playback_name(output: &str) -> String {
    let path = Path::new(output);
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if BROWSER_VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        return output.to_string();
    }
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(output);
    format!("{PLAYBACK_DIR}/{stem}.mp4")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Default)]
    struct Recorded {
        created: Vec<PathBuf>,
        chunks: Vec<usize>,
        aborted: bool,
    }

    struct RecordingStore(Arc<Mutex<Recorded>>);

    struct RecordingSink(Arc<Mutex<Recorded>>);

    #[async_trait]
    impl UploadStorePort for RecordingStore {
        async fn create(&self, dest: &Path) -> DomainResult<Box<dyn UploadSink>> {
            self.0.lock().unwrap().created.push(dest.to_path_buf());
            Ok(Box::new(RecordingSink(self.0.clone())))
        }
    }

    #[async_trait]
    impl UploadSink for RecordingSink {
        async fn write_chunk(&mut self, chunk: &[u8]) -> DomainResult<()> {
            self.0.lock().unwrap().chunks.push(chunk.len());
            Ok(())
        }

        async fn finish(self: Box<Self>) -> DomainResult<u64> {
            Ok(self.0.lock().unwrap().chunks.iter().sum::<usize>() as u64)
        }

        async fn abort(self: Box<Self>) {
            self.0.lock().unwrap().aborted = true;
        }
    }

    fn upload_service() -> (UploadService, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let paths = PathSettings {
            sources: PathBuf::from("in"),
            outputs: PathBuf::from("out"),
            weights: PathBuf::from("weights"),
            font: None,
            static_dir: PathBuf::from("static"),
        };
        (UploadService::new(Arc::new(RecordingStore(recorded.clone())), paths), recorded)
    }

    #[tokio::test]
    async fn upload_is_written_chunk_by_chunk_under_sources() {
        let (uploads, recorded) = upload_service();
        let mut pending = uploads.begin(DetectionMode::VideoFile, "dir/clip.mp4").await.unwrap();
        for chunk in [vec![0u8; 4096], vec![1u8; 4096], vec![2u8; 10]] {
            pending.write(&chunk).await.unwrap();
        }
        let saved = pending.finish().await.unwrap();

        assert_eq!(saved, SavedUpload { file: "clip.mp4".into(), bytes: 8202 });
        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.created, vec![PathBuf::from("in").join("clip.mp4")]);
        assert_eq!(recorded.chunks, vec![4096, 4096, 10]);
    }

    #[tokio::test]
    async fn rejected_uploads_never_open_a_file() {
        let (uploads, recorded) = upload_service();
        assert!(matches!(uploads.begin(DetectionMode::Webcam, "cat.jpg").await, Err(DomainError::Upload(_))));
        assert!(matches!(uploads.begin(DetectionMode::ImageFile, "clip.mp4").await, Err(DomainError::Upload(_))));
        assert!(recorded.lock().unwrap().created.is_empty());
    }

    #[tokio::test]
    async fn discarded_upload_is_aborted() {
        let (uploads, recorded) = upload_service();
        let mut pending = uploads.begin(DetectionMode::ImageFile, "cat.jpg").await.unwrap();
        pending.write(b"partial").await.unwrap();
        pending.discard().await;
        assert!(recorded.lock().unwrap().aborted);
    }

    #[test]
    fn upload_names_lose_directories() {
        assert_eq!(upload_name("cat.jpg").unwrap(), "cat.jpg");
        assert_eq!(upload_name("../../etc/cat.jpg").unwrap(), "cat.jpg");
        assert_eq!(upload_name(" clip one.mp4 ").unwrap(), "clip one.mp4");
        assert!(upload_name("").is_err());
        assert!(upload_name("..").is_err());
        assert!(upload_name("/").is_err());
    }

    #[test]
    fn browser_ready_outputs_play_directly() {
        assert_eq!(playback_name("detected - clip.mp4"), "detected - clip.mp4");
        assert_eq!(playback_name("detected - clip.M4V"), "detected - clip.M4V");
        assert_eq!(playback_name("detected - clip.avi"), "playback/detected - clip.mp4");
        assert_eq!(playback_name("detected - clip.mkv"), "playback/detected - clip.mp4");
    }
}
