use std::sync::Arc;

use crate::application::ports::{
    CameraPort, DetectorLoaderPort, ModelCatalogPort, UploadStorePort, VideoCodecPort,
};
use crate::application::render::Annotator;
use crate::application::services::{DetectionService, ModelRegistry, UploadService};
use crate::application::webcam::WebcamService;
use crate::config::Settings;

/// Shared state for the axum handlers: the use-case services plus the settings they were built from.
#[derive(Clone)]
pub struct HttpState {
    pub settings: Arc<Settings>,
    /// Image, video and webcam detection.
    pub detection: Arc<DetectionService>,
    /// Upload validation and persistence.
    pub uploads: Arc<UploadService>,
    /// Live webcam session, also read by the WebSocket stream.
    pub webcam: Arc<WebcamService>,
}

/// Infrastructure implementations of the application ports.
pub struct Adapters {
    pub catalog: Arc<dyn ModelCatalogPort>,
    pub loader: Arc<dyn DetectorLoaderPort>,
    pub codec: Arc<dyn VideoCodecPort>,
    pub camera: Arc<dyn CameraPort>,
    pub store: Arc<dyn UploadStorePort>,
}

impl HttpState {
    pub fn assemble(settings: Settings, adapters: Adapters) -> Self {
        let annotator = Arc::new(Annotator::from_font_file(settings.paths.font.as_deref()));
        let registry = Arc::new(ModelRegistry::new(
            adapters.catalog,
            adapters.loader,
            adapters.codec.clone(),
            annotator,
            settings.detection.clone(),
        ));
        let webcam = Arc::new(WebcamService::new(adapters.camera, &settings.webcam));
        let detection = Arc::new(DetectionService::new(
            registry,
            webcam.clone(),
            adapters.codec,
            settings.paths.clone(),
        ));
        let uploads = Arc::new(UploadService::new(adapters.store, settings.paths.clone()));

        Self { settings: Arc::new(settings), detection, uploads, webcam }
    }
}
