use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use flying_object_detector::adapters::{
    ffmpeg::video::FfmpegCodec,
    fs::upload_store::FsUploadStore,
    http::{router, state::{Adapters, HttpState}},
    onnx::{model_catalog::OnnxModelCatalog, yolo_engine::OnnxDetectorLoader},
    v4l2::capture::V4l2Camera,
};
use flying_object_detector::config::{Settings, DEFAULT_CONFIG_PATH};

#[derive(Parser, Debug)]
#[command(name = "flying-object-detector", about = "Flying Object Detection web demo")]
struct Cli {
    /// YAML settings file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
    /// Listen address, overrides SERVER.BIND
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config).with_context(|| format!("loading {}", cli.config))?;

    for dir in [&settings.paths.sources, &settings.paths.outputs] {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let adapters = Adapters {
        catalog: Arc::new(OnnxModelCatalog::from_settings(&settings)),
        loader: Arc::new(OnnxDetectorLoader::new(settings.classes.clone())),
        codec: Arc::new(FfmpegCodec::new()),
        camera: Arc::new(V4l2Camera::new()),
        store: Arc::new(FsUploadStore::new()),
    };

    let addr = cli.bind.clone().unwrap_or_else(|| settings.server.bind.clone());
    let state = HttpState::assemble(settings, adapters);
    let webcam = state.webcam.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("Flying Object Detection listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
            // Release the capture device before exit.
            if let Err(e) = tokio::task::spawn_blocking(move || webcam.stop()).await {
                tracing::error!("Webcam shutdown failed: {}", e);
            }
        })
        .await?;

    Ok(())
}
