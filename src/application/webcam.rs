use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, TryLockError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::application::ports::{CameraPort, FrameSource};
use crate::application::render::encode_jpeg;
use crate::application::services::SharedModel;
use crate::config::WebcamSettings;
use crate::domain::{
    camera::{CameraId, CameraMode},
    errors::{DomainError, DomainResult},
    stream::FrameMeta,
};

/// What subscribers of the live stream receive.
#[derive(Debug, Clone)]
pub enum WebcamEvent {
    Frame { meta: FrameMeta, jpeg: Vec<u8> },
    /// The session ended on its own after repeated failures.
    Failed(String),
}

const MAX_CONSECUTIVE_ERRORS: u32 = 50;
const ERROR_BACKOFF: Duration = Duration::from_millis(10);
const JPEG_QUALITY: u8 = 80;

struct WebcamSession {
    variant: String,
    stop: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

impl WebcamSession {
    fn shutdown(self) {
        self.stop.store(true, Ordering::Relaxed);
        if self.worker.join().is_err() {
            error!("Webcam worker for {} panicked", self.variant);
        }
    }
}

/// State the worker publishes and the handlers read without touching the session.
#[derive(Default)]
struct Published {
    running: AtomicBool,
    latest: RwLock<Option<Vec<u8>>>,
    last_error: RwLock<Option<String>>,
}

impl Published {
    fn set_latest(&self, jpeg: Option<Vec<u8>>) {
        if let Ok(mut slot) = self.latest.write() {
            *slot = jpeg;
        }
    }

    fn set_error(&self, message: Option<String>) {
        if let Ok(mut slot) = self.last_error.write() {
            *slot = message;
        }
    }
}

/// Live webcam detection. At most one session runs at a time; the capture
/// device is released when its worker thread returns.
pub struct WebcamService {
    camera: Arc<dyn CameraPort>,
    camera_id: CameraId,
    mode: CameraMode,
    tx: broadcast::Sender<WebcamEvent>,
    published: Arc<Published>,
    /// Serialises start and stop. Held across joins, never by readers.
    lifecycle: Mutex<()>,
    session: Mutex<Option<WebcamSession>>,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> DomainResult<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| DomainError::OperationFailed(format!("webcam {what} lock poisoned")))
}

impl WebcamService {
    pub fn new(camera: Arc<dyn CameraPort>, settings: &WebcamSettings) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            camera,
            camera_id: settings.camera(),
            mode: settings.mode(),
            tx,
            published: Arc::default(),
            lifecycle: Mutex::new(()),
            session: Mutex::new(None),
        }
    }

    /// Opens the camera and starts annotating frames with `model`.
    /// A running session for the same variant is left as is; any other is stopped first.
    pub fn start(&self, variant: &str, model: SharedModel) -> DomainResult<()> {
        let _lifecycle = lock(&self.lifecycle, "lifecycle")?;
        let previous = {
            let mut session = lock(&self.session, "session")?;
            if session
                .as_ref()
                .is_some_and(|s| s.variant == variant && !s.worker.is_finished())
            {
                return Ok(());
            }
            session.take()
        };
        if let Some(previous) = previous {
            info!("Webcam: stopping session for {}", previous.variant);
            previous.shutdown();
        }
        self.published.set_latest(None);
        self.published.set_error(None);

        let source = self.camera.open(&self.camera_id, &self.mode)?;
        let stop = Arc::new(AtomicBool::new(false));
        self.published.running.store(true, Ordering::SeqCst);
        let spawned = {
            let stop = stop.clone();
            let tx = self.tx.clone();
            let published = self.published.clone();
            let name = variant.to_string();
            std::thread::Builder::new()
                .name("webcam-worker".into())
                .spawn(move || run_worker(source, model, stop, tx, published, name))
        };
        let worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                self.published.running.store(false, Ordering::SeqCst);
                return Err(DomainError::OperationFailed(format!("cannot spawn webcam worker: {e}")));
            }
        };

        info!("Webcam: session started on {} with {}", self.camera_id.path, variant);
        *lock(&self.session, "session")? = Some(WebcamSession { variant: variant.to_string(), stop, worker });
        Ok(())
    }

    /// Stops the running session and waits for the device to be released.
    /// Returns whether there was a session to stop.
    pub fn stop(&self) -> DomainResult<bool> {
        let _lifecycle = lock(&self.lifecycle, "lifecycle")?;
        let previous = lock(&self.session, "session")?.take();
        let stopped = match previous {
            Some(session) => {
                session.shutdown();
                info!("Webcam: session stopped");
                true
            }
            None => false,
        };
        // After the join, so the worker cannot republish a frame.
        self.published.set_latest(None);
        self.published.set_error(None);
        Ok(stopped)
    }

    pub fn is_running(&self) -> bool {
        self.published.running.load(Ordering::SeqCst)
    }

    /// Why the last session ended by itself, until the next start or stop.
    pub fn last_error(&self) -> Option<String> {
        self.published.last_error.read().ok().and_then(|e| e.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WebcamEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Latest annotated JPEG of the current session, if it has produced one.
    pub fn snapshot(&self) -> Option<Vec<u8>> {
        self.published.latest.read().ok().and_then(|l| l.clone())
    }
}

fn run_worker(
    mut source: Box<dyn FrameSource>,
    model: SharedModel,
    stop: Arc<AtomicBool>,
    tx: broadcast::Sender<WebcamEvent>,
    published: Arc<Published>,
    variant: String,
) {
    info!("Webcam worker started ({})", variant);
    let mut fps_est: f32 = 0.0;
    let mut last_t = Instant::now();
    let mut errors = 0u32;
    let mut failure = None;

    while !stop.load(Ordering::Relaxed) {
        let mut frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("Webcam: end of stream");
                break;
            }
            Err(e) => {
                errors += 1;
                warn!("Webcam: frame capture failed: {}", e);
                if errors >= MAX_CONSECUTIVE_ERRORS {
                    failure = Some(format!("camera failed {errors} times in a row: {e}"));
                    break;
                }
                std::thread::sleep(ERROR_BACKOFF);
                continue;
            }
        };

        let t_infer = Instant::now();
        // A video job may hold the model for minutes; drop live frames meanwhile.
        let annotated = match model.try_lock() {
            Ok(mut m) => m.predict_web_cam(&mut frame),
            Err(TryLockError::WouldBlock) => {
                debug!("Webcam: model busy, frame skipped");
                continue;
            }
            Err(TryLockError::Poisoned(_)) => Err(DomainError::OperationFailed("model lock poisoned".into())),
        };
        let infer_ms = t_infer.elapsed().as_secs_f32() * 1000.0;
        let detections = match annotated {
            Ok(d) => d,
            Err(e) => {
                errors += 1;
                warn!("Webcam: inference failed: {}", e);
                if errors >= MAX_CONSECUTIVE_ERRORS {
                    failure = Some(format!("inference failed {errors} times in a row: {e}"));
                    break;
                }
                std::thread::sleep(ERROR_BACKOFF);
                continue;
            }
        };
        errors = 0;

        let dt = last_t.elapsed().as_secs_f32().max(0.001);
        last_t = Instant::now();
        fps_est = 0.9 * fps_est + 0.1 * (1.0 / dt);

        let jpeg = match encode_jpeg(&frame, JPEG_QUALITY) {
            Ok(j) => j,
            Err(e) => {
                warn!("Webcam: {}", e);
                continue;
            }
        };
        published.set_latest(Some(jpeg.clone()));

        let meta = FrameMeta { width: frame.width(), height: frame.height(), infer_ms, fps_est, detections };
        if tx.receiver_count() > 0 {
            let _ = tx.send(WebcamEvent::Frame { meta, jpeg });
        }
    }

    drop(source);
    if let Some(message) = failure {
        error!("Webcam session {} gave up: {}", variant, message);
        published.set_error(Some(message.clone()));
        let _ = tx.send(WebcamEvent::Failed(message));
    }
    published.running.store(false, Ordering::SeqCst);
    info!("Webcam worker finished, capture released ({})", variant);
}
