mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use futures_util::stream;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tower::ServiceExt;

use common::{fixture, jpeg_bytes, multipart_body, Fixture, BOUNDARY};
use flying_object_detector::adapters::http::router;

async fn send(fx: &Fixture, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let res = router(fx.state.clone()).oneshot(req).await.unwrap();
    let status = res.status();
    let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn send_json(fx: &Fixture, req: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(fx, req).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn upload(mode: &str, file_name: &str, bytes: &[u8]) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(format!("/api/upload?mode={mode}"))
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(multipart_body("file", file_name, bytes)))
        .unwrap()
}

fn detect(body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/api/detect")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn config_lists_models_and_modes() {
    let fx = fixture();
    let (status, body) = send_json(&fx, get("/api/config")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Flying Object Detection");
    assert_eq!(body["models"], json!(["tiny"]));
    assert_eq!(body["default_mode"], "video_file");
    let modes: Vec<&str> = body["modes"].as_array().unwrap().iter().map(|m| m["label"].as_str().unwrap()).collect();
    assert_eq!(modes, ["Webcam", "Video File", "Image File"]);
}

#[tokio::test]
async fn image_detection_renders_and_writes_nothing_to_outputs() {
    let fx = fixture();
    let jpeg = jpeg_bytes(64, 48);

    let (status, saved) = send_json(&fx, upload("image_file", "cat.jpg", &jpeg)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved, json!({ "file": "cat.jpg", "bytes": jpeg.len() }));
    assert_eq!(std::fs::read(fx.sources().join("cat.jpg")).unwrap(), jpeg);

    let (status, body) = send_json(&fx, detect(json!({ "mode": "image_file", "model": "tiny", "file": "cat.jpg" }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["mode"], "image_file");
    assert_eq!((body["width"].as_u64(), body["height"].as_u64()), (Some(64), Some(48)));
    assert_eq!(body["summary"], "1 bird");
    assert!(body["image"].as_str().unwrap().starts_with("data:image/jpeg;base64,"));

    assert_eq!(std::fs::read_dir(fx.outputs()).unwrap().count(), 0);
}

#[tokio::test]
async fn video_detection_writes_prefixed_output_and_playback_copy() {
    let fx = fixture();
    let (status, _) = send_json(&fx, upload("video_file", "clip.avi", b"not really a video")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send_json(&fx, detect(json!({ "mode": "video_file", "model": "tiny", "file": "clip.avi" }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["frames"], 5);
    assert_eq!(body["detections"], 5);
    assert_eq!(body["output"], "detected - clip.avi");
    assert_eq!(body["playback"], "playback/detected - clip.mp4");
    assert!(fx.outputs().join("detected - clip.avi").is_file());
    assert!(fx.outputs().join("playback").join("detected - clip.mp4").is_file());

    let (status, media) = send(&fx, get("/media/detected%20-%20clip.avi")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(media.len(), 5);
}

#[tokio::test]
async fn large_upload_arriving_in_pieces_is_stored_intact() {
    let fx = fixture();
    let video: Vec<u8> = (0..=250u8).cycle().take(3 * 1024 * 1024 + 5).collect();
    let body = multipart_body("file", "flight.mp4", &video);
    let pieces: Vec<Vec<u8>> = body.chunks(64 * 1024).map(<[u8]>::to_vec).collect();
    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/upload?mode=video_file")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from_stream(stream::iter(pieces.into_iter().map(Ok::<_, std::io::Error>))))
        .unwrap();

    let (status, saved) = send_json(&fx, req).await;
    assert_eq!(status, StatusCode::OK, "{saved}");
    assert_eq!(saved, json!({ "file": "flight.mp4", "bytes": video.len() }));
    assert_eq!(std::fs::read(fx.sources().join("flight.mp4")).unwrap(), video);
}

#[tokio::test]
async fn uploads_outside_the_allow_list_are_rejected() {
    let fx = fixture();
    let (status, body) = send_json(&fx, upload("image_file", "clip.mp4", b"data")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("clip.mp4"));

    let (status, _) = send_json(&fx, upload("video_file", "notes.txt", b"data")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send_json(&fx, upload("webcam", "cat.jpg", b"data")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(std::fs::read_dir(fx.sources()).unwrap().count(), 0);
}

#[tokio::test]
async fn unknown_model_and_missing_upload_are_reported() {
    let fx = fixture();
    send_json(&fx, upload("image_file", "cat.jpg", &jpeg_bytes(16, 16))).await;

    let (status, body) = send_json(&fx, detect(json!({ "mode": "image_file", "model": "huge", "file": "cat.jpg" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("huge"));

    let (status, _) = send_json(&fx, detect(json!({ "mode": "image_file", "model": "tiny", "file": "dog.jpg" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&fx, detect(json!({ "mode": "radar", "model": "tiny" }))).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn webcam_session_streams_snapshots_until_stopped() {
    let fx = fixture();
    let (status, _) = send(&fx, get("/api/webcam/snapshot")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send_json(&fx, detect(json!({ "mode": "webcam", "model": "tiny" }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["stream"], "/ws/stream");

    let deadline = Instant::now() + Duration::from_secs(5);
    while fx.state.webcam.snapshot().is_none() {
        assert!(Instant::now() < deadline, "no webcam frame published");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let (status, jpeg) = send(&fx, get("/api/webcam/snapshot")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

    let stop = Request::builder().method(Method::POST).uri("/api/webcam/stop").body(Body::empty()).unwrap();
    let (status, body) = send_json(&fx, stop).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stopped"], true);
    assert!(!fx.state.webcam.is_running());
}

#[tokio::test]
async fn static_page_is_served_at_the_root() {
    let fx = fixture();
    let (status, body) = send(&fx, get("/index.html")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("Flying Object Detection"));
}
