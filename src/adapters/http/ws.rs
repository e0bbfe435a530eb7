use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::adapters::http::state::HttpState;
use crate::application::webcam::WebcamEvent;
use crate::domain::stream::{WsErrorMessage, WsFrameMetaMessage};

pub async fn ws_handler(ws: WebSocketUpgrade, State(st): State<HttpState>) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, st))
}

/// Forwards webcam events until either side goes away. Each frame is a JSON
/// metadata message followed by the JPEG; a failed session sends one error message.
async fn handle_socket(mut socket: WebSocket, st: HttpState) {
    let mut rx = st.webcam.subscribe();

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            event = rx.recv() => match event {
                Ok(event) => {
                    if send_event(&mut socket, event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("WebSocket client lagging, skipped {} frames", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("WebSocket client gone");
}

async fn send_event(socket: &mut WebSocket, event: WebcamEvent) -> Result<(), axum::Error> {
    match event {
        WebcamEvent::Frame { meta, jpeg } => {
            let json = serde_json::to_string(&WsFrameMetaMessage { r#type: "frame".into(), meta }).unwrap_or_default();
            socket.send(Message::Text(json)).await?;
            socket.send(Message::Binary(jpeg)).await
        }
        WebcamEvent::Failed(message) => {
            let json = serde_json::to_string(&WsErrorMessage { r#type: "error".into(), message }).unwrap_or_default();
            socket.send(Message::Text(json)).await
        }
    }
}
