use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::state::AppState;
use crate::ws::orchestrator::Orchestrator;
use crate::ws::protocol::{ClientEvent, Outbound, PLAYBACK_FINISHED};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id = Uuid::new_v4().to_string();
    run_session(socket, state, session_id).await;
}

#[tracing::instrument(name = "ws_session", skip(socket, state))]
async fn run_session(socket: WebSocket, state: Arc<AppState>, session_id: String) {
    info!("Voice session connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(64);
    let (caller_tx, caller_rx) = mpsc::channel::<ClientEvent>(64);

    // Writer task: serializes outbound frames onto the socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let message = match frame {
                Outbound::Message(msg) => match serde_json::to_string(&msg) {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        error!(error = %e, "Failed to serialize outbound frame");
                        continue;
                    }
                },
                Outbound::Audio(audio) => Message::Binary(audio),
            };
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    // Reader task: classifies inbound frames for the orchestrator.
    let reader_session_id = session_id.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_rx.next().await {
            let event = match message {
                Message::Binary(data) => ClientEvent::Audio(data),
                Message::Text(text) if text.as_str() == PLAYBACK_FINISHED => {
                    ClientEvent::PlaybackFinished
                }
                Message::Text(text) => ClientEvent::Text(text.to_string()),
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => continue,
            };
            if caller_tx.send(event).await.is_err() {
                break;
            }
        }
        // Dropping caller_tx tells the orchestrator the caller is gone.
        info!(session_id = %reader_session_id, "Caller stream ended");
    });

    let orchestrator = Orchestrator::new(
        session_id.clone(),
        state.recognizer.clone(),
        state.chat.clone(),
        state.synth.clone(),
        state.tokens.clone(),
        &state.config.system_prompt,
    );
    if let Err(e) = orchestrator.run(caller_rx, out_tx).await {
        error!(error = %e, "Session failed");
    }

    reader.abort();
    // out_tx is gone, so the writer drains its queue and closes the socket.
    let _ = writer.await;
    info!("Voice session closed");
}
