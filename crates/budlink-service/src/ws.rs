//! WebSocket link to the radio bridge.
//!
//! Every connected client receives scheduler events (tagged by `type`) and
//! host commands (tagged by `command`) as JSON text frames. Clients report
//! link events back as [`LinkReport`] frames; anything else is ignored.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::{AppState, LinkReport};

/// Create the WebSocket router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/ws", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn encode<T: Serialize>(value: &T) -> Option<Message> {
    match serde_json::to_string(value) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!("Failed to serialize WebSocket frame: {}", e);
            None
        }
    }
}

fn parse_report(text: &str) -> Option<LinkReport> {
    match serde_json::from_str(text) {
        Ok(report) => Some(report),
        Err(e) => {
            debug!("Ignoring WebSocket frame: {}", e);
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before anything else so no command issued meanwhile is lost
    let mut events = state.handle.subscribe();
    let mut commands = state.bridge.subscribe();

    info!("Radio bridge connected");

    let mut send_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => encode(&event),
                    Err(RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged, {} events dropped", n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                command = commands.recv() => match command {
                    Ok(command) => encode(&command),
                    Err(RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged, {} host commands dropped", n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            if let Some(frame) = frame
                && sender.send(frame).await.is_err()
            {
                break;
            }
        }
    });

    let reporter = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    let Some(report) = parse_report(text.as_str()) else {
                        continue;
                    };
                    if let Err(e) = reporter.report_link(report).await {
                        warn!("Failed to route link report: {}", e);
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
        },
    }

    info!("Radio bridge disconnected");
}
