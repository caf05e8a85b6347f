//! Real-time events channel.
//!
//! Full-duplex text stream at `/ws`: the server pushes event lines as
//! they occur; client messages are ignored. Each connection gets its own
//! bus subscription, so a slow client only ever loses its own events.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use tracing::{debug, warn};

use steer_events::EventSubscriber;

use crate::state::AppState;

/// GET /ws
pub async fn events_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let subscriber = state.events().subscribe();
    ws.on_upgrade(move |socket| handle_events_socket(socket, subscriber))
}

async fn handle_events_socket(mut socket: WebSocket, mut events: EventSubscriber) {
    debug!("Events subscriber connected");

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else {
                    break;
                };
                if socket.send(Message::Text(event.message.into())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    // Client messages are ignored.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                }
            }
        }
    }

    debug!("Events subscriber disconnected");
}
