use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::handlers::{self, ConnectionContext};
use super::messages::{ClientMessage, ServerMessage};
use super::AppEnv;

const LOG_TARGET: &str = "server::ws";

pub async fn ws_handler(State(env): State<Arc<AppEnv>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(env, socket))
}

/// One long-lived read task per connection, plus a writer task fed by
/// the connection's outbound queue. Validation failures are answered
/// with an `error` message; only transport failures end the session.
async fn handle_socket(env: Arc<AppEnv>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (sender, mut outbox) = mpsc::unbounded_channel::<ServerMessage>();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbox.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(err) => {
                    warn!(target: LOG_TARGET, %err, "failed to encode outbound message");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut ctx = ConnectionContext::new(sender);
    info!(
        target: LOG_TARGET,
        connection_id = %ctx.connection_id,
        player_id = %ctx.player_id,
        "connection opened"
    );

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                debug!(target: LOG_TARGET, %err, "read error; closing");
                break;
            }
        };
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(parsed) => handlers::dispatch(&env, &mut ctx, parsed).await,
                Err(err) => {
                    debug!(target: LOG_TARGET, %err, "unparseable client message");
                    let _ = ctx
                        .sender
                        .send(ServerMessage::error("Invalid message format"));
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    handlers::handle_disconnect(&env, &mut ctx).await;
    writer.abort();
    info!(
        target: LOG_TARGET,
        connection_id = %ctx.connection_id,
        "connection closed"
    );
}
