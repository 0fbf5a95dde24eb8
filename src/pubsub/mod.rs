use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::PlayerId;

const LOG_TARGET: &str = "pubsub";
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// What a state-change notice carries across replicas.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusPayload {
    /// Game state changed; other replicas should refresh their cache
    /// reads or re-project to their connected clients.
    GameStateUpdate { game_id: Uuid, sequence_num: i64 },
    PlayerJoined {
        player_id: PlayerId,
        player_name: String,
    },
    PlayerLeft { player_id: PlayerId },
    RoomClosed,
    Broadcast { message: JsonValue },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub room_code: String,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(flatten)]
    pub payload: BusPayload,
}

pub type MessageHandler = Arc<dyn Fn(BusMessage) -> BoxFuture<'static, ()> + Send + Sync>;

enum SubCommand {
    Subscribe(String),
    Unsubscribe(String),
}

/// Redis pub/sub fan-out with one channel per room
/// (`golf:room:{code}`). Publishers stamp their replica id and
/// subscribers drop their own messages. The listener resubscribes with
/// backoff on transport errors and surfaces nothing to callers.
pub struct GamePubSub {
    client: redis::Client,
    publisher: ConnectionManager,
    server_id: String,
    handlers: Arc<DashMap<String, Vec<MessageHandler>>>,
    commands: mpsc::UnboundedSender<SubCommand>,
    command_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<SubCommand>>>,
    listener: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl GamePubSub {
    pub async fn connect(
        redis_url: &str,
        server_id: impl Into<String>,
    ) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let publisher = ConnectionManager::new(client.clone()).await?;
        let (commands, command_rx) = mpsc::unbounded_channel();
        Ok(Self {
            client,
            publisher,
            server_id: server_id.into(),
            handlers: Arc::new(DashMap::new()),
            commands,
            command_rx: parking_lot::Mutex::new(Some(command_rx)),
            listener: parking_lot::Mutex::new(None),
        })
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    fn channel(room_code: &str) -> String {
        format!("golf:room:{room_code}")
    }

    /// Register a handler for a room's channel. The first handler for a
    /// channel triggers the actual Redis subscription.
    pub fn subscribe(&self, room_code: &str, handler: MessageHandler) {
        let channel = Self::channel(room_code);
        let mut entry = self.handlers.entry(channel.clone()).or_default();
        if entry.is_empty() {
            let _ = self.commands.send(SubCommand::Subscribe(channel.clone()));
            debug!(target: LOG_TARGET, %channel, "subscribing");
        }
        entry.push(handler);
    }

    pub fn unsubscribe(&self, room_code: &str) {
        let channel = Self::channel(room_code);
        if self.handlers.remove(&channel).is_some() {
            let _ = self.commands.send(SubCommand::Unsubscribe(channel.clone()));
            debug!(target: LOG_TARGET, %channel, "unsubscribed");
        }
    }

    /// Publish a message to the room's channel. Transport failures are
    /// logged, never propagated; the event log remains the source of
    /// truth and clients converge on the next successful broadcast.
    pub async fn publish(&self, mut message: BusMessage) -> usize {
        message.sender_id = Some(self.server_id.clone());
        let channel = Self::channel(&message.room_code);
        let payload = match serde_json::to_string(&message) {
            Ok(payload) => payload,
            Err(err) => {
                error!(target: LOG_TARGET, %err, "failed to encode bus message");
                return 0;
            }
        };
        let mut conn = self.publisher.clone();
        match redis::cmd("PUBLISH")
            .arg(&channel)
            .arg(payload)
            .query_async::<i64>(&mut conn)
            .await
        {
            Ok(receivers) => receivers.max(0) as usize,
            Err(err) => {
                warn!(target: LOG_TARGET, %channel, %err, "publish failed");
                0
            }
        }
    }

    /// Spawn the listener task. Idempotent; the second call is a no-op.
    pub fn start(&self) {
        let mut listener = self.listener.lock();
        if listener.is_some() {
            return;
        }
        let Some(command_rx) = self.command_rx.lock().take() else {
            return;
        };
        let client = self.client.clone();
        let handlers = Arc::clone(&self.handlers);
        let server_id = self.server_id.clone();
        *listener = Some(tokio::spawn(listen_loop(
            client, handlers, server_id, command_rx,
        )));
        info!(target: LOG_TARGET, "listener started");
    }

    pub fn stop(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
            info!(target: LOG_TARGET, "listener stopped");
        }
    }
}

enum Wake {
    Message(redis::Msg),
    Command(SubCommand),
    StreamClosed,
    CommandsClosed,
}

async fn listen_loop(
    client: redis::Client,
    handlers: Arc<DashMap<String, Vec<MessageHandler>>>,
    server_id: String,
    mut commands: mpsc::UnboundedReceiver<SubCommand>,
) {
    'reconnect: loop {
        let mut pubsub = match client.get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(err) => {
                warn!(target: LOG_TARGET, %err, "pubsub connect failed; backing off");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
                continue;
            }
        };

        // Re-establish every live subscription after a reconnect.
        let channels: Vec<String> = handlers.iter().map(|entry| entry.key().clone()).collect();
        for channel in channels {
            if let Err(err) = pubsub.subscribe(&channel).await {
                warn!(target: LOG_TARGET, %channel, %err, "resubscribe failed");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
                continue 'reconnect;
            }
        }

        loop {
            let wake = {
                let mut stream = pubsub.on_message();
                tokio::select! {
                    msg = stream.next() => match msg {
                        Some(msg) => Wake::Message(msg),
                        None => Wake::StreamClosed,
                    },
                    cmd = commands.recv() => match cmd {
                        Some(cmd) => Wake::Command(cmd),
                        None => Wake::CommandsClosed,
                    },
                }
            };

            match wake {
                Wake::Message(msg) => {
                    dispatch_message(&handlers, &server_id, msg).await;
                }
                Wake::Command(SubCommand::Subscribe(channel)) => {
                    if let Err(err) = pubsub.subscribe(&channel).await {
                        warn!(target: LOG_TARGET, %channel, %err, "subscribe failed");
                        tokio::time::sleep(RECONNECT_BACKOFF).await;
                        continue 'reconnect;
                    }
                }
                Wake::Command(SubCommand::Unsubscribe(channel)) => {
                    if let Err(err) = pubsub.unsubscribe(&channel).await {
                        warn!(target: LOG_TARGET, %channel, %err, "unsubscribe failed");
                    }
                }
                Wake::StreamClosed => {
                    warn!(target: LOG_TARGET, "pubsub stream closed; reconnecting");
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                    continue 'reconnect;
                }
                Wake::CommandsClosed => {
                    info!(target: LOG_TARGET, "command channel closed; listener exiting");
                    return;
                }
            }
        }
    }
}

async fn dispatch_message(
    handlers: &DashMap<String, Vec<MessageHandler>>,
    server_id: &str,
    msg: redis::Msg,
) {
    let channel = msg.get_channel_name().to_string();
    let payload: String = match msg.get_payload() {
        Ok(payload) => payload,
        Err(err) => {
            warn!(target: LOG_TARGET, %channel, %err, "unreadable pubsub payload");
            return;
        }
    };
    let message: BusMessage = match serde_json::from_str(&payload) {
        Ok(message) => message,
        Err(err) => {
            warn!(target: LOG_TARGET, %channel, %err, "invalid pubsub message");
            return;
        }
    };

    // Skip our own publishes.
    if message.sender_id.as_deref() == Some(server_id) {
        return;
    }

    let registered: Vec<MessageHandler> = handlers
        .get(&channel)
        .map(|entry| entry.clone())
        .unwrap_or_default();
    for handler in registered {
        handler(message.clone()).await;
    }
}
