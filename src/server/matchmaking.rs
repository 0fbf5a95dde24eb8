use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cache::{RoomRecord, RoomStatus};
use crate::engine::{GameOptions, PlayerId, MAX_PLAYERS};

use super::handlers::attach_bus_listener;
use super::messages::ServerMessage;
use super::AppEnv;

const LOG_TARGET: &str = "server::matchmaking";
const SCAN_INTERVAL: Duration = Duration::from_secs(2);

pub struct QueuedPlayer {
    pub player_id: PlayerId,
    pub name: String,
    pub sender: mpsc::UnboundedSender<ServerMessage>,
    /// Table size the player asked for (2..=6).
    pub desired_players: usize,
}

/// In-process matchmaking queue, drained by the periodic scanner.
#[derive(Default)]
pub struct MatchQueue {
    inner: Mutex<Vec<QueuedPlayer>>,
}

impl MatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue (or re-enqueue) a player; returns their 1-based position.
    pub fn join(&self, entry: QueuedPlayer) -> usize {
        let mut queue = self.inner.lock();
        queue.retain(|queued| queued.player_id != entry.player_id);
        queue.push(entry);
        queue.len()
    }

    pub fn leave(&self, player_id: &str) -> bool {
        let mut queue = self.inner.lock();
        let before = queue.len();
        queue.retain(|queued| queued.player_id != player_id);
        queue.len() != before
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Pop the oldest `size` players waiting for a `size`-seat table,
    /// or leave the queue untouched when there are not enough yet.
    fn take_group(&self, size: usize) -> Option<Vec<QueuedPlayer>> {
        let mut queue = self.inner.lock();
        let matching: Vec<usize> = queue
            .iter()
            .enumerate()
            .filter(|(_, queued)| queued.desired_players == size)
            .map(|(idx, _)| idx)
            .take(size)
            .collect();
        if matching.len() < size {
            return None;
        }
        let mut group = Vec::with_capacity(size);
        for idx in matching.into_iter().rev() {
            group.push(queue.remove(idx));
        }
        group.reverse();
        Some(group)
    }
}

/// Background scanner: groups compatible waiters into rooms. Started
/// at bootstrap, aborted at shutdown.
pub async fn run_scanner(env: Arc<AppEnv>) {
    let mut ticker = tokio::time::interval(SCAN_INTERVAL);
    loop {
        ticker.tick().await;
        scan(&env).await;
    }
}

pub async fn scan(env: &Arc<AppEnv>) {
    for size in 2..=MAX_PLAYERS {
        while let Some(group) = env.queue.take_group(size) {
            if let Err(err) = create_match(env, group).await {
                warn!(target: LOG_TARGET, %err, "failed to create match");
            }
        }
    }
}

async fn create_match(env: &Arc<AppEnv>, group: Vec<QueuedPlayer>) -> anyhow::Result<()> {
    let room = env.rooms.create_room();
    let mut state = room.lock().await;

    let host_id = group[0].player_id.clone();
    let mut events = vec![state.game.emit_game_created(&host_id)];
    for queued in &group {
        events.push(state.add_member(
            queued.player_id.clone(),
            queued.name.clone(),
            queued.sender.clone(),
        )?);
    }

    let game_id = state.game.game_id;
    env.events.append_batch(&events).await?;
    env.directory
        .create_game(game_id, &room.code, &host_id, &GameOptions::default())
        .await?;
    env.cache
        .create_room(
            &room.code,
            &RoomRecord {
                game_id: Some(game_id),
                host_id: host_id.clone(),
                status: RoomStatus::Waiting,
                server_id: env.server_id.clone(),
                created_at: Utc::now(),
            },
        )
        .await?;
    for queued in &group {
        env.cache
            .add_player_to_room(&room.code, &queued.player_id)
            .await?;
    }

    for queued in &group {
        let _ = queued.sender.send(ServerMessage::MatchFound {
            room_code: room.code.clone(),
        });
        let _ = queued.sender.send(ServerMessage::RoomJoined {
            room_code: room.code.clone(),
            player_id: queued.player_id.clone(),
        });
    }
    state.broadcast(
        &ServerMessage::PlayerJoined {
            players: state.member_list(&env.profiles),
        },
        None,
    );
    drop(state);

    attach_bus_listener(env, &room);
    info!(
        target: LOG_TARGET,
        room_code = %room.code,
        players = group.len(),
        "matched players into room"
    );
    Ok(())
}
