use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::engine::PlayerId;
use crate::events::RebuiltGameState;

mod in_memory;
mod redis_cache;

pub use in_memory::InMemoryStateCache;
pub use redis_cache::RedisStateCache;

/// TTLs are long enough that an active game never expires mid-session;
/// every action refreshes them.
pub const ROOM_TTL_SECS: i64 = 24 * 60 * 60;
pub const GAME_TTL_SECS: i64 = 24 * 60 * 60;

pub type SharedStateCache = Arc<dyn StateCache>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error("cached value codec failed: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Playing,
    Finished,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Waiting => "waiting",
            RoomStatus::Playing => "playing",
            RoomStatus::Finished => "finished",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "waiting" => Some(RoomStatus::Waiting),
            "playing" => Some(RoomStatus::Playing),
            "finished" => Some(RoomStatus::Finished),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoomRecord {
    pub game_id: Option<Uuid>,
    pub host_id: PlayerId,
    pub status: RoomStatus,
    /// Replica that created (or recovered) the room.
    pub server_id: String,
    pub created_at: DateTime<Utc>,
}

/// Keyed ephemeral store for live rooms, games, and the player→room
/// reverse index. Never the source of truth: losing it only costs a
/// rebuild from the event log.
///
/// Key families:
/// - `golf:room:{code}`          room metadata hash
/// - `golf:game:{game_id}`       serialized game state + last sequence
/// - `golf:room:{code}:players`  set of player ids
/// - `golf:rooms:active`         set of active room codes
/// - `golf:player:{id}:room`     player's current room code
#[async_trait]
pub trait StateCache: Send + Sync {
    async fn create_room(&self, room_code: &str, record: &RoomRecord) -> Result<(), CacheError>;
    async fn get_room(&self, room_code: &str) -> Result<Option<RoomRecord>, CacheError>;
    async fn room_exists(&self, room_code: &str) -> Result<bool, CacheError>;
    async fn delete_room(&self, room_code: &str) -> Result<(), CacheError>;
    async fn set_room_status(&self, room_code: &str, status: RoomStatus) -> Result<(), CacheError>;
    async fn get_active_rooms(&self) -> Result<HashSet<String>, CacheError>;

    async fn add_player_to_room(&self, room_code: &str, player_id: &str)
        -> Result<(), CacheError>;
    async fn remove_player_from_room(
        &self,
        room_code: &str,
        player_id: &str,
    ) -> Result<(), CacheError>;
    async fn get_room_players(&self, room_code: &str) -> Result<HashSet<String>, CacheError>;
    async fn get_player_room(&self, player_id: &str) -> Result<Option<String>, CacheError>;

    async fn save_game_state(
        &self,
        game_id: Uuid,
        state: &RebuiltGameState,
    ) -> Result<(), CacheError>;
    async fn get_game_state(&self, game_id: Uuid) -> Result<Option<RebuiltGameState>, CacheError>;
    async fn delete_game_state(&self, game_id: Uuid) -> Result<(), CacheError>;

    /// Refresh the room's TTL (and its game's, when known) on activity.
    async fn refresh_room_ttl(&self, room_code: &str) -> Result<(), CacheError>;
    async fn touch_game(&self, game_id: Uuid) -> Result<(), CacheError>;
}

pub(crate) fn room_key(room_code: &str) -> String {
    format!("golf:room:{room_code}")
}

pub(crate) fn game_key(game_id: Uuid) -> String {
    format!("golf:game:{game_id}")
}

pub(crate) fn room_players_key(room_code: &str) -> String {
    format!("golf:room:{room_code}:players")
}

pub(crate) fn player_room_key(player_id: &str) -> String {
    format!("golf:player:{player_id}:room")
}

pub(crate) const ACTIVE_ROOMS_KEY: &str = "golf:rooms:active";
