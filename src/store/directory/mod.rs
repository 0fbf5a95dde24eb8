use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{GameOptions, PlayerId};

use super::StoreError;

mod in_memory;
mod sea_orm;

pub use in_memory::InMemoryGameDirectory;
pub use sea_orm::SeaOrmGameDirectory;

pub type SharedGameDirectory = Arc<dyn GameDirectory>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Active,
    Completed,
    Abandoned,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Active => "active",
            GameStatus::Completed => "completed",
            GameStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(GameStatus::Active),
            "completed" => Some(GameStatus::Completed),
            "abandoned" => Some(GameStatus::Abandoned),
            _ => None,
        }
    }
}

/// One row of the denormalized game directory. Reconstructible from
/// the event log if lost; never the source of truth.
#[derive(Clone, Debug, PartialEq)]
pub struct GameRecord {
    pub id: Uuid,
    pub room_code: String,
    pub status: GameStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub num_players: Option<u32>,
    pub num_rounds: Option<u32>,
    pub options: Option<GameOptions>,
    pub winner_id: Option<PlayerId>,
    pub host_id: Option<PlayerId>,
    pub player_ids: Vec<PlayerId>,
}

/// Derived metadata view over the log, updated by the orchestrator on
/// lifecycle transitions and scanned by recovery.
#[async_trait]
pub trait GameDirectory: Send + Sync {
    async fn create_game(
        &self,
        game_id: Uuid,
        room_code: &str,
        host_id: &str,
        options: &GameOptions,
    ) -> Result<(), StoreError>;

    async fn mark_started(
        &self,
        game_id: Uuid,
        num_players: u32,
        num_rounds: u32,
        player_ids: &[PlayerId],
    ) -> Result<(), StoreError>;

    async fn mark_completed(
        &self,
        game_id: Uuid,
        winner_id: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn mark_abandoned(&self, game_id: Uuid) -> Result<(), StoreError>;

    /// Games with status `active`, newest first; the recovery scan.
    async fn list_active(&self) -> Result<Vec<GameRecord>, StoreError>;

    async fn get(&self, game_id: Uuid) -> Result<Option<GameRecord>, StoreError>;
}
