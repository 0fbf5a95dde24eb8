use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::engine::{GameOptions, PlayerId};

use super::super::StoreError;
use super::{GameDirectory, GameRecord, GameStatus};

/// In-memory game directory for tests.
#[derive(Default)]
pub struct InMemoryGameDirectory {
    games: Mutex<HashMap<Uuid, GameRecord>>,
}

impl InMemoryGameDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GameDirectory for InMemoryGameDirectory {
    async fn create_game(
        &self,
        game_id: Uuid,
        room_code: &str,
        host_id: &str,
        options: &GameOptions,
    ) -> Result<(), StoreError> {
        let mut games = self.games.lock();
        games.entry(game_id).or_insert_with(|| GameRecord {
            id: game_id,
            room_code: room_code.to_string(),
            status: GameStatus::Active,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            num_players: None,
            num_rounds: None,
            options: Some(options.clone()),
            winner_id: None,
            host_id: Some(host_id.to_string()),
            player_ids: Vec::new(),
        });
        Ok(())
    }

    async fn mark_started(
        &self,
        game_id: Uuid,
        num_players: u32,
        num_rounds: u32,
        player_ids: &[PlayerId],
    ) -> Result<(), StoreError> {
        if let Some(record) = self.games.lock().get_mut(&game_id) {
            record.started_at = Some(Utc::now());
            record.num_players = Some(num_players);
            record.num_rounds = Some(num_rounds);
            record.player_ids = player_ids.to_vec();
        }
        Ok(())
    }

    async fn mark_completed(
        &self,
        game_id: Uuid,
        winner_id: Option<&str>,
    ) -> Result<(), StoreError> {
        if let Some(record) = self.games.lock().get_mut(&game_id) {
            record.status = GameStatus::Completed;
            record.completed_at = Some(Utc::now());
            record.winner_id = winner_id.map(Into::into);
        }
        Ok(())
    }

    async fn mark_abandoned(&self, game_id: Uuid) -> Result<(), StoreError> {
        if let Some(record) = self.games.lock().get_mut(&game_id) {
            record.status = GameStatus::Abandoned;
            record.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<GameRecord>, StoreError> {
        let games = self.games.lock();
        let mut active: Vec<GameRecord> = games
            .values()
            .filter(|record| record.status == GameStatus::Active)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(active)
    }

    async fn get(&self, game_id: Uuid) -> Result<Option<GameRecord>, StoreError> {
        Ok(self.games.lock().get(&game_id).cloned())
    }
}
