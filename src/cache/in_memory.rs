use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::events::RebuiltGameState;

use super::{CacheError, RoomRecord, RoomStatus, StateCache, GAME_TTL_SECS, ROOM_TTL_SECS};

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Entry<T> {
    fn new(value: T, ttl_secs: i64) -> Self {
        Self {
            value,
            expires_at: Instant::now() + Duration::from_secs(ttl_secs.max(0) as u64),
        }
    }

    fn live(&self) -> Option<&T> {
        (Instant::now() < self.expires_at).then_some(&self.value)
    }
}

#[derive(Default)]
struct Inner {
    rooms: HashMap<String, Entry<RoomRecord>>,
    room_players: HashMap<String, HashSet<String>>,
    active_rooms: HashSet<String>,
    player_rooms: HashMap<String, Entry<String>>,
    games: HashMap<Uuid, Entry<RebuiltGameState>>,
}

/// In-memory state cache with the same TTL semantics as the Redis
/// implementation. Backs tests so they need no Redis.
#[derive(Default)]
pub struct InMemoryStateCache {
    inner: Mutex<Inner>,
}

impl InMemoryStateCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateCache for InMemoryStateCache {
    async fn create_room(&self, room_code: &str, record: &RoomRecord) -> Result<(), CacheError> {
        let mut inner = self.inner.lock();
        inner
            .rooms
            .insert(room_code.to_string(), Entry::new(record.clone(), ROOM_TTL_SECS));
        inner.active_rooms.insert(room_code.to_string());
        inner.player_rooms.insert(
            record.host_id.clone(),
            Entry::new(room_code.to_string(), ROOM_TTL_SECS),
        );
        Ok(())
    }

    async fn get_room(&self, room_code: &str) -> Result<Option<RoomRecord>, CacheError> {
        let inner = self.inner.lock();
        Ok(inner
            .rooms
            .get(room_code)
            .and_then(Entry::live)
            .cloned())
    }

    async fn room_exists(&self, room_code: &str) -> Result<bool, CacheError> {
        Ok(self.get_room(room_code).await?.is_some())
    }

    async fn delete_room(&self, room_code: &str) -> Result<(), CacheError> {
        let mut inner = self.inner.lock();
        let record = inner.rooms.remove(room_code).and_then(|e| e.live().cloned());
        if let Some(players) = inner.room_players.remove(room_code) {
            for player_id in players {
                inner.player_rooms.remove(&player_id);
            }
        }
        inner.active_rooms.remove(room_code);
        if let Some(game_id) = record.and_then(|record| record.game_id) {
            inner.games.remove(&game_id);
        }
        Ok(())
    }

    async fn set_room_status(&self, room_code: &str, status: RoomStatus) -> Result<(), CacheError> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.rooms.get_mut(room_code) {
            entry.value.status = status;
        }
        Ok(())
    }

    async fn get_active_rooms(&self) -> Result<HashSet<String>, CacheError> {
        Ok(self.inner.lock().active_rooms.clone())
    }

    async fn add_player_to_room(
        &self,
        room_code: &str,
        player_id: &str,
    ) -> Result<(), CacheError> {
        let mut inner = self.inner.lock();
        inner
            .room_players
            .entry(room_code.to_string())
            .or_default()
            .insert(player_id.to_string());
        inner.player_rooms.insert(
            player_id.to_string(),
            Entry::new(room_code.to_string(), ROOM_TTL_SECS),
        );
        if let Some(entry) = inner.rooms.get_mut(room_code) {
            entry.expires_at = Instant::now() + Duration::from_secs(ROOM_TTL_SECS as u64);
        }
        Ok(())
    }

    async fn remove_player_from_room(
        &self,
        room_code: &str,
        player_id: &str,
    ) -> Result<(), CacheError> {
        let mut inner = self.inner.lock();
        if let Some(players) = inner.room_players.get_mut(room_code) {
            players.remove(player_id);
        }
        inner.player_rooms.remove(player_id);
        Ok(())
    }

    async fn get_room_players(&self, room_code: &str) -> Result<HashSet<String>, CacheError> {
        Ok(self
            .inner
            .lock()
            .room_players
            .get(room_code)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_player_room(&self, player_id: &str) -> Result<Option<String>, CacheError> {
        Ok(self
            .inner
            .lock()
            .player_rooms
            .get(player_id)
            .and_then(Entry::live)
            .cloned())
    }

    async fn save_game_state(
        &self,
        game_id: Uuid,
        state: &RebuiltGameState,
    ) -> Result<(), CacheError> {
        self.inner
            .lock()
            .games
            .insert(game_id, Entry::new(state.clone(), GAME_TTL_SECS));
        Ok(())
    }

    async fn get_game_state(&self, game_id: Uuid) -> Result<Option<RebuiltGameState>, CacheError> {
        Ok(self
            .inner
            .lock()
            .games
            .get(&game_id)
            .and_then(Entry::live)
            .cloned())
    }

    async fn delete_game_state(&self, game_id: Uuid) -> Result<(), CacheError> {
        self.inner.lock().games.remove(&game_id);
        Ok(())
    }

    async fn refresh_room_ttl(&self, room_code: &str) -> Result<(), CacheError> {
        let mut inner = self.inner.lock();
        let game_id = inner
            .rooms
            .get_mut(room_code)
            .map(|entry| {
                entry.expires_at = Instant::now() + Duration::from_secs(ROOM_TTL_SECS as u64);
                entry.value.game_id
            })
            .unwrap_or(None);
        if let Some(game_id) = game_id {
            if let Some(entry) = inner.games.get_mut(&game_id) {
                entry.expires_at = Instant::now() + Duration::from_secs(GAME_TTL_SECS as u64);
            }
        }
        Ok(())
    }

    async fn touch_game(&self, game_id: Uuid) -> Result<(), CacheError> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.games.get_mut(&game_id) {
            entry.expires_at = Instant::now() + Duration::from_secs(GAME_TTL_SECS as u64);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::engine::GolfGame;

    use super::*;

    fn record(game_id: Uuid) -> RoomRecord {
        RoomRecord {
            game_id: Some(game_id),
            host_id: "host".to_string(),
            status: RoomStatus::Waiting,
            server_id: "test".to_string(),
            created_at: Utc::now(),
        }
    }

    fn snapshot(game_id: Uuid) -> RebuiltGameState {
        let mut game = GolfGame::new(game_id, "ABCD");
        game.emit_game_created("host");
        RebuiltGameState::from_engine(&game)
    }

    /// A room is in the active index iff its record exists iff at
    /// least one player is in its player set.
    #[tokio::test]
    async fn room_records_index_and_players_move_together() {
        let cache = InMemoryStateCache::new();
        let game_id = Uuid::new_v4();

        cache.create_room("ABCD", &record(game_id)).await.unwrap();
        cache.add_player_to_room("ABCD", "host").await.unwrap();
        cache.add_player_to_room("ABCD", "p2").await.unwrap();
        cache.save_game_state(game_id, &snapshot(game_id)).await.unwrap();

        assert!(cache.room_exists("ABCD").await.unwrap());
        assert!(cache.get_active_rooms().await.unwrap().contains("ABCD"));
        assert_eq!(cache.get_room_players("ABCD").await.unwrap().len(), 2);
        assert_eq!(
            cache.get_player_room("p2").await.unwrap().as_deref(),
            Some("ABCD")
        );

        cache.delete_room("ABCD").await.unwrap();
        assert!(!cache.room_exists("ABCD").await.unwrap());
        assert!(cache.get_active_rooms().await.unwrap().is_empty());
        assert!(cache.get_room_players("ABCD").await.unwrap().is_empty());
        assert!(cache.get_player_room("p2").await.unwrap().is_none());
        assert!(cache.get_game_state(game_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_updates_are_visible() {
        let cache = InMemoryStateCache::new();
        let game_id = Uuid::new_v4();
        cache.create_room("ABCD", &record(game_id)).await.unwrap();

        cache
            .set_room_status("ABCD", RoomStatus::Playing)
            .await
            .unwrap();
        let room = cache.get_room("ABCD").await.unwrap().unwrap();
        assert_eq!(room.status, RoomStatus::Playing);
    }

    #[tokio::test]
    async fn game_state_round_trips() {
        let cache = InMemoryStateCache::new();
        let game_id = Uuid::new_v4();
        let state = snapshot(game_id);

        cache.save_game_state(game_id, &state).await.unwrap();
        let loaded = cache.get_game_state(game_id).await.unwrap().unwrap();
        assert_eq!(loaded, state);

        cache.delete_game_state(game_id).await.unwrap();
        assert!(cache.get_game_state(game_id).await.unwrap().is_none());
    }
}
