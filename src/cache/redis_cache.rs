use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;
use uuid::Uuid;

use crate::events::RebuiltGameState;

use super::{
    game_key, player_room_key, room_key, room_players_key, CacheError, RoomRecord, RoomStatus,
    StateCache, ACTIVE_ROOMS_KEY, GAME_TTL_SECS, ROOM_TTL_SECS,
};

const LOG_TARGET: &str = "cache::redis";

/// Redis-backed state cache. Multi-key mutations run through atomic
/// pipelines so observers never see partial room state.
pub struct RedisStateCache {
    conn: ConnectionManager,
}

impl RedisStateCache {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let mut conn = ConnectionManager::new(client).await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(target: LOG_TARGET, "state cache connected");
        Ok(Self { conn })
    }

    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn record_fields(record: &RoomRecord) -> Vec<(&'static str, String)> {
        vec![
            (
                "game_id",
                record
                    .game_id
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
            ),
            ("host_id", record.host_id.clone()),
            ("status", record.status.as_str().to_string()),
            ("server_id", record.server_id.clone()),
            ("created_at", record.created_at.to_rfc3339()),
        ]
    }

    fn record_from_fields(fields: HashMap<String, String>) -> Option<RoomRecord> {
        if fields.is_empty() {
            return None;
        }
        let game_id = fields
            .get("game_id")
            .filter(|value| !value.is_empty())
            .and_then(|value| value.parse().ok());
        let created_at = fields
            .get("created_at")
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|value| value.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        Some(RoomRecord {
            game_id,
            host_id: fields.get("host_id").cloned().unwrap_or_default(),
            status: fields
                .get("status")
                .and_then(|value| RoomStatus::parse(value))
                .unwrap_or(RoomStatus::Waiting),
            server_id: fields.get("server_id").cloned().unwrap_or_default(),
            created_at,
        })
    }
}

#[async_trait]
impl StateCache for RedisStateCache {
    async fn create_room(&self, room_code: &str, record: &RoomRecord) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let key = room_key(room_code);
        let fields = Self::record_fields(record);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(&key, &fields)
            .ignore()
            .expire(&key, ROOM_TTL_SECS)
            .ignore()
            .sadd(ACTIVE_ROOMS_KEY, room_code)
            .ignore()
            .set_ex(
                player_room_key(&record.host_id),
                room_code,
                ROOM_TTL_SECS as u64,
            )
            .ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        debug!(target: LOG_TARGET, room_code, "created room record");
        Ok(())
    }

    async fn get_room(&self, room_code: &str) -> Result<Option<RoomRecord>, CacheError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(room_key(room_code)).await?;
        Ok(Self::record_from_fields(fields))
    }

    async fn room_exists(&self, room_code: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(room_key(room_code)).await?)
    }

    async fn delete_room(&self, room_code: &str) -> Result<(), CacheError> {
        let Some(record) = self.get_room(room_code).await? else {
            return Ok(());
        };
        let mut conn = self.conn.clone();
        let players_key = room_players_key(room_code);
        let players: HashSet<String> = conn.smembers(&players_key).await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for player_id in &players {
            pipe.del(player_room_key(player_id)).ignore();
        }
        pipe.del(room_key(room_code))
            .ignore()
            .del(&players_key)
            .ignore()
            .srem(ACTIVE_ROOMS_KEY, room_code)
            .ignore();
        if let Some(game_id) = record.game_id {
            pipe.del(game_key(game_id)).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        debug!(target: LOG_TARGET, room_code, "deleted room record");
        Ok(())
    }

    async fn set_room_status(&self, room_code: &str, status: RoomStatus) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(room_key(room_code), "status", status.as_str())
            .await?;
        Ok(())
    }

    async fn get_active_rooms(&self) -> Result<HashSet<String>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(ACTIVE_ROOMS_KEY).await?)
    }

    async fn add_player_to_room(
        &self,
        room_code: &str,
        player_id: &str,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .sadd(room_players_key(room_code), player_id)
            .ignore()
            .set_ex(player_room_key(player_id), room_code, ROOM_TTL_SECS as u64)
            .ignore()
            .expire(room_key(room_code), ROOM_TTL_SECS)
            .ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn remove_player_from_room(
        &self,
        room_code: &str,
        player_id: &str,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .srem(room_players_key(room_code), player_id)
            .ignore()
            .del(player_room_key(player_id))
            .ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn get_room_players(&self, room_code: &str) -> Result<HashSet<String>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(room_players_key(room_code)).await?)
    }

    async fn get_player_room(&self, player_id: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(player_room_key(player_id)).await?)
    }

    async fn save_game_state(
        &self,
        game_id: Uuid,
        state: &RebuiltGameState,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(state)?;
        let _: () = conn
            .set_ex(game_key(game_id), payload, GAME_TTL_SECS as u64)
            .await?;
        Ok(())
    }

    async fn get_game_state(&self, game_id: Uuid) -> Result<Option<RebuiltGameState>, CacheError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(game_key(game_id)).await?;
        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn delete_game_state(&self, game_id: Uuid) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(game_key(game_id)).await?;
        Ok(())
    }

    async fn refresh_room_ttl(&self, room_code: &str) -> Result<(), CacheError> {
        let record = self.get_room(room_code).await?;
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().expire(room_key(room_code), ROOM_TTL_SECS).ignore();
        if let Some(game_id) = record.and_then(|record| record.game_id) {
            pipe.expire(game_key(game_id), GAME_TTL_SECS).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn touch_game(&self, game_id: Uuid) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.expire(game_key(game_id), GAME_TTL_SECS).await?;
        Ok(())
    }
}
