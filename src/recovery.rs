use chrono::Utc;
use futures::StreamExt;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::{CacheError, RoomRecord, RoomStatus, SharedStateCache};
use crate::engine::GamePhase;
use crate::events::{EventType, RebuiltGameState, ReplayError};
use crate::store::{SharedEventStore, SharedGameDirectory, StoreError};

const LOG_TARGET: &str = "recovery";

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("replay failed at game {game_id}: {source}")]
    Replay {
        game_id: Uuid,
        #[source]
        source: ReplayError,
    },
    #[error("game {0} has no events")]
    NoEvents(Uuid),
}

#[derive(Debug, Clone)]
pub struct RecoveredGame {
    pub game_id: Uuid,
    pub room_code: String,
    pub phase: GamePhase,
    pub sequence_num: i64,
}

#[derive(Debug, Default)]
pub struct RecoverySummary {
    pub recovered: Vec<RecoveredGame>,
    pub skipped: usize,
    pub failed: usize,
}

/// Rebuilds active games from the event log at replica startup and
/// hydrates the state cache. Safe to run any number of times: the
/// cache ends up in the same state either way.
pub struct RecoveryService {
    events: SharedEventStore,
    directory: SharedGameDirectory,
    cache: SharedStateCache,
    server_id: String,
}

impl RecoveryService {
    pub fn new(
        events: SharedEventStore,
        directory: SharedGameDirectory,
        cache: SharedStateCache,
        server_id: impl Into<String>,
    ) -> Self {
        Self {
            events,
            directory,
            cache,
            server_id: server_id.into(),
        }
    }

    pub async fn recover_all(&self) -> RecoverySummary {
        let mut summary = RecoverySummary::default();

        let active = match self.directory.list_active().await {
            Ok(active) => active,
            Err(err) => {
                error!(target: LOG_TARGET, %err, "failed to list active games");
                return summary;
            }
        };
        info!(
            target: LOG_TARGET,
            count = active.len(),
            "found active games to recover"
        );

        for record in active {
            match self.recover_game(record.id).await {
                Ok(Some(recovered)) => {
                    info!(
                        target: LOG_TARGET,
                        game_id = %recovered.game_id,
                        room_code = %recovered.room_code,
                        sequence = recovered.sequence_num,
                        phase = ?recovered.phase,
                        "recovered game"
                    );
                    summary.recovered.push(recovered);
                }
                Ok(None) => summary.skipped += 1,
                Err(err) => {
                    warn!(
                        target: LOG_TARGET,
                        game_id = %record.id,
                        %err,
                        "failed to recover game"
                    );
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    /// Rebuild one game by streaming its log through the reducer.
    /// Returns `None` when the game turned out to be finished (its
    /// metadata row is corrected as a side effect).
    pub async fn recover_game(
        &self,
        game_id: Uuid,
    ) -> Result<Option<RecoveredGame>, RecoveryError> {
        let mut stream = self.events.stream_events(game_id, 1);
        let mut state = RebuiltGameState::new(game_id);
        let mut last_type: Option<EventType> = None;
        let mut any = false;

        while let Some(event) = stream.next().await {
            let event = event?;
            any = true;
            last_type = Some(event.event_type());
            state
                .apply(&event)
                .map_err(|source| RecoveryError::Replay { game_id, source })?;
        }

        if !any {
            return Err(RecoveryError::NoEvents(game_id));
        }

        // A game whose log already ends is not active; fix the
        // directory instead of resurrecting it.
        if last_type == Some(EventType::GameEnded) {
            self.directory.mark_completed(game_id, None).await?;
            return Ok(None);
        }

        self.cache.save_game_state(game_id, &state).await?;
        self.ensure_room_in_cache(&state).await?;

        Ok(Some(RecoveredGame {
            game_id,
            room_code: state.room_code.clone(),
            phase: state.phase,
            sequence_num: state.sequence_num,
        }))
    }

    /// Incremental variant: apply only events past the cached
    /// sequence. Returns `None` when the cache was already current.
    pub async fn recover_from_sequence(
        &self,
        game_id: Uuid,
        cached: &RebuiltGameState,
    ) -> Result<Option<RebuiltGameState>, RecoveryError> {
        let new_events = self
            .events
            .get_events(game_id, cached.sequence_num + 1, None)
            .await?;
        if new_events.is_empty() {
            return Ok(None);
        }

        let mut state = cached.clone();
        for event in &new_events {
            state
                .apply(event)
                .map_err(|source| RecoveryError::Replay { game_id, source })?;
        }

        self.cache.save_game_state(game_id, &state).await?;
        Ok(Some(state))
    }

    async fn ensure_room_in_cache(&self, state: &RebuiltGameState) -> Result<(), RecoveryError> {
        if state.room_code.is_empty() {
            return Ok(());
        }
        if self.cache.room_exists(&state.room_code).await? {
            return Ok(());
        }

        let status = match state.phase {
            GamePhase::Waiting => RoomStatus::Waiting,
            GamePhase::RoundOver | GamePhase::GameOver => RoomStatus::Finished,
            _ => RoomStatus::Playing,
        };
        let record = RoomRecord {
            game_id: Some(state.game_id),
            host_id: state.host_id.clone().unwrap_or_default(),
            status,
            server_id: self.server_id.clone(),
            created_at: Utc::now(),
        };
        self.cache.create_room(&state.room_code, &record).await?;
        for player_id in &state.player_order {
            self.cache
                .add_player_to_room(&state.room_code, player_id)
                .await?;
        }
        self.cache.set_room_status(&state.room_code, status).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use crate::cache::{InMemoryStateCache, StateCache};
    use crate::engine::{DrawSource, GameOptions, GolfGame};
    use crate::events::GameEvent;
    use crate::store::{
        EventStore, GameDirectory, GameStatus, InMemoryEventStore, InMemoryGameDirectory,
    };

    use super::*;

    struct Fixture {
        events: Arc<InMemoryEventStore>,
        directory: Arc<InMemoryGameDirectory>,
        cache: Arc<InMemoryStateCache>,
        service: RecoveryService,
    }

    fn fixture() -> Fixture {
        let events = Arc::new(InMemoryEventStore::new());
        let directory = Arc::new(InMemoryGameDirectory::new());
        let cache = Arc::new(InMemoryStateCache::new());
        let service = RecoveryService::new(
            events.clone(),
            directory.clone(),
            cache.clone(),
            "test-replica",
        );
        Fixture {
            events,
            directory,
            cache,
            service,
        }
    }

    /// Seed the log with a live two-player game, one turn in.
    async fn seed_live_game(fx: &Fixture) -> GolfGame {
        let options = GameOptions {
            initial_flips: 0,
            ..GameOptions::default()
        };
        let mut game = GolfGame::new(Uuid::new_v4(), "ROOM");
        let mut events = vec![game.emit_game_created("p1")];
        events.push(game.add_player("p1", "Player 1", false, None).unwrap());
        events.push(game.add_player("p2", "Player 2", false, None).unwrap());
        events.extend(game.start_game(1, 1, options, Some(42)).unwrap());
        events.extend(game.draw_card("p1", DrawSource::Deck).unwrap());
        events.extend(game.swap_card("p1", 0).unwrap());
        fx.events.append_batch(&events).await.unwrap();

        fx.directory
            .create_game(game.game_id, "ROOM", "p1", &game.options)
            .await
            .unwrap();
        fx.directory
            .mark_started(game.game_id, 2, 1, &["p1".into(), "p2".into()])
            .await
            .unwrap();
        game
    }

    #[tokio::test]
    async fn recovers_active_games_into_the_cache() {
        let fx = fixture();
        let game = seed_live_game(&fx).await;

        let summary = fx.service.recover_all().await;
        assert_eq!(summary.recovered.len(), 1);
        assert_eq!(summary.failed, 0);

        let cached = fx
            .cache
            .get_game_state(game.game_id)
            .await
            .unwrap()
            .expect("state cached");
        assert_eq!(cached.sequence_num, game.last_sequence());

        let room = fx.cache.get_room("ROOM").await.unwrap().expect("room record");
        assert_eq!(room.game_id, Some(game.game_id));
        assert_eq!(room.status, RoomStatus::Playing);
        assert!(fx.cache.get_active_rooms().await.unwrap().contains("ROOM"));
    }

    #[tokio::test]
    async fn recovery_is_idempotent() {
        let fx = fixture();
        let game = seed_live_game(&fx).await;

        fx.service.recover_all().await;
        let first = fx.cache.get_game_state(game.game_id).await.unwrap();
        fx.service.recover_all().await;
        let second = fx.cache.get_game_state(game.game_id).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn finished_games_are_skipped_and_reconciled() {
        let fx = fixture();
        let mut game = seed_live_game(&fx).await;
        let ended: Vec<GameEvent> = game.end_game().into_iter().collect();
        fx.events.append_batch(&ended).await.unwrap();

        let summary = fx.service.recover_all().await;
        assert!(summary.recovered.is_empty());
        assert_eq!(summary.skipped, 1);

        let record = fx.directory.get(game.game_id).await.unwrap().unwrap();
        assert_eq!(record.status, GameStatus::Completed);
        assert!(fx.cache.get_game_state(game.game_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn incremental_recovery_applies_only_new_events() {
        let fx = fixture();
        let mut game = seed_live_game(&fx).await;
        fx.service.recover_game(game.game_id).await.unwrap();
        let cached = fx
            .cache
            .get_game_state(game.game_id)
            .await
            .unwrap()
            .unwrap();

        // No new events: nothing to do.
        let unchanged = fx
            .service
            .recover_from_sequence(game.game_id, &cached)
            .await
            .unwrap();
        assert!(unchanged.is_none());

        // One more turn lands in the log.
        let mut more = game.draw_card("p2", DrawSource::Deck).unwrap();
        more.extend(game.discard_drawn("p2").unwrap());
        fx.events.append_batch(&more).await.unwrap();

        let updated = fx
            .service
            .recover_from_sequence(game.game_id, &cached)
            .await
            .unwrap()
            .expect("new state");
        assert_eq!(updated.sequence_num, game.last_sequence());
        assert_eq!(
            updated.current_player_id().map(String::as_str),
            Some("p1")
        );
    }
}
