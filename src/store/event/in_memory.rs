use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::events::GameEvent;

use super::super::StoreError;
use super::EventStore;

/// In-memory event store with the same `(game_id, sequence_num)`
/// uniqueness contract as the Postgres store. Backs tests so they need
/// no database.
#[derive(Default)]
pub struct InMemoryEventStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_row_id: i64,
    games: HashMap<Uuid, BTreeMap<i64, GameEvent>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: &GameEvent) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock();
        let log = inner.games.entry(event.game_id).or_default();
        if log.contains_key(&event.sequence_num) {
            return Err(StoreError::Concurrency {
                game_id: event.game_id,
                sequence: event.sequence_num,
            });
        }
        log.insert(event.sequence_num, event.clone());
        inner.next_row_id += 1;
        Ok(inner.next_row_id)
    }

    async fn append_batch(&self, batch: &[GameEvent]) -> Result<Vec<i64>, StoreError> {
        let mut inner = self.inner.lock();
        // Validate the whole batch before touching anything so the
        // append stays all-or-nothing.
        for event in batch {
            let duplicate_in_log = inner
                .games
                .get(&event.game_id)
                .map(|log| log.contains_key(&event.sequence_num))
                .unwrap_or(false);
            let duplicate_in_batch = batch
                .iter()
                .filter(|other| {
                    other.game_id == event.game_id && other.sequence_num == event.sequence_num
                })
                .count()
                > 1;
            if duplicate_in_log || duplicate_in_batch {
                return Err(StoreError::Concurrency {
                    game_id: event.game_id,
                    sequence: event.sequence_num,
                });
            }
        }

        let mut ids = Vec::with_capacity(batch.len());
        for event in batch {
            inner
                .games
                .entry(event.game_id)
                .or_default()
                .insert(event.sequence_num, event.clone());
            inner.next_row_id += 1;
            ids.push(inner.next_row_id);
        }
        Ok(ids)
    }

    async fn get_events(
        &self,
        game_id: Uuid,
        from_sequence: i64,
        to_sequence: Option<i64>,
    ) -> Result<Vec<GameEvent>, StoreError> {
        let inner = self.inner.lock();
        let Some(log) = inner.games.get(&game_id) else {
            return Ok(Vec::new());
        };
        let upper = to_sequence.unwrap_or(i64::MAX);
        Ok(log
            .range(from_sequence..=upper)
            .map(|(_, event)| event.clone())
            .collect())
    }

    async fn get_latest_sequence(&self, game_id: Uuid) -> Result<i64, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .games
            .get(&game_id)
            .and_then(|log| log.keys().next_back().copied())
            .unwrap_or(-1))
    }

    fn stream_events(
        &self,
        game_id: Uuid,
        from_sequence: i64,
    ) -> BoxStream<'static, Result<GameEvent, StoreError>> {
        let inner = self.inner.lock();
        let events: Vec<GameEvent> = inner
            .games
            .get(&game_id)
            .map(|log| {
                log.range(from_sequence..)
                    .map(|(_, event)| event.clone())
                    .collect()
            })
            .unwrap_or_default();
        Box::pin(stream::iter(events.into_iter().map(Ok)))
    }

    async fn get_event_count(&self, game_id: Uuid) -> Result<u64, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .games
            .get(&game_id)
            .map(|log| log.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use futures::StreamExt;
    use uuid::Uuid;

    use crate::engine::{DrawSource, GameOptions, GolfGame};
    use crate::events::event::EventPayload;
    use crate::events::{rebuild_state, GameEvent};

    use super::*;

    fn event(game_id: Uuid, sequence: i64) -> GameEvent {
        GameEvent {
            game_id,
            sequence_num: sequence,
            timestamp: Utc::now(),
            player_id: None,
            payload: EventPayload::GameEnded { winner_id: None },
        }
    }

    #[tokio::test]
    async fn duplicate_sequence_is_a_concurrency_error() {
        let store = InMemoryEventStore::new();
        let game_id = Uuid::new_v4();

        store.append(&event(game_id, 1)).await.unwrap();
        let err = store.append(&event(game_id, 1)).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Concurrency { sequence: 1, .. }
        ));
        assert_eq!(store.get_latest_sequence(game_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn batch_append_is_atomic() {
        let store = InMemoryEventStore::new();
        let game_id = Uuid::new_v4();
        store.append(&event(game_id, 1)).await.unwrap();

        // Sequence 1 collides, so nothing from the batch lands.
        let batch = [event(game_id, 2), event(game_id, 1)];
        let err = store.append_batch(&batch).await.unwrap_err();
        assert!(matches!(err, StoreError::Concurrency { .. }));
        assert_eq!(store.get_event_count(game_id).await.unwrap(), 1);

        let batch = [event(game_id, 2), event(game_id, 3)];
        let ids = store.append_batch(&batch).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(store.get_latest_sequence(game_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn latest_sequence_is_minus_one_for_unknown_games() {
        let store = InMemoryEventStore::new();
        assert_eq!(
            store.get_latest_sequence(Uuid::new_v4()).await.unwrap(),
            -1
        );
    }

    #[tokio::test]
    async fn range_reads_and_streams_are_ordered() {
        let store = InMemoryEventStore::new();
        let game_id = Uuid::new_v4();
        for sequence in 1..=5 {
            store.append(&event(game_id, sequence)).await.unwrap();
        }

        let middle = store.get_events(game_id, 2, Some(4)).await.unwrap();
        assert_eq!(
            middle.iter().map(|e| e.sequence_num).collect::<Vec<_>>(),
            [2, 3, 4]
        );

        let streamed: Vec<i64> = store
            .stream_events(game_id, 3)
            .map(|event| event.unwrap().sequence_num)
            .collect()
            .await;
        assert_eq!(streamed, [3, 4, 5]);
    }

    /// Two replicas race on the same game: the losing append surfaces
    /// a concurrency error, the loser rebuilds from the log and finds
    /// the stale action invalid, and the winner's replica continues at
    /// the next sequence number.
    #[tokio::test]
    async fn conflicting_replicas_resolve_through_the_log() {
        let store = InMemoryEventStore::new();
        let options = GameOptions {
            initial_flips: 0,
            ..GameOptions::default()
        };

        let mut game = GolfGame::new(Uuid::new_v4(), "RACE");
        let mut setup = vec![game.emit_game_created("p1")];
        setup.push(game.add_player("p1", "Player 1", false, None).unwrap());
        setup.push(game.add_player("p2", "Player 2", false, None).unwrap());
        setup.extend(game.start_game(1, 1, options, Some(42)).unwrap());
        store.append_batch(&setup).await.unwrap();

        // Both replicas hold the same state.
        let mut replica_a = game.clone();
        let mut replica_b = game;

        // Replica A lands p1's turn first.
        let mut a_events = replica_a.draw_card("p1", DrawSource::Deck).unwrap();
        a_events.extend(replica_a.swap_card("p1", 0).unwrap());
        store.append_batch(&a_events).await.unwrap();

        // Replica B tries to write the same sequence numbers for a
        // stale view of the game and loses.
        let b_events = replica_b.draw_card("p1", DrawSource::Deck).unwrap();
        let err = store.append_batch(&b_events).await.unwrap_err();
        assert!(matches!(err, StoreError::Concurrency { .. }));

        // B re-reads the log; in the rebuilt state it is p2's turn, so
        // the stale action is rejected to the client.
        let log = store.get_events(replica_b.game_id, 1, None).await.unwrap();
        let mut rebuilt = rebuild_state(&log).unwrap().into_engine();
        assert_eq!(rebuilt.current_player().unwrap().id, "p2");
        assert!(rebuilt.draw_card("p1", DrawSource::Deck).is_err());

        // The next valid action appends at last_seq + 1.
        let latest = store.get_latest_sequence(rebuilt.game_id).await.unwrap();
        let next = rebuilt.draw_card("p2", DrawSource::Deck).unwrap();
        assert_eq!(next[0].sequence_num, latest + 1);
        store.append_batch(&next).await.unwrap();
    }
}
