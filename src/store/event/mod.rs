use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::events::GameEvent;

use super::StoreError;

mod in_memory;
mod sea_orm;

pub use in_memory::InMemoryEventStore;
pub use sea_orm::SeaOrmEventStore;

pub type SharedEventStore = Arc<dyn EventStore>;

/// The append-only event log. Appends are rejected with
/// [`StoreError::Concurrency`] when `(game_id, sequence_num)` already
/// exists; the caller must re-read state and retry or reject.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append one event, returning its row id.
    async fn append(&self, event: &GameEvent) -> Result<i64, StoreError>;

    /// Append several events atomically: all succeed or none do.
    async fn append_batch(&self, events: &[GameEvent]) -> Result<Vec<i64>, StoreError>;

    /// Events for a game in sequence order, optionally bounded
    /// (inclusive on both ends).
    async fn get_events(
        &self,
        game_id: Uuid,
        from_sequence: i64,
        to_sequence: Option<i64>,
    ) -> Result<Vec<GameEvent>, StoreError>;

    /// Highest sequence number for a game, or -1 when it has no events.
    async fn get_latest_sequence(&self, game_id: Uuid) -> Result<i64, StoreError>;

    /// Cursor over a game's events for memory-efficient replay.
    fn stream_events(
        &self,
        game_id: Uuid,
        from_sequence: i64,
    ) -> BoxStream<'static, Result<GameEvent, StoreError>>;

    async fn get_event_count(&self, game_id: Uuid) -> Result<u64, StoreError>;
}
