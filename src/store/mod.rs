use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr};
use thiserror::Error;
use uuid::Uuid;

pub mod directory;
pub mod entity;
pub mod event;

pub use directory::{
    GameDirectory, GameRecord, GameStatus, InMemoryGameDirectory, SeaOrmGameDirectory,
    SharedGameDirectory,
};
pub use event::{EventStore, InMemoryEventStore, SeaOrmEventStore, SharedEventStore};

/// Errors from the persistence layer. `Concurrency` is the variant a
/// retry loop pattern-matches: it means another writer took this
/// sequence number first.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event {sequence} already exists for game {game_id}")]
    Concurrency { game_id: Uuid, sequence: i64 },
    #[error("stored payload codec failed: {0}")]
    Codec(#[source] serde_json::Error),
    #[error(transparent)]
    Database(#[from] DbErr),
}

/// DDL for the append-only event log and the derived game directory.
/// The unique `(game_id, sequence_num)` constraint is the optimistic
/// concurrency check for the whole system.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id BIGSERIAL PRIMARY KEY,
    game_id UUID NOT NULL,
    sequence_num BIGINT NOT NULL,
    event_type VARCHAR(50) NOT NULL,
    player_id VARCHAR(50),
    event_data JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

    UNIQUE(game_id, sequence_num)
);

CREATE TABLE IF NOT EXISTS games_v2 (
    id UUID PRIMARY KEY,
    room_code VARCHAR(10) NOT NULL,
    status VARCHAR(20) NOT NULL DEFAULT 'active',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    started_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    num_players INT,
    num_rounds INT,
    options JSONB,
    winner_id VARCHAR(50),
    host_id VARCHAR(50),
    player_ids JSONB NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_events_game_seq ON events(game_id, sequence_num);
CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type);
CREATE INDEX IF NOT EXISTS idx_events_player ON events(player_id) WHERE player_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at);

CREATE INDEX IF NOT EXISTS idx_games_status ON games_v2(status);
CREATE INDEX IF NOT EXISTS idx_games_room ON games_v2(room_code) WHERE status = 'active';
CREATE INDEX IF NOT EXISTS idx_games_completed ON games_v2(completed_at) WHERE status = 'completed';
"#;

pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    Database::connect(database_url).await
}

pub async fn init_schema(conn: &DatabaseConnection) -> Result<(), DbErr> {
    conn.execute_unprepared(SCHEMA_SQL).await?;
    Ok(())
}
