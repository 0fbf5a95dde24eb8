use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::TryStreamExt;
use sea_orm::{
    ActiveValue::NotSet, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use uuid::Uuid;

use crate::events::{EventPayload, GameEvent};
use crate::store::entity::events;

use super::super::StoreError;
use super::EventStore;

const STREAM_PAGE: u64 = 256;

/// Postgres-backed event store over sea-orm.
pub struct SeaOrmEventStore {
    conn: DatabaseConnection,
}

impl SeaOrmEventStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    fn active_model(event: &GameEvent) -> Result<events::ActiveModel, StoreError> {
        Ok(events::ActiveModel {
            id: NotSet,
            game_id: Set(event.game_id),
            sequence_num: Set(event.sequence_num),
            event_type: Set(event.event_type().as_str().to_string()),
            player_id: Set(event.player_id.clone()),
            event_data: Set(serde_json::to_value(&event.payload).map_err(StoreError::Codec)?),
            created_at: Set(event.timestamp),
        })
    }

    fn classify(event: &GameEvent, err: DbErr) -> StoreError {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => StoreError::Concurrency {
                game_id: event.game_id,
                sequence: event.sequence_num,
            },
            _ => StoreError::Database(err),
        }
    }

    async fn fetch_page(
        conn: &DatabaseConnection,
        game_id: Uuid,
        from_sequence: i64,
        limit: u64,
    ) -> Result<Vec<GameEvent>, StoreError> {
        let rows = events::Entity::find()
            .filter(events::Column::GameId.eq(game_id))
            .filter(events::Column::SequenceNum.gte(from_sequence))
            .order_by_asc(events::Column::SequenceNum)
            .limit(limit)
            .all(conn)
            .await?;
        rows.into_iter().map(model_to_event).collect()
    }
}

fn model_to_event(row: events::Model) -> Result<GameEvent, StoreError> {
    let payload: EventPayload =
        serde_json::from_value(row.event_data).map_err(StoreError::Codec)?;
    Ok(GameEvent {
        game_id: row.game_id,
        sequence_num: row.sequence_num,
        timestamp: row.created_at,
        player_id: row.player_id,
        payload,
    })
}

#[async_trait]
impl EventStore for SeaOrmEventStore {
    async fn append(&self, event: &GameEvent) -> Result<i64, StoreError> {
        let active = Self::active_model(event)?;
        let result = events::Entity::insert(active)
            .exec(&self.conn)
            .await
            .map_err(|err| Self::classify(event, err))?;
        Ok(result.last_insert_id)
    }

    async fn append_batch(&self, batch: &[GameEvent]) -> Result<Vec<i64>, StoreError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let txn = self.conn.begin().await?;
        let mut ids = Vec::with_capacity(batch.len());
        for event in batch {
            let active = Self::active_model(event)?;
            let result = match events::Entity::insert(active).exec(&txn).await {
                Ok(result) => result,
                Err(err) => {
                    let _ = txn.rollback().await;
                    return Err(Self::classify(event, err));
                }
            };
            ids.push(result.last_insert_id);
        }
        txn.commit().await?;
        Ok(ids)
    }

    async fn get_events(
        &self,
        game_id: Uuid,
        from_sequence: i64,
        to_sequence: Option<i64>,
    ) -> Result<Vec<GameEvent>, StoreError> {
        let mut query = events::Entity::find()
            .filter(events::Column::GameId.eq(game_id))
            .filter(events::Column::SequenceNum.gte(from_sequence));
        if let Some(to_sequence) = to_sequence {
            query = query.filter(events::Column::SequenceNum.lte(to_sequence));
        }
        let rows = query
            .order_by_asc(events::Column::SequenceNum)
            .all(&self.conn)
            .await?;
        rows.into_iter().map(model_to_event).collect()
    }

    async fn get_latest_sequence(&self, game_id: Uuid) -> Result<i64, StoreError> {
        let row = events::Entity::find()
            .filter(events::Column::GameId.eq(game_id))
            .order_by_desc(events::Column::SequenceNum)
            .one(&self.conn)
            .await?;
        Ok(row.map(|model| model.sequence_num).unwrap_or(-1))
    }

    fn stream_events(
        &self,
        game_id: Uuid,
        from_sequence: i64,
    ) -> BoxStream<'static, Result<GameEvent, StoreError>> {
        let conn = self.conn.clone();
        let pages = stream::try_unfold(from_sequence, move |cursor| {
            let conn = conn.clone();
            async move {
                let batch = Self::fetch_page(&conn, game_id, cursor, STREAM_PAGE).await?;
                match batch.last() {
                    None => Ok::<_, StoreError>(None),
                    Some(last) => {
                        let next = last.sequence_num + 1;
                        Ok(Some((batch, next)))
                    }
                }
            }
        });
        Box::pin(
            pages
                .map_ok(|batch| stream::iter(batch.into_iter().map(Ok::<_, StoreError>)))
                .try_flatten(),
        )
    }

    async fn get_event_count(&self, game_id: Uuid) -> Result<u64, StoreError> {
        let count = events::Entity::find()
            .filter(events::Column::GameId.eq(game_id))
            .count(&self.conn)
            .await?;
        Ok(count)
    }
}
