use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::engine::{GameOptions, PlayerId};
use crate::store::entity::games;

use super::super::StoreError;
use super::{GameDirectory, GameRecord, GameStatus};

pub struct SeaOrmGameDirectory {
    conn: DatabaseConnection,
}

impl SeaOrmGameDirectory {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    async fn find(&self, game_id: Uuid) -> Result<Option<games::Model>, StoreError> {
        Ok(games::Entity::find_by_id(game_id).one(&self.conn).await?)
    }
}

fn model_to_record(model: games::Model) -> Result<GameRecord, StoreError> {
    let options: Option<GameOptions> = model
        .options
        .map(serde_json::from_value)
        .transpose()
        .map_err(StoreError::Codec)?;
    let player_ids: Vec<PlayerId> =
        serde_json::from_value(model.player_ids).map_err(StoreError::Codec)?;
    Ok(GameRecord {
        id: model.id,
        room_code: model.room_code,
        status: GameStatus::parse(&model.status).unwrap_or(GameStatus::Abandoned),
        created_at: model.created_at,
        started_at: model.started_at,
        completed_at: model.completed_at,
        num_players: model.num_players.map(|n| n.max(0) as u32),
        num_rounds: model.num_rounds.map(|n| n.max(0) as u32),
        options,
        winner_id: model.winner_id,
        host_id: model.host_id,
        player_ids,
    })
}

#[async_trait]
impl GameDirectory for SeaOrmGameDirectory {
    async fn create_game(
        &self,
        game_id: Uuid,
        room_code: &str,
        host_id: &str,
        options: &GameOptions,
    ) -> Result<(), StoreError> {
        let active = games::ActiveModel {
            id: Set(game_id),
            room_code: Set(room_code.to_string()),
            status: Set(GameStatus::Active.as_str().to_string()),
            created_at: Set(Utc::now()),
            started_at: NotSet,
            completed_at: NotSet,
            num_players: NotSet,
            num_rounds: NotSet,
            options: Set(Some(
                serde_json::to_value(options).map_err(StoreError::Codec)?,
            )),
            winner_id: NotSet,
            host_id: Set(Some(host_id.to_string())),
            player_ids: Set(serde_json::json!([])),
        };
        games::Entity::insert(active)
            .on_conflict(
                OnConflict::column(games::Column::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await?;
        Ok(())
    }

    async fn mark_started(
        &self,
        game_id: Uuid,
        num_players: u32,
        num_rounds: u32,
        player_ids: &[PlayerId],
    ) -> Result<(), StoreError> {
        if let Some(model) = self.find(game_id).await? {
            let mut active: games::ActiveModel = model.into();
            active.started_at = Set(Some(Utc::now()));
            active.num_players = Set(Some(num_players as i32));
            active.num_rounds = Set(Some(num_rounds as i32));
            active.player_ids =
                Set(serde_json::to_value(player_ids).map_err(StoreError::Codec)?);
            active.update(&self.conn).await?;
        }
        Ok(())
    }

    async fn mark_completed(
        &self,
        game_id: Uuid,
        winner_id: Option<&str>,
    ) -> Result<(), StoreError> {
        if let Some(model) = self.find(game_id).await? {
            let mut active: games::ActiveModel = model.into();
            active.status = Set(GameStatus::Completed.as_str().to_string());
            active.completed_at = Set(Some(Utc::now()));
            active.winner_id = Set(winner_id.map(Into::into));
            active.update(&self.conn).await?;
        }
        Ok(())
    }

    async fn mark_abandoned(&self, game_id: Uuid) -> Result<(), StoreError> {
        if let Some(model) = self.find(game_id).await? {
            let mut active: games::ActiveModel = model.into();
            active.status = Set(GameStatus::Abandoned.as_str().to_string());
            active.completed_at = Set(Some(Utc::now()));
            active.update(&self.conn).await?;
        }
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<GameRecord>, StoreError> {
        let rows = games::Entity::find()
            .filter(games::Column::Status.eq(GameStatus::Active.as_str()))
            .order_by_desc(games::Column::CreatedAt)
            .all(&self.conn)
            .await?;
        rows.into_iter().map(model_to_record).collect()
    }

    async fn get(&self, game_id: Uuid) -> Result<Option<GameRecord>, StoreError> {
        self.find(game_id).await?.map(model_to_record).transpose()
    }
}
