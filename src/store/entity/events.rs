use sea_orm::entity::prelude::*;

/// Append-only event log row. `(game_id, sequence_num)` is unique.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub game_id: Uuid,
    pub sequence_num: i64,
    pub event_type: String,
    pub player_id: Option<String>,
    pub event_data: Json,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
