use sea_orm::entity::prelude::*;

/// Denormalized game metadata, a derived view over the event log used
/// for recovery scans and history queries.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "games_v2")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub room_code: String,
    pub status: String,
    pub created_at: DateTimeUtc,
    pub started_at: Option<DateTimeUtc>,
    pub completed_at: Option<DateTimeUtc>,
    pub num_players: Option<i32>,
    pub num_rounds: Option<i32>,
    pub options: Option<Json>,
    pub winner_id: Option<String>,
    pub host_id: Option<String>,
    pub player_ids: Json,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
