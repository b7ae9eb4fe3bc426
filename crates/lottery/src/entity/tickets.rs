//! tickets entity
//! A participant's number choice, unique per (round_id, identity)

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "tickets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub code: String, // UUID v4, public lookup key
    pub round_id: i32,
    pub identity: String, // participant-supplied id number, at most 20 chars
    #[sea_orm(column_type = "Text")]
    pub numbers: String, // JSON array of integers
    pub submitter_ref: String, // authenticated participant subject
    #[sea_orm(column_type = "TimestampWithTimeZone")]
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::rounds::Entity",
        from = "Column::RoundId",
        to = "super::rounds::Column::Id",
        on_update = "Cascade",
        on_delete = "Restrict"
    )]
    Round,
}

impl Related<super::rounds::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Round.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
