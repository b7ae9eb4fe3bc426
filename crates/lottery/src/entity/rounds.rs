//! rounds entity
//! One lottery cycle; at most one row is active at any time

use sea_orm::entity::prelude::*;

/// Value stored in `active_slot` while a round accepts tickets.
/// The unique index over this column admits a single active round.
pub const ACTIVE_SLOT: i32 = 1;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "rounds")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub active: bool,
    #[sea_orm(unique)]
    pub active_slot: Option<i32>, // ACTIVE_SLOT while open, NULL once closed
    #[sea_orm(column_type = "TimestampWithTimeZone")]
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::tickets::Entity")]
    Tickets,
    #[sea_orm(has_one = "super::drawn_numbers::Entity")]
    DrawnNumbers,
}

impl Related<super::tickets::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tickets.def()
    }
}

impl Related<super::drawn_numbers::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DrawnNumbers.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
