//! Sea-ORM entity for the `events` table (spec §6.3): the relay's only
//! durable entity.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub id: String,
    #[sea_orm(column_type = "Text", indexed)]
    pub pubkey: String,
    #[sea_orm(indexed)]
    pub created_at: i64,
    #[sea_orm(indexed)]
    pub kind: i32,
    /// `jsonb` array of tag arrays, stored as the nested-array wire shape.
    pub tags: Json,
    pub content: String,
    #[sea_orm(column_type = "Text")]
    pub sig: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
