use sea_orm::entity::prelude::*;

/// Last known audiobook position, kept locally so playback can resume when
/// the storefront is unreachable.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "progress_cache")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub content_id: String,
    pub kind: String,
    pub position: f64,
    pub total: f64,
    pub percent_complete: f64,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
