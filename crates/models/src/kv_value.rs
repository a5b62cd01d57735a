use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Table name shared with the migration.
pub const TABLE_NAME: &str = "rollar_values";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rollar_values")]
pub struct Model {
    /// Lower-cased owning entity, stored in the `entity` column.
    #[sea_orm(primary_key, auto_increment = false, column_name = "entity")]
    pub owner: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub namespace: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub value: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
