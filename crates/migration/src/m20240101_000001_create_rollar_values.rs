//! Create `rollar_values` table.
//!
//! One row per (entity, namespace, key); `value` holds JSON text.
use sea_orm_migration::{prelude::*, schema::*};
use sea_orm_migration::sea_orm::DatabaseBackend;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let mut table = Table::create();
        table
            .table(RollarValues::Table)
            .if_not_exists()
            .col(string_len(RollarValues::Entity, 255).not_null())
            .col(string_len(RollarValues::Namespace, 255).not_null())
            .col(string_len(RollarValues::Key, 255).not_null())
            .col(text_null(RollarValues::Value))
            .primary_key(
                Index::create()
                    .name("pk_rollar_values")
                    .col(RollarValues::Entity)
                    .col(RollarValues::Namespace)
                    .col(RollarValues::Key),
            );

        if manager.get_database_backend() == DatabaseBackend::MySql {
            table
                .engine("InnoDB")
                .character_set("utf8mb4")
                .collate("utf8mb4_unicode_ci");
        }

        manager.create_table(table.to_owned()).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(RollarValues::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum RollarValues {
    Table,
    Entity,
    Namespace,
    Key,
    Value,
}
