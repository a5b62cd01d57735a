//! Migrator creating the key-value table. Every migration uses
//! `if_not_exists`, so running `up` on an existing database is a no-op.
pub use sea_orm_migration::prelude::*;

mod m20240101_000001_create_rollar_values;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20240101_000001_create_rollar_values::Migration)]
    }
}
