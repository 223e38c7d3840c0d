pub use sea_orm_migration::prelude::*;

mod m20250715_000000_create_task;
mod m20250715_000001_create_bot_config;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250715_000000_create_task::Migration),
            Box::new(m20250715_000001_create_bot_config::Migration),
        ]
    }
}
