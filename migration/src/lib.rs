pub use sea_orm_migration::prelude::*;

mod m20250901_000001_create_memberships;
mod m20250901_000002_create_check_ins;
mod m20250901_000003_create_rate_limit_counters;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250901_000001_create_memberships::Migration),
            Box::new(m20250901_000002_create_check_ins::Migration),
            Box::new(m20250901_000003_create_rate_limit_counters::Migration),
        ]
    }
}
