pub use sea_orm_migration::prelude::*;

mod m20260106_090000_users;
mod m20260106_100000_balances;
mod m20260106_110000_ledger_entries;
mod m20260112_090000_idempotency_key;
mod m20260119_090000_alert_records;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260106_090000_users::Migration),
            Box::new(m20260106_100000_balances::Migration),
            Box::new(m20260106_110000_ledger_entries::Migration),
            Box::new(m20260112_090000_idempotency_key::Migration),
            Box::new(m20260119_090000_alert_records::Migration),
        ]
    }
}
