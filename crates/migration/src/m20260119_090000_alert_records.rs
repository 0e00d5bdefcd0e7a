use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
enum AlertRecords {
    Table,
    Id,
    UserId,
    Threshold,
    SentAt,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AlertRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AlertRecords::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AlertRecords::UserId).string().not_null())
                    .col(
                        ColumnDef::new(AlertRecords::Threshold)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AlertRecords::SentAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uidx-alert_records-user_id-threshold")
                    .table(AlertRecords::Table)
                    .col(AlertRecords::UserId)
                    .col(AlertRecords::Threshold)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AlertRecords::Table).to_owned())
            .await
    }
}
