use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
enum Balances {
    Table,
    UserId,
    Balance,
    ExpiresAt,
    LastPack,
    AutoExtend,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Balances::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Balances::UserId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Balances::Balance)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Balances::ExpiresAt).timestamp())
                    .col(ColumnDef::new(Balances::LastPack).string())
                    .col(
                        ColumnDef::new(Balances::AutoExtend)
                            .boolean()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-balances-expires_at")
                    .table(Balances::Table)
                    .col(Balances::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Balances::Table).to_owned())
            .await
    }
}
