use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(BotConfig::Table)
                    .if_not_exists()
                    .col(pk_auto(BotConfig::Id).big_integer())
                    .col(big_integer(BotConfig::AdminId))
                    .col(integer(BotConfig::BotType).default(0))
                    .col(string(BotConfig::Region).default(""))
                    .col(big_integer(BotConfig::GroupId).unique_key())
                    .col(json_binary(BotConfig::Config).default(Expr::value("{}")))
                    .col(json_binary(BotConfig::Features).default(Expr::value("[]")))
                    .col(
                        timestamp_with_time_zone(BotConfig::CreateTime)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(BotConfig::UpdateTime)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_bot_config_admin_id")
                    .table(BotConfig::Table)
                    .col(BotConfig::AdminId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BotConfig::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum BotConfig {
    Table,
    Id,
    AdminId,
    BotType,
    Region,
    GroupId,
    Config,
    Features,
    CreateTime,
    UpdateTime,
}
