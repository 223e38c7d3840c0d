use sea_orm_migration::sea_query::extension::postgres::Type;
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create trigger_type enum
        manager
            .create_type(
                Type::create()
                    .as_enum(TriggerType::Enum)
                    .values([TriggerType::Schedule, TriggerType::Cron])
                    .to_owned(),
            )
            .await?;

        // Create cron_pattern_type enum
        manager
            .create_type(
                Type::create()
                    .as_enum(CronPatternType::Enum)
                    .values([
                        CronPatternType::Minute,
                        CronPatternType::Hour,
                        CronPatternType::Daily,
                        CronPatternType::Weekly,
                        CronPatternType::Monthly,
                        CronPatternType::Custom,
                    ])
                    .to_owned(),
            )
            .await?;

        // Create task table
        manager
            .create_table(
                Table::create()
                    .table(Task::Table)
                    .if_not_exists()
                    .col(pk_auto(Task::Id).big_integer())
                    .col(string_len(Task::TaskName, 50))
                    .col(text(Task::Description).default(""))
                    .col(integer(Task::Status).default(0))
                    .col(big_integer(Task::AdminId))
                    .col(json_binary(Task::GroupIds))
                    .col(json_binary(Task::MessageIds))
                    .col(
                        ColumnDef::new(Task::TriggerType)
                            .enumeration(
                                TriggerType::Enum,
                                [TriggerType::Schedule, TriggerType::Cron],
                            )
                            .not_null(),
                    )
                    .col(timestamp_with_time_zone_null(Task::ScheduleTime))
                    .col(timestamp_with_time_zone_null(Task::ExpireTime))
                    .col(string_len(Task::CronExpression, 100).default(""))
                    .col(
                        ColumnDef::new(Task::CronPatternType)
                            .enumeration(
                                CronPatternType::Enum,
                                [
                                    CronPatternType::Minute,
                                    CronPatternType::Hour,
                                    CronPatternType::Daily,
                                    CronPatternType::Weekly,
                                    CronPatternType::Monthly,
                                    CronPatternType::Custom,
                                ],
                            )
                            .null(),
                    )
                    .col(json_binary_null(Task::CronConfig))
                    .col(timestamp_with_time_zone_null(Task::LastExecutedAt))
                    .col(timestamp_with_time_zone_null(Task::NextExecuteAt))
                    .col(integer(Task::ExecuteCount).default(0))
                    .col(integer(Task::RetryCount).default(0))
                    .col(integer(Task::MaxRetryCount).default(3))
                    .col(text(Task::ErrorMessage).default(""))
                    .col(integer(Task::IsDelete).default(0))
                    .col(
                        timestamp_with_time_zone(Task::CreateTime)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(Task::UpdateTime)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Indexes for the hot lookups (owner lists, restorer scan, due scan)
        manager
            .create_index(
                Index::create()
                    .name("idx_task_admin_id")
                    .table(Task::Table)
                    .col(Task::AdminId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_task_status")
                    .table(Task::Table)
                    .col(Task::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_task_trigger_type")
                    .table(Task::Table)
                    .col(Task::TriggerType)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_task_next_execute_at")
                    .table(Task::Table)
                    .col(Task::NextExecuteAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Task::Table).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(CronPatternType::Enum).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(TriggerType::Enum).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Task {
    Table,
    Id,
    TaskName,
    Description,
    Status,
    AdminId,
    GroupIds,
    MessageIds,
    TriggerType,
    ScheduleTime,
    ExpireTime,
    CronExpression,
    CronPatternType,
    CronConfig,
    LastExecutedAt,
    NextExecuteAt,
    ExecuteCount,
    RetryCount,
    MaxRetryCount,
    ErrorMessage,
    IsDelete,
    CreateTime,
    UpdateTime,
}

#[derive(DeriveIden)]
enum TriggerType {
    #[sea_orm(iden = "trigger_type")]
    Enum,
    #[sea_orm(iden = "schedule")]
    Schedule,
    #[sea_orm(iden = "cron")]
    Cron,
}

#[derive(DeriveIden)]
enum CronPatternType {
    #[sea_orm(iden = "cron_pattern_type")]
    Enum,
    #[sea_orm(iden = "minute")]
    Minute,
    #[sea_orm(iden = "hour")]
    Hour,
    #[sea_orm(iden = "daily")]
    Daily,
    #[sea_orm(iden = "weekly")]
    Weekly,
    #[sea_orm(iden = "monthly")]
    Monthly,
    #[sea_orm(iden = "custom")]
    Custom,
}
