//! Initial migration to create the gitmill database schema.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.create_repositories(manager).await?;
        self.create_service_executions(manager).await?;
        self.create_integration_results(manager).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(IntegrationResults::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ServiceExecutions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Repositories::Table).to_owned())
            .await?;
        Ok(())
    }
}

impl Migration {
    async fn create_repositories(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Repositories::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Repositories::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    // Source
                    .col(ColumnDef::new(Repositories::Url).text().not_null())
                    .col(ColumnDef::new(Repositories::Branch).string().null())
                    // Processing
                    .col(
                        ColumnDef::new(Repositories::State)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Repositories::Priority)
                            .integer()
                            .not_null()
                            .default(2),
                    )
                    .col(
                        ColumnDef::new(Repositories::LastProcessedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Repositories::LastProcessedCommit)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Repositories::LockedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    // Maintainers
                    .col(
                        ColumnDef::new(Repositories::MaintainerFile)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Repositories::LastMaintainerRunAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    // Ownership
                    .col(ColumnDef::new(Repositories::SegmentId).uuid().not_null())
                    .col(
                        ColumnDef::new(Repositories::IntegrationId)
                            .uuid()
                            .not_null(),
                    )
                    // Timestamps
                    .col(
                        ColumnDef::new(Repositories::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Repositories::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Repositories::DeletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Claim scans filter on state and order by priority
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_repositories_state_priority")
                    .table(Repositories::Table)
                    .col(Repositories::State)
                    .col(Repositories::Priority)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_repositories_last_processed_at")
                    .table(Repositories::Table)
                    .col(Repositories::LastProcessedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_service_executions(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ServiceExecutions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ServiceExecutions::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ServiceExecutions::RepoId).uuid().not_null())
                    .col(
                        ColumnDef::new(ServiceExecutions::OperationType)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ServiceExecutions::Status).string().not_null())
                    .col(ColumnDef::new(ServiceExecutions::ErrorCode).string().null())
                    .col(
                        ColumnDef::new(ServiceExecutions::ErrorMessage)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ServiceExecutions::ExecutionTimeSec)
                            .double()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ServiceExecutions::Metrics)
                            .json()
                            .not_null()
                            .default(Expr::cust("'{}'")),
                    )
                    .col(
                        ColumnDef::new(ServiceExecutions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_service_executions_repo_id")
                    .table(ServiceExecutions::Table)
                    .col(ServiceExecutions::RepoId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_integration_results(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(IntegrationResults::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(IntegrationResults::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(IntegrationResults::State)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(IntegrationResults::Data).json().not_null())
                    .col(
                        ColumnDef::new(IntegrationResults::TenantId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IntegrationResults::IntegrationId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IntegrationResults::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_integration_results_state")
                    .table(IntegrationResults::Table)
                    .col(IntegrationResults::State)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
#[sea_orm(iden = "repositories")]
enum Repositories {
    Table,
    Id,
    Url,
    Branch,
    State,
    Priority,
    LastProcessedAt,
    LastProcessedCommit,
    LockedAt,
    MaintainerFile,
    LastMaintainerRunAt,
    SegmentId,
    IntegrationId,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(DeriveIden)]
#[sea_orm(iden = "service_executions")]
enum ServiceExecutions {
    Table,
    Id,
    RepoId,
    OperationType,
    Status,
    ErrorCode,
    ErrorMessage,
    ExecutionTimeSec,
    Metrics,
    CreatedAt,
}

#[derive(DeriveIden)]
#[sea_orm(iden = "integration_results")]
enum IntegrationResults {
    Table,
    Id,
    State,
    Data,
    TenantId,
    IntegrationId,
    CreatedAt,
}
