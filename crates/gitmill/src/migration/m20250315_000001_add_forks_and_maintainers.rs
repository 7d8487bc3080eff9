//! Track forks, maintainer history and software value.
//!
//! Repositories learn their upstream, how often they were re-onboarded and
//! their estimated value; results remember the remote they were mined from
//! so a fork can skip what its parent already produced.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(Repositories::Table)
                    .add_column(ColumnDef::new(Repositories::ForkedFrom).text().null())
                    .to_owned(),
            )
            .await?;

        manager
            .alter_table(
                Table::alter()
                    .table(Repositories::Table)
                    .add_column(
                        ColumnDef::new(Repositories::ReOnboardingCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .alter_table(
                Table::alter()
                    .table(Repositories::Table)
                    .add_column(ColumnDef::new(Repositories::SoftwareValue).big_integer().null())
                    .to_owned(),
            )
            .await?;

        manager
            .alter_table(
                Table::alter()
                    .table(IntegrationResults::Table)
                    .add_column(ColumnDef::new(IntegrationResults::Channel).text().null())
                    .to_owned(),
            )
            .await?;

        // Fork checks look results up by channel
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_integration_results_channel")
                    .table(IntegrationResults::Table)
                    .col(IntegrationResults::Channel)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(RepositoryMaintainers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RepositoryMaintainers::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(RepositoryMaintainers::RepositoryId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RepositoryMaintainers::Identity)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RepositoryMaintainers::Name).string().null())
                    .col(ColumnDef::new(RepositoryMaintainers::Email).string().null())
                    .col(
                        ColumnDef::new(RepositoryMaintainers::GithubUsername)
                            .string()
                            .null(),
                    )
                    .col(ColumnDef::new(RepositoryMaintainers::Role).string().not_null())
                    .col(
                        ColumnDef::new(RepositoryMaintainers::OriginalRole)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RepositoryMaintainers::StartDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(RepositoryMaintainers::EndDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(RepositoryMaintainers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RepositoryMaintainers::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_repository_maintainers_repository")
                            .from(RepositoryMaintainers::Table, RepositoryMaintainers::RepositoryId)
                            .to(Repositories::Table, Repositories::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_repository_maintainers_repository_end_date")
                    .table(RepositoryMaintainers::Table)
                    .col(RepositoryMaintainers::RepositoryId)
                    .col(RepositoryMaintainers::EndDate)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RepositoryMaintainers::Table).to_owned())
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_integration_results_channel")
                    .table(IntegrationResults::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .alter_table(
                Table::alter()
                    .table(IntegrationResults::Table)
                    .drop_column(IntegrationResults::Channel)
                    .to_owned(),
            )
            .await?;

        // One column per statement: SQLite cannot drop several at once
        for column in [
            Repositories::SoftwareValue,
            Repositories::ReOnboardingCount,
            Repositories::ForkedFrom,
        ] {
            manager
                .alter_table(
                    Table::alter()
                        .table(Repositories::Table)
                        .drop_column(column)
                        .to_owned(),
                )
                .await?;
        }
        Ok(())
    }
}

#[derive(DeriveIden)]
#[sea_orm(iden = "repositories")]
enum Repositories {
    Table,
    Id,
    ForkedFrom,
    ReOnboardingCount,
    SoftwareValue,
}

#[derive(DeriveIden)]
#[sea_orm(iden = "integration_results")]
enum IntegrationResults {
    Table,
    Channel,
}

#[derive(DeriveIden)]
#[sea_orm(iden = "repository_maintainers")]
enum RepositoryMaintainers {
    Table,
    Id,
    RepositoryId,
    Identity,
    Name,
    Email,
    GithubUsername,
    Role,
    OriginalRole,
    StartDate,
    EndDate,
    CreatedAt,
    UpdatedAt,
}
