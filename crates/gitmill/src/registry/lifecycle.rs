use chrono::Utc;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    prelude::DateTimeWithTimeZone,
    sea_query::Expr,
};
use uuid::Uuid;

use crate::entity::repository::{Column, Entity as Repository, Model};
use crate::entity::repository_priority::RepositoryPriority;
use crate::entity::repository_state::RepositoryState;

use super::errors::{RegistryError, Result};

fn ensure_updated(rows_affected: u64, id: Uuid) -> Result<()> {
    if rows_affected == 0 {
        return Err(RegistryError::not_found_by_id(id));
    }
    Ok(())
}

/// Find a repository by its UUID.
pub async fn find_by_id(db: &DatabaseConnection, id: Uuid) -> Result<Option<Model>> {
    Ok(Repository::find_by_id(id).one(db).await?)
}

/// Find a tracked (not soft-deleted) repository by clone URL.
pub async fn find_by_url(db: &DatabaseConnection, url: &str) -> Result<Option<Model>> {
    Ok(Repository::find()
        .filter(Column::Url.eq(url))
        .filter(Column::DeletedAt.is_null())
        .one(db)
        .await?)
}

/// Clear the claim on a repository, whatever its state.
pub async fn release(db: &DatabaseConnection, id: Uuid) -> Result<()> {
    let result = Repository::update_many()
        .col_expr(Column::LockedAt, Expr::value(Option::<DateTimeWithTimeZone>::None))
        .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
        .filter(Column::Id.eq(id))
        .exec(db)
        .await?;

    ensure_updated(result.rows_affected, id)?;
    tracing::debug!(%id, "Released repository");
    Ok(())
}

/// Record the end of a processing run.
///
/// Sets the terminal state, stamps `last_processed_at` and resets the
/// priority to normal so urgent requests do not stay urgent forever.
///
/// # Errors
/// Returns `RegistryError::InvalidInput` for `pending` or `processing`.
pub async fn mark_processed(
    db: &DatabaseConnection,
    id: Uuid,
    state: RepositoryState,
) -> Result<()> {
    if !state.is_terminal() {
        return Err(RegistryError::non_terminal_state(state));
    }

    let now = Utc::now().fixed_offset();
    let result = Repository::update_many()
        .col_expr(Column::State, Expr::value(state))
        .col_expr(Column::LastProcessedAt, Expr::value(now))
        .col_expr(Column::Priority, Expr::value(RepositoryPriority::Normal))
        .col_expr(Column::UpdatedAt, Expr::value(now))
        .filter(Column::Id.eq(id))
        .exec(db)
        .await?;

    ensure_updated(result.rows_affected, id)?;
    tracing::info!(%id, %state, "Marked repository as processed");
    Ok(())
}

/// Remember the newest processed commit and the branch it was read from.
pub async fn update_last_processed_commit(
    db: &DatabaseConnection,
    id: Uuid,
    commit: &str,
    branch: Option<&str>,
) -> Result<()> {
    let result = Repository::update_many()
        .col_expr(Column::LastProcessedCommit, Expr::value(commit))
        .col_expr(Column::Branch, Expr::value(branch.map(str::to_string)))
        .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
        .filter(Column::Id.eq(id))
        .exec(db)
        .await?;

    ensure_updated(result.rows_affected, id)
}

/// Stamp a maintainer run, optionally recording the file it was read from.
pub async fn update_maintainer_run(
    db: &DatabaseConnection,
    id: Uuid,
    maintainer_file: Option<&str>,
) -> Result<()> {
    let now = Utc::now().fixed_offset();
    let mut update = Repository::update_many()
        .col_expr(Column::LastMaintainerRunAt, Expr::value(now))
        .col_expr(Column::UpdatedAt, Expr::value(now));
    if let Some(file) = maintainer_file {
        update = update.col_expr(Column::MaintainerFile, Expr::value(file));
    }

    let result = update.filter(Column::Id.eq(id)).exec(db).await?;
    ensure_updated(result.rows_affected, id)
}

/// Store the estimated value of the code at `HEAD`.
pub async fn update_software_value(db: &DatabaseConnection, id: Uuid, value: i64) -> Result<()> {
    let result = Repository::update_many()
        .col_expr(Column::SoftwareValue, Expr::value(value))
        .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
        .filter(Column::Id.eq(id))
        .exec(db)
        .await?;

    ensure_updated(result.rows_affected, id)
}

/// Count one more full re-clone of an onboarded repository.
pub async fn increase_re_onboarding_count(db: &DatabaseConnection, id: Uuid) -> Result<()> {
    let result = Repository::update_many()
        .col_expr(
            Column::ReOnboardingCount,
            Expr::col(Column::ReOnboardingCount).add(1),
        )
        .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
        .filter(Column::Id.eq(id))
        .exec(db)
        .await?;

    ensure_updated(result.rows_affected, id)?;
    tracing::info!(%id, "Repository is being re-onboarded");
    Ok(())
}
