use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, sea_query::Expr,
};
use uuid::Uuid;

use crate::entity::repository_maintainer::{
    ActiveModel, Column, Entity as RepositoryMaintainer, Model,
};

use super::errors::Result;

/// One person listed in the current maintainer file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintainerEntry {
    pub identity: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub github_username: Option<String>,
    pub role: String,
    pub original_role: String,
}

/// What [`sync_maintainers`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintainerChanges {
    pub added: usize,
    pub role_changes: usize,
    pub ended: usize,
    pub unchanged: usize,
}

/// Maintainers currently holding a role, ordered by identity.
pub async fn active_maintainers(db: &DatabaseConnection, repo_id: Uuid) -> Result<Vec<Model>> {
    Ok(RepositoryMaintainer::find()
        .filter(Column::RepositoryId.eq(repo_id))
        .filter(Column::EndDate.is_null())
        .order_by_asc(Column::Identity)
        .all(db)
        .await?)
}

/// Bring the stored maintainers of a repository in line with `entries`.
///
/// New people get a row starting now; people whose role changed get their
/// open row closed and a new one opened; people no longer listed get their
/// open row closed. On the very first scan of a repository the start date
/// is left unknown. Later duplicates of an identity in `entries` win.
pub async fn sync_maintainers(
    db: &DatabaseConnection,
    repo_id: Uuid,
    entries: &[MaintainerEntry],
) -> Result<MaintainerChanges> {
    let now = Utc::now().fixed_offset();
    let first_scan = RepositoryMaintainer::find()
        .filter(Column::RepositoryId.eq(repo_id))
        .count(db)
        .await?
        == 0;
    let start_date = (!first_scan).then_some(now);

    let current: HashMap<String, Model> = active_maintainers(db, repo_id)
        .await?
        .into_iter()
        .map(|m| (m.identity.clone(), m))
        .collect();
    let incoming: HashMap<&str, &MaintainerEntry> = entries
        .iter()
        .map(|entry| (entry.identity.as_str(), entry))
        .collect();

    let mut changes = MaintainerChanges::default();
    for (identity, entry) in &incoming {
        match current.get(*identity) {
            None => {
                insert_maintainer(db, repo_id, entry, start_date, now).await?;
                changes.added += 1;
            }
            Some(existing) if existing.role != entry.role => {
                end_maintainer(db, existing.id, now).await?;
                insert_maintainer(db, repo_id, entry, Some(now), now).await?;
                changes.role_changes += 1;
            }
            Some(_) => changes.unchanged += 1,
        }
    }

    for (identity, existing) in &current {
        if !incoming.contains_key(identity.as_str()) {
            end_maintainer(db, existing.id, now).await?;
            changes.ended += 1;
        }
    }

    tracing::debug!(
        %repo_id,
        added = changes.added,
        role_changes = changes.role_changes,
        ended = changes.ended,
        "Synced maintainers"
    );
    Ok(changes)
}

async fn insert_maintainer(
    db: &DatabaseConnection,
    repo_id: Uuid,
    entry: &MaintainerEntry,
    start_date: Option<DateTime<FixedOffset>>,
    now: DateTime<FixedOffset>,
) -> Result<()> {
    ActiveModel {
        id: Set(Uuid::new_v4()),
        repository_id: Set(repo_id),
        identity: Set(entry.identity.clone()),
        name: Set(entry.name.clone()),
        email: Set(entry.email.clone()),
        github_username: Set(entry.github_username.clone()),
        role: Set(entry.role.clone()),
        original_role: Set(entry.original_role.clone()),
        start_date: Set(start_date),
        end_date: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?;
    Ok(())
}

async fn end_maintainer(
    db: &DatabaseConnection,
    id: Uuid,
    end_date: DateTime<FixedOffset>,
) -> Result<()> {
    RepositoryMaintainer::update_many()
        .col_expr(Column::EndDate, Expr::value(end_date))
        .col_expr(Column::UpdatedAt, Expr::value(end_date))
        .filter(Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(())
}
