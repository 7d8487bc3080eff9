use std::collections::HashSet;

use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect, sea_query::OnConflict,
};
use uuid::Uuid;

use crate::entity::integration_result::{ActiveModel, Column, Entity as IntegrationResult};

use super::errors::Result;

/// Rows per insert statement.
pub const RESULT_INSERT_BATCH_SIZE: usize = 100;

/// Insert activity results, ignoring rows whose id already exists.
///
/// Ids are derived from activity source ids, so re-ingesting a commit is a
/// no-op here. Returns the number of rows actually inserted.
pub async fn insert_results(db: &DatabaseConnection, rows: Vec<ActiveModel>) -> Result<u64> {
    let mut inserted = 0u64;

    for chunk in rows.chunks(RESULT_INSERT_BATCH_SIZE) {
        inserted += IntegrationResult::insert_many(chunk.to_vec())
            .on_conflict(OnConflict::column(Column::Id).do_nothing().to_owned())
            .exec_without_returning(db)
            .await?;
    }

    tracing::debug!(total = rows.len(), inserted, "Inserted integration results");
    Ok(inserted)
}

/// Which of `ids` already exist as results mined from `channel`.
///
/// Used to drop the activities a fork shares with its parent.
pub async fn find_channel_result_ids(
    db: &DatabaseConnection,
    channel: &str,
    ids: &[Uuid],
) -> Result<HashSet<Uuid>> {
    let mut found = HashSet::new();

    for chunk in ids.chunks(RESULT_INSERT_BATCH_SIZE) {
        let rows: Vec<Uuid> = IntegrationResult::find()
            .select_only()
            .column(Column::Id)
            .filter(Column::Channel.eq(channel))
            .filter(Column::Id.is_in(chunk.iter().copied()))
            .into_tuple()
            .all(db)
            .await?;
        found.extend(rows);
    }

    Ok(found)
}
