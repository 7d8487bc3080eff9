//! Repository registry: atomic claim, release and completion of repositories.
//!
//! Every state transition of a repository goes through this module. A claim
//! is a single statement that selects and locks one row, so any number of
//! workers can poll the same table without coordinating.

mod claim;
mod errors;
mod lifecycle;
mod maintainers;
mod results;

pub use claim::{
    CLAIM_ATTEMPTS, CLAIM_RETRY_DELAY, ClaimKind, ClaimOptions, acquire_onboarding,
    acquire_recurrent, acquire_repository_for_processing, can_onboard_more,
};
pub use errors::{RegistryError, Result};
pub use lifecycle::{
    find_by_id, find_by_url, increase_re_onboarding_count, mark_processed, release,
    update_last_processed_commit, update_maintainer_run, update_software_value,
};
pub use maintainers::{MaintainerChanges, MaintainerEntry, active_maintainers, sync_maintainers};
pub use results::{RESULT_INSERT_BATCH_SIZE, find_channel_result_ids, insert_results};

#[cfg(test)]
mod tests {
    use sea_orm::{DatabaseBackend, DbErr, MockDatabase, MockExecResult};
    use uuid::Uuid;

    use super::*;
    use crate::entity::repository_state::RepositoryState;

    #[test]
    fn test_registry_error_not_found_by_id() {
        let id = Uuid::new_v4();
        let err = RegistryError::not_found_by_id(id);
        let msg = err.to_string();
        assert!(msg.contains("not found"));
        assert!(msg.contains(&id.to_string()));
    }

    #[test]
    fn test_registry_error_locking_display() {
        let err = RegistryError::Locking {
            kind: ClaimKind::Onboarding,
            source: DbErr::Custom("lock timeout".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("onboarding"));
        assert!(msg.contains("lock timeout"));
        assert!(err.is_locking());
    }

    #[test]
    fn test_registry_error_from_db_err() {
        let err: RegistryError = DbErr::Custom("boom".into()).into();
        assert!(matches!(err, RegistryError::Database(_)));
        assert!(!err.is_locking());
    }

    #[tokio::test]
    async fn test_mark_processed_rejects_non_terminal_state() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let err = mark_processed(&db, Uuid::new_v4(), RepositoryState::Processing)
            .await
            .expect_err("processing is not terminal");
        assert!(err.to_string().contains("not a terminal"));
    }

    #[tokio::test]
    async fn test_release_missing_row_is_not_found() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();

        let id = Uuid::new_v4();
        let err = release(&db, id).await.expect_err("no row to release");
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_insert_results_empty_is_noop() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        assert_eq!(insert_results(&db, Vec::new()).await.expect("no-op"), 0);
    }

    #[tokio::test]
    async fn test_channel_lookup_without_ids_skips_the_query() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let found = find_channel_result_ids(&db, "https://example.com/parent.git", &[])
            .await
            .expect("no-op");
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_re_onboarding_missing_row_is_not_found() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();

        let err = increase_re_onboarding_count(&db, Uuid::new_v4())
            .await
            .expect_err("no row to update");
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }
}
