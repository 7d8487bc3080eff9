//! Repository entity - the unit of work claimed by ingestion workers.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::repository_priority::RepositoryPriority;
use crate::entity::repository_state::RepositoryState;

/// A git repository tracked by the processing registry.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "repositories")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    // ─── Source ──────────────────────────────────────────────────────────────
    /// Clone URL of the remote.
    #[sea_orm(column_type = "Text")]
    pub url: String,
    /// Default branch seen on the last successful run.
    pub branch: Option<String>,
    /// Clone URL of the upstream repository when this one is a fork.
    #[sea_orm(column_type = "Text", nullable)]
    pub forked_from: Option<String>,

    // ─── Processing ──────────────────────────────────────────────────────────
    pub state: RepositoryState,
    pub priority: RepositoryPriority,
    pub last_processed_at: Option<DateTimeWithTimeZone>,
    /// Tip commit of the last fully processed history.
    pub last_processed_commit: Option<String>,
    /// Set while a worker owns the row.
    pub locked_at: Option<DateTimeWithTimeZone>,
    /// Full re-clones of an already onboarded repository (default branch moved).
    pub re_onboarding_count: i32,

    // ─── Maintainers ─────────────────────────────────────────────────────────
    pub maintainer_file: Option<String>,
    pub last_maintainer_run_at: Option<DateTimeWithTimeZone>,

    // ─── Software value ──────────────────────────────────────────────────────
    /// Estimated cost of the code at `HEAD` on the last measured run.
    pub software_value: Option<i64>,

    // ─── Ownership ───────────────────────────────────────────────────────────
    pub segment_id: Uuid,
    pub integration_id: Uuid,

    // ─── Timestamps ──────────────────────────────────────────────────────────
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
    /// Soft-deleted rows are never claimed.
    pub deleted_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::repository_maintainer::Entity")]
    Maintainers,
}

impl Related<super::repository_maintainer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Maintainers.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether this repository has been processed to completion before.
    pub fn is_onboarded(&self) -> bool {
        self.last_processed_commit.is_some()
    }

    pub fn is_fork(&self) -> bool {
        self.forked_from.is_some()
    }
}
