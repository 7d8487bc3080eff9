//! RepositoryMaintainer entity - maintainer history of a repository.
//!
//! A row is one person holding one role over a period. Role changes and
//! departures close the open row by setting `end_date`; they never delete.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Normalized role of a person who maintains the repository.
pub const MAINTAINER_ROLE: &str = "maintainer";
/// Normalized role of everyone else listed in a maintainer file.
pub const CONTRIBUTOR_ROLE: &str = "contributor";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "repository_maintainers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub repository_id: Uuid,

    // ─── Identity ────────────────────────────────────────────────────────────
    /// Lowercased GitHub username, or email when no username is known.
    pub identity: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub github_username: Option<String>,

    // ─── Role ────────────────────────────────────────────────────────────────
    /// `maintainer` or `contributor`.
    pub role: String,
    /// Slug of the title as written in the maintainer file.
    pub original_role: String,

    // ─── Period ──────────────────────────────────────────────────────────────
    /// `None` for people found by the first scan of the repository.
    pub start_date: Option<DateTimeWithTimeZone>,
    /// `None` while the role is held.
    pub end_date: Option<DateTimeWithTimeZone>,

    // ─── Timestamps ──────────────────────────────────────────────────────────
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::repository::Entity",
        from = "Column::RepositoryId",
        to = "super::repository::Column::Id"
    )]
    Repository,
}

impl Related<super::repository::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Repository.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_active(&self) -> bool {
        self.end_date.is_none()
    }
}
