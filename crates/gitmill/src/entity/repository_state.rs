//! Processing state of a tracked repository.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a repository in the processing registry.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum RepositoryState {
    /// Never processed; waiting for its onboarding run.
    #[sea_orm(string_value = "pending")]
    #[default]
    Pending,
    /// Claimed by a worker.
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    /// A fork whose parent has to be processed first.
    #[sea_orm(string_value = "requires_parent")]
    RequiresParent,
    /// Parked by an operator; never claimed automatically.
    #[sea_orm(string_value = "stuck")]
    Stuck,
}

impl RepositoryState {
    /// Database representation of the state.
    pub const fn as_str(self) -> &'static str {
        match self {
            RepositoryState::Pending => "pending",
            RepositoryState::Processing => "processing",
            RepositoryState::Completed => "completed",
            RepositoryState::Failed => "failed",
            RepositoryState::RequiresParent => "requires_parent",
            RepositoryState::Stuck => "stuck",
        }
    }

    /// Whether a processing run may end in this state.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            RepositoryState::Completed
                | RepositoryState::Failed
                | RepositoryState::RequiresParent
                | RepositoryState::Stuck
        )
    }
}

impl std::fmt::Display for RepositoryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_pending() {
        assert_eq!(RepositoryState::default(), RepositoryState::Pending);
    }

    #[test]
    fn display_matches_database_values() {
        assert_eq!(RepositoryState::Processing.to_string(), "processing");
        assert_eq!(RepositoryState::RequiresParent.to_string(), "requires_parent");
        assert_eq!(RepositoryState::Stuck.to_string(), "stuck");
    }

    #[test]
    fn only_finished_states_are_terminal() {
        assert!(!RepositoryState::Pending.is_terminal());
        assert!(!RepositoryState::Processing.is_terminal());
        assert!(RepositoryState::Completed.is_terminal());
        assert!(RepositoryState::Failed.is_terminal());
        assert!(RepositoryState::RequiresParent.is_terminal());
        assert!(RepositoryState::Stuck.is_terminal());
    }
}
