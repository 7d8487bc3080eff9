//! Claim priority for repositories.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Claim priority. Lower values are claimed first.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
#[serde(rename_all = "snake_case")]
pub enum RepositoryPriority {
    #[sea_orm(num_value = 0)]
    Urgent,
    #[sea_orm(num_value = 1)]
    High,
    #[sea_orm(num_value = 2)]
    #[default]
    Normal,
}

impl std::fmt::Display for RepositoryPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepositoryPriority::Urgent => write!(f, "urgent"),
            RepositoryPriority::High => write!(f, "high"),
            RepositoryPriority::Normal => write!(f, "normal"),
        }
    }
}
