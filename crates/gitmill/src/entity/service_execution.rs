//! ServiceExecution entity - per-operation observability records.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Pipeline stage an execution record belongs to.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum OperationType {
    #[sea_orm(string_value = "Clone")]
    Clone,
    #[sea_orm(string_value = "Commit")]
    Commit,
    #[sea_orm(string_value = "Maintainer")]
    Maintainer,
    #[sea_orm(string_value = "SoftwareValue")]
    SoftwareValue,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationType::Clone => write!(f, "Clone"),
            OperationType::Commit => write!(f, "Commit"),
            OperationType::Maintainer => write!(f, "Maintainer"),
            OperationType::SoftwareValue => write!(f, "SoftwareValue"),
        }
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum ExecutionStatus {
    #[sea_orm(string_value = "success")]
    Success,
    #[sea_orm(string_value = "failure")]
    Failure,
}

/// A single recorded execution. Write-only from the pipeline's point of view.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "service_executions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub repo_id: Uuid,
    pub operation_type: OperationType,
    pub status: ExecutionStatus,
    pub error_code: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
    #[sea_orm(column_type = "Double")]
    pub execution_time_sec: f64,
    /// Free-form counters (commits parsed, bad commits, bytes on disk, ...).
    #[sea_orm(column_type = "Json")]
    pub metrics: Json,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
