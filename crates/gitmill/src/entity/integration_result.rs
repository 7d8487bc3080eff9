//! IntegrationResult entity - activities waiting for downstream processing.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// State written for freshly ingested results.
pub const PENDING_STATE: &str = "pending";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "integration_results")]
pub struct Model {
    /// Deterministic id derived from the activity's source id.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub state: String,
    /// The serialized activity.
    #[sea_orm(column_type = "Json")]
    pub data: Json,
    pub tenant_id: Uuid,
    pub integration_id: Uuid,
    /// Remote the activity was mined from.
    #[sea_orm(column_type = "Text", nullable)]
    pub channel: Option<String>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
