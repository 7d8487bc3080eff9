//! Common re-exports for convenient entity usage.

pub use super::integration_result::{
    ActiveModel as IntegrationResultActiveModel, Column as IntegrationResultColumn,
    Entity as IntegrationResult, Model as IntegrationResultModel,
};
pub use super::repository::{
    ActiveModel as RepositoryActiveModel, Column as RepositoryColumn, Entity as Repository,
    Model as RepositoryModel,
};
pub use super::repository_maintainer::{
    ActiveModel as RepositoryMaintainerActiveModel, Column as RepositoryMaintainerColumn,
    Entity as RepositoryMaintainer, Model as RepositoryMaintainerModel,
};
pub use super::repository_priority::RepositoryPriority;
pub use super::repository_state::RepositoryState;
pub use super::service_execution::{
    ActiveModel as ServiceExecutionActiveModel, Column as ServiceExecutionColumn,
    Entity as ServiceExecution, ExecutionStatus, Model as ServiceExecutionModel, OperationType,
};
