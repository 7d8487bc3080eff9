//! SeaORM entity definitions for the gitmill database schema.

pub mod integration_result;
pub mod prelude;
pub mod repository;
pub mod repository_maintainer;
pub mod repository_priority;
pub mod repository_state;
pub mod service_execution;
