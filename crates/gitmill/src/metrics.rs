//! Best-effort execution metrics.
//!
//! Every pipeline stage reports a [`ServiceExecution`](crate::entity::service_execution)
//! row. Writing that row must never disturb the pipeline, so
//! [`record_execution`] logs and swallows every error.

use std::time::Instant;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::entity::service_execution::{ActiveModel, ExecutionStatus, OperationType};

/// Stable error codes stored alongside failed executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    DiskSpace,
    Network,
    Permission,
    Timeout,
    CommandFailed,
    CleanupFailed,
    Queue,
    Database,
    Locking,
    Internal,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::DiskSpace => "DISK_SPACE",
            ErrorCode::Network => "NETWORK",
            ErrorCode::Permission => "PERMISSION",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::CommandFailed => "COMMAND_FAILED",
            ErrorCode::CleanupFailed => "CLEANUP_FAILED",
            ErrorCode::Queue => "QUEUE",
            ErrorCode::Database => "DATABASE",
            ErrorCode::Locking => "LOCKING",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Measures how long an operation took.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionTimer {
    started: Instant,
}

impl ExecutionTimer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

/// An execution about to be recorded.
#[derive(Debug, Clone)]
#[must_use = "an ExecutionRecord does nothing until passed to record_execution"]
pub struct ExecutionRecord {
    pub repo_id: Uuid,
    pub operation_type: OperationType,
    pub status: ExecutionStatus,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub execution_time_sec: f64,
    pub metrics: Map<String, Value>,
}

impl ExecutionRecord {
    pub fn success(repo_id: Uuid, operation_type: OperationType, timer: &ExecutionTimer) -> Self {
        Self {
            repo_id,
            operation_type,
            status: ExecutionStatus::Success,
            error_code: None,
            error_message: None,
            execution_time_sec: timer.elapsed_secs(),
            metrics: Map::new(),
        }
    }

    pub fn failure(
        repo_id: Uuid,
        operation_type: OperationType,
        timer: &ExecutionTimer,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            repo_id,
            operation_type,
            status: ExecutionStatus::Failure,
            error_code: Some(code),
            error_message: Some(message.into()),
            execution_time_sec: timer.elapsed_secs(),
            metrics: Map::new(),
        }
    }

    /// Attach a counter to the record.
    pub fn with_metric(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metrics.insert(key.to_string(), value.into());
        self
    }
}

/// Persist an execution record. Errors are logged and discarded.
pub async fn record_execution(db: &DatabaseConnection, record: ExecutionRecord) {
    let operation = record.operation_type;
    let repo_id = record.repo_id;

    let model = ActiveModel {
        id: Set(Uuid::new_v4()),
        repo_id: Set(record.repo_id),
        operation_type: Set(record.operation_type),
        status: Set(record.status),
        error_code: Set(record.error_code.map(|c| c.as_str().to_string())),
        error_message: Set(record.error_message),
        execution_time_sec: Set(record.execution_time_sec),
        metrics: Set(Value::Object(record.metrics)),
        created_at: Set(Utc::now().fixed_offset()),
    };

    if let Err(e) = model.insert(db).await {
        tracing::error!(%repo_id, %operation, error = %e, "Failed to record service execution");
    }
}
