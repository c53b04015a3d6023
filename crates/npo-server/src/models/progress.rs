//! Transient progress of delete operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteStatus {
    Running,
    Completed,
    Failed,
}

impl DeleteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteStatus::Running => "running",
            DeleteStatus::Completed => "completed",
            DeleteStatus::Failed => "failed",
        }
    }
}

impl From<String> for DeleteStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "completed" => DeleteStatus::Completed,
            "failed" => DeleteStatus::Failed,
            _ => DeleteStatus::Running,
        }
    }
}

/// Raw `delete_progress` row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeleteProgressRecord {
    pub operation_id: Uuid,
    pub percent: i16,
    pub stage: String,
    pub status: String,
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Progress snapshot of a bulk or whole-upload deletion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteProgress {
    pub operation_id: Uuid,
    pub percent: i16,
    pub stage: String,
    pub status: DeleteStatus,
    pub message: Option<String>,
}

impl DeleteProgress {
    pub fn running(operation_id: Uuid, percent: i16, stage: impl Into<String>) -> Self {
        Self {
            operation_id,
            percent: percent.clamp(0, 100),
            stage: stage.into(),
            status: DeleteStatus::Running,
            message: None,
        }
    }

    pub fn completed(operation_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            operation_id,
            percent: 100,
            stage: "done".to_string(),
            status: DeleteStatus::Completed,
            message: Some(message.into()),
        }
    }

    pub fn failed(operation_id: Uuid, percent: i16, message: impl Into<String>) -> Self {
        Self {
            operation_id,
            percent: percent.clamp(0, 100),
            stage: "failed".to_string(),
            status: DeleteStatus::Failed,
            message: Some(message.into()),
        }
    }
}

impl From<DeleteProgressRecord> for DeleteProgress {
    fn from(r: DeleteProgressRecord) -> Self {
        Self {
            operation_id: r.operation_id,
            percent: r.percent,
            stage: r.stage,
            status: r.status.into(),
            message: r.message,
        }
    }
}
