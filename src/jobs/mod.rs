//! Asynchronous embedding jobs: priority/retry queue plus the worker that
//! turns listings into stored embedding vectors.

pub mod queue;
pub mod worker;

pub use queue::{JobQueue, JobTicket};
pub use worker::{spawn_workers, EmbeddingWorker};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::eid::Eid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOperation {
    Create,
    Update,
    Bulk,
    Retry,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High,
    Normal,
    Low,
}

impl JobPriority {
    /// Lower rank is dequeued first.
    pub fn rank(&self) -> u8 {
        match self {
            JobPriority::High => 0,
            JobPriority::Normal => 1,
            JobPriority::Low => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobSource {
    Api,
    Admin,
    Cron,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobMetadata {
    pub triggered_by: String,
    pub source: JobSource,
    pub triggered_at: DateTime<Utc>,
}

impl JobMetadata {
    pub fn new(triggered_by: &str, source: JobSource) -> Self {
        JobMetadata {
            triggered_by: triggered_by.to_string(),
            source,
            triggered_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Active,
    Completed,
    Failed { reason: String },
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed { .. } => "failed",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingJob {
    pub id: String,
    pub listing_id: Eid,
    pub operation: JobOperation,
    pub priority: JobPriority,
    /// Attempts started so far; incremented when the job goes active.
    pub attempt: u8,
    pub max_retries: u8,
    /// 0-100, reported at the worker's milestones.
    pub progress: u8,
    pub status: JobStatus,
    pub metadata: JobMetadata,
    /// Earliest dequeue time (backoff), unix millis.
    #[serde(default)]
    pub not_before_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Admin-facing status view of a job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: String,
    pub business_id: Eid,
    pub operation: JobOperation,
    pub priority: JobPriority,
    pub status: &'static str,
    pub progress: u8,
    pub attempt: u8,
    pub max_retries: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub metadata: JobMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&EmbeddingJob> for JobSnapshot {
    fn from(job: &EmbeddingJob) -> Self {
        let failure_reason = match &job.status {
            JobStatus::Failed { reason } => Some(reason.clone()),
            _ => None,
        };
        JobSnapshot {
            job_id: job.id.clone(),
            business_id: job.listing_id.clone(),
            operation: job.operation,
            priority: job.priority,
            status: job.status.as_str(),
            progress: job.progress,
            attempt: job.attempt,
            max_retries: job.max_retries,
            failure_reason,
            metadata: job.metadata.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
