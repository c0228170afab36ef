//! The embedding job queue: priority dequeue, exponential-backoff retry,
//! per-listing serialization, and a JSON dump persisted through the
//! storage backend so interrupted jobs survive a restart.

use super::{
    now_ms, EmbeddingJob, JobMetadata, JobOperation, JobPriority, JobSnapshot, JobStatus,
};
use crate::eid::{new_job_id, Eid};
use crate::storage::StorageManager;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock,
};

const DUMP_FILE: &str = "jobs.json";

/// Completed jobs retained for inspection; older ones are dropped.
/// Failed jobs are never dropped.
const COMPLETED_HISTORY: usize = 100;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct QueueDump {
    queue: Vec<EmbeddingJob>,
    now: u64,
}

/// Acknowledgement returned to the caller at enqueue time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTicket {
    pub job_id: String,
    pub status: &'static str,
}

pub struct JobQueue {
    jobs: RwLock<Vec<EmbeddingJob>>,
    storage: Arc<dyn StorageManager>,
    max_retries: u8,
    backoff_base_ms: u64,
    shutdown: AtomicBool,
}

impl JobQueue {
    /// Load queue state from the dump file. Jobs that were active when the
    /// previous process died are put back in the queue.
    pub fn load(storage: Arc<dyn StorageManager>, max_retries: u8, backoff_base_ms: u64) -> Self {
        let mut jobs = vec![];

        if storage.exists(DUMP_FILE) {
            match storage
                .read(DUMP_FILE)
                .map_err(anyhow::Error::from)
                .and_then(|data| serde_json::from_slice::<QueueDump>(&data).map_err(Into::into))
            {
                Ok(dump) => {
                    jobs = dump.queue;
                    for job in jobs.iter_mut() {
                        if job.status == JobStatus::Active {
                            log::info!("re-queueing interrupted job {}", job.id);
                            job.status = JobStatus::Queued;
                            job.not_before_ms = None;
                            job.updated_at = Utc::now();
                        }
                    }
                }
                Err(err) => {
                    log::error!("failed to read job queue dump, starting empty: {err}");
                }
            }
        }

        let queue = JobQueue {
            jobs: RwLock::new(jobs),
            storage,
            max_retries,
            backoff_base_ms,
            shutdown: AtomicBool::new(false),
        };
        queue.persist_current();
        queue
    }

    /// Schedule an embedding job for a listing. Jobs born from listing
    /// creation jump the queue; everything else is normal priority.
    pub fn enqueue(
        &self,
        listing_id: Eid,
        operation: JobOperation,
        metadata: JobMetadata,
    ) -> anyhow::Result<JobTicket> {
        let priority = match operation {
            JobOperation::Create => JobPriority::High,
            _ => JobPriority::Normal,
        };

        let now = Utc::now();
        let job = EmbeddingJob {
            id: new_job_id(),
            listing_id,
            operation,
            priority,
            attempt: 0,
            max_retries: self.max_retries,
            progress: 0,
            status: JobStatus::Queued,
            metadata,
            not_before_ms: None,
            created_at: now,
            updated_at: now,
        };

        let ticket = JobTicket {
            job_id: job.id.clone(),
            status: "queued",
        };

        log::info!(
            "enqueued embedding job {} for listing {} ({:?}, {:?})",
            job.id,
            job.listing_id,
            job.operation,
            job.priority
        );

        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| anyhow::anyhow!("job queue lock poisoned"))?;
        jobs.push(job);
        self.persist(&jobs);

        Ok(ticket)
    }

    pub fn snapshot(&self, job_id: &str) -> Option<JobSnapshot> {
        let jobs = self.jobs.read().ok()?;
        jobs.iter().find(|j| j.id == job_id).map(JobSnapshot::from)
    }

    /// Dequeue the next ready job and mark it active. Ready means queued,
    /// past its backoff deadline, and with no active sibling for the same
    /// listing (jobs are serialized per listing id so two workers never
    /// race on one embedding write).
    pub fn next_ready(&self) -> Option<EmbeddingJob> {
        let mut jobs = self.jobs.write().ok()?;

        let now = now_ms();
        let active_listings: Vec<Eid> = jobs
            .iter()
            .filter(|j| j.status == JobStatus::Active)
            .map(|j| j.listing_id.clone())
            .collect();

        let next = jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| {
                j.status == JobStatus::Queued
                    && j.not_before_ms.map(|t| t <= now).unwrap_or(true)
                    && !active_listings.contains(&j.listing_id)
            })
            .min_by_key(|(_, j)| (j.priority.rank(), j.created_at, j.id.clone()))
            .map(|(idx, _)| idx)?;

        let job = &mut jobs[next];
        job.status = JobStatus::Active;
        job.attempt += 1;
        job.progress = 0;
        job.not_before_ms = None;
        job.updated_at = Utc::now();

        let job = job.clone();
        self.persist(&jobs);
        Some(job)
    }

    pub fn report_progress(&self, job_id: &str, progress: u8) {
        let Ok(mut jobs) = self.jobs.write() else {
            return;
        };
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.progress = progress.min(100);
            job.updated_at = Utc::now();
        }
        self.persist(&jobs);
    }

    /// Mark a job completed and trim the completed-history window.
    pub fn complete(&self, job_id: &str) {
        let Ok(mut jobs) = self.jobs.write() else {
            return;
        };

        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.updated_at = Utc::now();
        }

        let completed = jobs
            .iter()
            .filter(|j| j.status == JobStatus::Completed)
            .count();
        if completed > COMPLETED_HISTORY {
            let mut to_drop = completed - COMPLETED_HISTORY;
            jobs.retain(|j| {
                if to_drop > 0 && j.status == JobStatus::Completed {
                    to_drop -= 1;
                    false
                } else {
                    true
                }
            });
        }

        self.persist(&jobs);
    }

    /// Fail the current attempt. With attempts left the job goes back in
    /// the queue after an exponential backoff (base delay doubling per
    /// attempt, plus jitter); otherwise it is terminally failed and kept
    /// for inspection.
    pub fn fail(&self, job_id: &str, reason: &str) {
        let Ok(mut jobs) = self.jobs.write() else {
            return;
        };

        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            if job.attempt < job.max_retries {
                let delay_ms =
                    self.backoff_base_ms * 2u64.pow(job.attempt.saturating_sub(1) as u32)
                        + rand_jitter(self.backoff_base_ms);
                log::warn!(
                    "job {}: attempt {}/{} failed ({reason}), retrying in {delay_ms}ms",
                    job.id,
                    job.attempt,
                    job.max_retries
                );
                job.status = JobStatus::Queued;
                job.not_before_ms = Some(now_ms() + delay_ms);
            } else {
                log::error!(
                    "job {}: attempt {}/{} failed ({reason}), giving up",
                    job.id,
                    job.attempt,
                    job.max_retries
                );
                job.status = JobStatus::Failed {
                    reason: reason.to_string(),
                };
            }
            job.updated_at = Utc::now();
        }

        self.persist(&jobs);
    }

    /// Jobs that have not reached a terminal state yet.
    pub fn pending(&self) -> usize {
        self.jobs
            .read()
            .map(|jobs| {
                jobs.iter()
                    .filter(|j| {
                        matches!(j.status, JobStatus::Queued | JobStatus::Active)
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    fn persist_current(&self) {
        if let Ok(jobs) = self.jobs.read() {
            self.persist(&jobs);
        }
    }

    /// Dump writes are bookkeeping; a failed write is logged, never fatal.
    fn persist(&self, jobs: &[EmbeddingJob]) {
        let dump = QueueDump {
            queue: jobs.to_vec(),
            now: now_ms(),
        };
        match serde_json::to_vec_pretty(&dump) {
            Ok(data) => {
                if let Err(err) = self.storage.write(DUMP_FILE, &data) {
                    log::error!("failed to write job queue dump: {err}");
                }
            }
            Err(err) => log::error!("failed to serialize job queue dump: {err}"),
        }
    }
}

fn rand_jitter(cap_ms: u64) -> u64 {
    if cap_ms == 0 {
        return 0;
    }
    rand::rng().random_range(0..cap_ms)
}
