//! The embedding worker: drains ready jobs from the queue, calls the
//! embedding provider, and writes the vector back onto the listing.

use super::queue::JobQueue;
use super::EmbeddingJob;
use crate::listings::{Listing, ListingStore};
use crate::semantic::provider::EmbeddingProvider;
use anyhow::anyhow;
use std::{
    sync::Arc,
    thread::{sleep, JoinHandle},
    time::Duration,
};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Progress milestones reported while a job runs, in order:
/// listing fetched, text prepared, embedding received, vector persisted.
const PROGRESS_FETCH: u8 = 10;
const PROGRESS_TEXT: u8 = 30;
const PROGRESS_EMBED_CALL: u8 = 50;
const PROGRESS_EMBEDDED: u8 = 80;
const PROGRESS_DONE: u8 = 100;

/// The text representation a listing is embedded under.
pub fn embedding_text(listing: &Listing) -> String {
    let mut parts = vec![listing.name.as_str(), listing.category.as_str()];
    if let Some(description) = listing.description.as_deref() {
        parts.push(description);
    }
    parts.push(listing.address.as_str());
    parts.join(" | ")
}

pub struct EmbeddingWorker {
    queue: Arc<JobQueue>,
    listings: Arc<dyn ListingStore>,
    provider: Arc<dyn EmbeddingProvider>,
}

impl EmbeddingWorker {
    pub fn new(
        queue: Arc<JobQueue>,
        listings: Arc<dyn ListingStore>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        EmbeddingWorker {
            queue,
            listings,
            provider,
        }
    }

    /// Poll for ready jobs until the queue shuts down. A job in flight is
    /// always driven to completion or a failed attempt before exit.
    pub fn run_loop(&self) {
        while !self.queue.is_shutdown() {
            match self.queue.next_ready() {
                Some(job) => {
                    log::info!(
                        "processing job {} (listing {}, {:?}, attempt {}/{})",
                        job.id,
                        job.listing_id,
                        job.operation,
                        job.attempt,
                        job.max_retries
                    );
                    match self.process(&job) {
                        Ok(()) => {
                            self.queue.complete(&job.id);
                            log::info!("job {} completed", job.id);
                        }
                        Err(err) => {
                            self.queue.fail(&job.id, &err.to_string());
                        }
                    }
                }
                None => sleep(POLL_INTERVAL),
            }
        }
    }

    /// One job attempt. Every step error propagates into the retry policy;
    /// nothing is swallowed.
    pub fn process(&self, job: &EmbeddingJob) -> anyhow::Result<()> {
        let listing = self
            .listings
            .get(&job.listing_id)?
            .ok_or_else(|| anyhow!("listing {} not found", job.listing_id))?;
        self.queue.report_progress(&job.id, PROGRESS_FETCH);

        let text = embedding_text(&listing);
        log::debug!("job {}: embedding {} chars via {}", job.id, text.len(), self.provider.name());
        self.queue.report_progress(&job.id, PROGRESS_TEXT);

        self.queue.report_progress(&job.id, PROGRESS_EMBED_CALL);
        let vector = self.provider.embed(&text)?;
        self.queue.report_progress(&job.id, PROGRESS_EMBEDDED);

        self.listings.set_embedding(&job.listing_id, vector)?;
        self.queue.report_progress(&job.id, PROGRESS_DONE);

        Ok(())
    }
}

/// Spawn the worker pool. Each worker runs on its own thread; all of them
/// exit once the queue begins shutdown.
pub fn spawn_workers(
    count: u16,
    queue: Arc<JobQueue>,
    listings: Arc<dyn ListingStore>,
    provider: Arc<dyn EmbeddingProvider>,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|idx| {
            let worker =
                EmbeddingWorker::new(queue.clone(), listings.clone(), provider.clone());
            std::thread::Builder::new()
                .name(format!("embedding-worker-{idx}"))
                .spawn(move || worker.run_loop())
                .expect("failed to spawn worker thread")
        })
        .collect()
}
