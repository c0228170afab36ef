//! Explicitly constructed service handles: stores, queue, workers, and
//! the assistant, created once at process start and closed on shutdown.

use crate::config::Config;
use crate::jobs::{self, JobQueue};
use crate::listings::{self, ListingStore};
use crate::semantic::{provider::EmbeddingProvider, AssistantService, GeminiProvider};
use crate::storage::{self, StorageManager};
use crate::users::{self, UserStore};
use std::{
    sync::{Arc, Mutex, RwLock},
    thread::JoinHandle,
    time::Duration,
};

pub struct Services {
    pub config: Arc<RwLock<Config>>,
    pub listings: Arc<dyn ListingStore>,
    pub users: Arc<dyn UserStore>,
    pub queue: Arc<JobQueue>,
    pub assistant: Arc<AssistantService>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Services {
    pub fn init(config: Config) -> anyhow::Result<Self> {
        let base_path = config.base_path().to_string();
        let storage: Arc<dyn StorageManager> = Arc::new(storage::BackendLocal::new(&base_path)?);

        let listings: Arc<dyn ListingStore> = Arc::new(listings::BackendCsv::load(&format!(
            "{base_path}/listings.csv"
        ))?);
        let users: Arc<dyn UserStore> =
            Arc::new(users::BackendCsv::load(&format!("{base_path}/users.csv"))?);

        let queue = Arc::new(JobQueue::load(
            storage,
            config.job_max_retries,
            config.job_backoff_ms,
        ));

        let provider: Option<Arc<dyn EmbeddingProvider>> = match &config.gemini_api_key {
            Some(key) => Some(Arc::new(GeminiProvider::new(
                key.clone(),
                config.embedding_base_url.clone(),
            )?)),
            None => {
                log::warn!(
                    "no embedding API key configured: search runs in demo mode, embedding jobs stay queued"
                );
                None
            }
        };

        let assistant = Arc::new(AssistantService::new(
            listings.clone(),
            provider.clone(),
            Duration::from_secs(config.cache_ttl_secs),
        ));

        Ok(Services {
            config: Arc::new(RwLock::new(config)),
            listings,
            users,
            queue,
            assistant,
            provider,
            worker_handles: Mutex::new(vec![]),
        })
    }

    /// Start the embedding worker pool. Without a configured provider
    /// nothing is spawned: jobs remain queued and inspectable.
    pub fn run_queue(&self) {
        let Some(provider) = self.provider.clone() else {
            return;
        };

        let worker_threads = self
            .config
            .read()
            .map(|c| c.worker_threads)
            .unwrap_or(1);

        let handles = jobs::spawn_workers(
            worker_threads,
            self.queue.clone(),
            self.listings.clone(),
            provider,
        );

        if let Ok(mut slot) = self.worker_handles.lock() {
            *slot = handles;
        }
    }

    /// Stop accepting work and wait for in-flight jobs to finish.
    pub fn shutdown(&self) {
        self.queue.begin_shutdown();

        let handles = match self.worker_handles.lock() {
            Ok(mut slot) => std::mem::take(&mut *slot),
            Err(_) => return,
        };

        for handle in handles {
            if handle.join().is_err() {
                log::error!("embedding worker panicked during shutdown");
            }
        }
    }
}
