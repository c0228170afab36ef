use crate::storage::{self, StorageManager};
use anyhow::Context;
use serde::{Deserialize, Serialize};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
/// One hour, matching the assistant's answer-cache contract.
const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
const DEFAULT_WORKER_THREADS: u16 = 2;
const DEFAULT_JOB_MAX_RETRIES: u8 = 3;
const DEFAULT_JOB_BACKOFF_MS: u64 = 1000;
const DEFAULT_EMBEDDING_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    /// Gemini API key. Absent key puts the assistant into demo mode and
    /// leaves embedding jobs queued.
    #[serde(default)]
    pub gemini_api_key: Option<String>,
    #[serde(default = "default_embedding_base_url")]
    pub embedding_base_url: String,

    /// Answer-cache time-to-live in seconds. Zero disables caching.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_worker_threads")]
    pub worker_threads: u16,
    #[serde(default = "default_job_max_retries")]
    pub job_max_retries: u8,
    #[serde(default = "default_job_backoff_ms")]
    pub job_backoff_ms: u64,

    /// Shared secret for the on-demand cache invalidation endpoint.
    #[serde(default)]
    pub revalidate_secret: Option<String>,

    /// Credentials for the external identity provider.
    #[serde(default)]
    pub oauth_client_id: Option<String>,
    #[serde(default)]
    pub oauth_client_secret: Option<String>,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            gemini_api_key: None,
            embedding_base_url: DEFAULT_EMBEDDING_BASE_URL.to_string(),
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            worker_threads: DEFAULT_WORKER_THREADS,
            job_max_retries: DEFAULT_JOB_MAX_RETRIES,
            job_backoff_ms: DEFAULT_JOB_BACKOFF_MS,
            revalidate_secret: None,
            oauth_client_id: None,
            oauth_client_secret: None,
            base_path: String::new(),
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_worker_threads() -> u16 {
    DEFAULT_WORKER_THREADS
}

fn default_job_max_retries() -> u8 {
    DEFAULT_JOB_MAX_RETRIES
}

fn default_job_backoff_ms() -> u64 {
    DEFAULT_JOB_BACKOFF_MS
}

fn default_embedding_base_url() -> String {
    DEFAULT_EMBEDDING_BASE_URL.to_string()
}

/// Resolve the data directory: `YB_BASE_PATH` or `~/.local/share/yellowbook`.
pub fn default_base_path() -> anyhow::Result<String> {
    if let Ok(path) = std::env::var("YB_BASE_PATH") {
        return Ok(path);
    }

    let home = homedir::my_home()
        .context("couldnt resolve home dir")?
        .context("couldnt resolve home dir")?;
    Ok(format!("{}/.local/share/yellowbook", home.to_string_lossy()))
}

impl Config {
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    fn validate(&mut self) {
        if self.worker_threads == 0 {
            self.worker_threads = 1;
        }
        if self.job_max_retries == 0 {
            self.job_max_retries = 1;
        }
        if self.job_backoff_ms == 0 {
            self.job_backoff_ms = DEFAULT_JOB_BACKOFF_MS;
        }
    }

    /// Load `config.yaml` from the data directory, creating a default one
    /// if it does not exist, then apply environment overrides.
    pub fn load_with(base_path: &str) -> anyhow::Result<Self> {
        let store = storage::BackendLocal::new(base_path)?;

        if !store.exists("config.yaml") {
            let default = serde_yml::to_string(&Self::default())
                .context("failed to serialize default config")?;
            store.write("config.yaml", default.as_bytes())?;
        }

        let config_str = String::from_utf8(store.read("config.yaml")?)
            .context("config file is not valid utf8")?;
        let mut config: Self =
            serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_string();
        config.apply_env();
        config.validate();

        Ok(config)
    }

    /// Environment variables win over the config file. Secrets are only
    /// ever read from the environment, never written back to disk.
    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("YB_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("YB_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            } else {
                log::warn!("ignoring unparseable YB_PORT value");
            }
        }
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            if !key.is_empty() {
                self.gemini_api_key = Some(key);
            }
        }
        if let Ok(ttl) = std::env::var("YB_CACHE_TTL_SECS") {
            if let Ok(ttl) = ttl.parse() {
                self.cache_ttl_secs = ttl;
            }
        }
        if let Ok(secret) = std::env::var("REVALIDATE_SECRET") {
            if !secret.is_empty() {
                self.revalidate_secret = Some(secret);
            }
        }
        if let Ok(id) = std::env::var("OAUTH_CLIENT_ID") {
            self.oauth_client_id = Some(id);
        }
        if let Ok(secret) = std::env::var("OAUTH_CLIENT_SECRET") {
            self.oauth_client_secret = Some(secret);
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_creates_default_config() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_with(tmp.path().to_str().unwrap()).unwrap();

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.cache_ttl_secs, DEFAULT_CACHE_TTL_SECS);
        assert!(tmp.path().join("config.yaml").is_file());
    }

    #[test]
    fn test_validate_clamps_zero_workers() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("config.yaml"), "worker_threads: 0\n").unwrap();

        let config = Config::load_with(tmp.path().to_str().unwrap()).unwrap();
        assert_eq!(config.worker_threads, 1);
    }
}
