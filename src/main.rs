use anyhow::bail;
use clap::Parser;

mod app;
mod auth;
mod cli;
mod config;
mod eid;
mod errors;
mod jobs;
mod listings;
mod pages;
mod seed;
mod semantic;
mod storage;
#[cfg(test)]
mod tests;
mod users;
mod web;

use config::Config;
use jobs::{JobMetadata, JobOperation, JobSource};
use listings::ListingStore;
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();

    let base_path = config::default_base_path()?;
    let config = Config::load_with(&base_path)?;
    let services = app::Services::init(config)?;

    match args.command {
        cli::Command::Daemon {} => {
            services.run_queue();
            web::start_daemon(services);
        }

        cli::Command::Seed {} => {
            let inserted = seed::run(services.listings.clone())?;
            println!("{inserted} listings seeded");
        }

        cli::Command::EmbedAll { force } => {
            let has_key = services
                .config
                .read()
                .map(|c| c.gemini_api_key.is_some())
                .unwrap_or(false);
            if !has_key {
                bail!("no embedding API key configured, set GEMINI_API_KEY first");
            }

            let all = services.listings.search(None)?;
            let mut queued = 0;

            for listing in &all {
                if !force && listing.embedding.is_some() {
                    continue;
                }
                services.queue.enqueue(
                    listing.id.clone(),
                    JobOperation::Bulk,
                    JobMetadata::new("cli", JobSource::Cron),
                )?;
                queued += 1;
            }

            if queued == 0 {
                println!("nothing to embed");
                return Ok(());
            }

            services.run_queue();
            log::info!("embedding {queued} listings");

            loop {
                let pending = services.queue.pending();
                if pending == 0 {
                    break;
                }
                std::thread::sleep(Duration::from_millis(500));
            }

            services.shutdown();

            let embedded = services.listings.embedded()?.len();
            println!("{queued} jobs processed, {embedded} listings embedded");
        }
    }

    Ok(())
}
