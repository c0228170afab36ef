use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the directory as a service: HTTP API, pages, and the
    /// embedding worker pool.
    Daemon {},

    /// Insert the built-in demo dataset. Safe to run repeatedly.
    Seed {},

    /// Queue embedding jobs for every listing that has none yet and
    /// wait for the queue to drain.
    EmbedAll {
        /// Re-embed listings that already carry an embedding.
        #[clap(long, default_value = "false")]
        force: bool,
    },
}
