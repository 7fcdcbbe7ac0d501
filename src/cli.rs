//! Command line interface.

use clap::{Parser, Subcommand};

use crate::types::LogLevel;

#[derive(Debug, Parser)]
#[command(
    name = "meural-sync",
    about = "Keep a Meural Canvas playlist in step with an Immich album of processed images",
    version
)]
pub struct Cli {
    /// Base URL of the Immich server
    #[arg(long, env = "IMMICH_URL", global = true)]
    pub immich_url: Option<String>,

    /// Immich API key
    #[arg(long, env = "IMMICH_API_KEY", hide_env_values = true, global = true)]
    pub immich_api_key: Option<String>,

    /// Album holding originals to be processed
    #[arg(long, env = "IMMICH_INPUT_ALBUM_ID", global = true)]
    pub input_album_id: Option<String>,

    /// Album holding processed derivatives
    #[arg(long, env = "IMMICH_OUTPUT_ALBUM_ID", global = true)]
    pub output_album_id: Option<String>,

    /// Meural account username
    #[arg(long, env = "MEURAL_USERNAME", global = true)]
    pub meural_username: Option<String>,

    /// Meural account password (prompted when omitted)
    #[arg(long, env = "MEURAL_PASSWORD", hide_env_values = true, global = true)]
    pub meural_password: Option<String>,

    /// Meural playlist (gallery) to reconcile
    #[arg(long, env = "MEURAL_PLAYLIST_ID", global = true)]
    pub playlist_id: Option<String>,

    /// Directory for originals, derivatives, and state
    #[arg(long, default_value = "~/.meural-sync", global = true)]
    pub work_dir: String,

    /// Re-run the sync every N seconds until interrupted
    #[arg(long, value_name = "SECONDS", global = true)]
    pub watch_with_interval: Option<u64>,

    /// Attempts per remote call, including the first
    #[arg(long, default_value_t = 3, global = true)]
    pub max_attempts: u32,

    /// Base delay between retries, in seconds
    #[arg(long, default_value_t = 2, global = true)]
    pub retry_delay: u64,

    /// Concurrent per-asset operations within a phase
    #[arg(long, default_value_t = 4, global = true)]
    pub concurrency: usize,

    /// Log verbosity
    #[arg(long, value_enum, default_value_t = LogLevel::Info, global = true)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reconcile the playlist against the output album
    Sync,
    /// Show what a sync would change, without changing anything
    Compare,
    /// Download new originals from the input album for processing
    Pull,
    /// Upload locally cropped derivatives to the output album
    Push,
    /// Summarize local processing state
    Status,
    /// Forget an asset locally so it can be reprocessed from scratch
    Reset {
        /// Library id of the asset to forget
        asset_id: String,
    },
}
