use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "pokesync", version, about = "Periodic PokéAPI sync worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default if no subcommand given).
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, env = "PORT", default_value = "8000")]
        port: u16,

        /// Directory for the SQLite database when no Postgres URL is configured.
        #[arg(long, env = "POKESYNC_DATA_DIR", default_value = ".pokesync")]
        data_dir: PathBuf,
    },

    /// Process a single batch and print the report as JSON.
    RunOnce {
        #[arg(long, env = "POKESYNC_DATA_DIR", default_value = ".pokesync")]
        data_dir: PathBuf,
    },

    /// Create the queue and entity tables.
    Migrate {
        #[arg(long, env = "POKESYNC_DATA_DIR", default_value = ".pokesync")]
        data_dir: PathBuf,
    },

    /// Add pending queue items. Existing items are left as they are.
    Enqueue {
        #[arg(long, env = "POKESYNC_DATA_DIR", default_value = ".pokesync")]
        data_dir: PathBuf,

        /// Explicit ids.
        ids: Vec<i64>,

        /// Also enqueue every id from 1 through N.
        #[arg(long)]
        through: Option<i64>,
    },

    /// Print queue counts as JSON.
    Stats {
        #[arg(long, env = "POKESYNC_DATA_DIR", default_value = ".pokesync")]
        data_dir: PathBuf,
    },

    /// Print current configuration (redacted secrets).
    Config,

    /// Check store connectivity.
    Check {
        #[arg(long, env = "POKESYNC_DATA_DIR", default_value = ".pokesync")]
        data_dir: PathBuf,
    },
}

impl Commands {
    pub fn default_serve() -> Self {
        Commands::Serve {
            host: "0.0.0.0".to_string(),
            port: 8000,
            data_dir: ".pokesync".into(),
        }
    }
}

/// Ids named on the command line plus `1..=through`, sorted and deduplicated.
pub fn enqueue_ids(ids: &[i64], through: Option<i64>) -> Vec<i64> {
    let mut out: Vec<i64> = ids.to_vec();
    if let Some(n) = through {
        out.extend(1..=n);
    }
    out.sort_unstable();
    out.dedup();
    out
}
