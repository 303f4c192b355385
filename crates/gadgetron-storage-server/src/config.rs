use crate::namespaces::Namespaces;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

const DATABASE_FILE: &str = "gadgetron-storage.sqlite";
const BLOB_DIR: &str = "blobs";

/// Server configuration from command-line flags, falling back to the environment
#[derive(Debug, Clone, Parser)]
#[command(name = "gadgetron-storage-server", version, about = "Gadgetron Storage Manager.")]
pub struct Config {
    /// Set the storage directory.
    #[arg(short = 'S', long, env = "STORAGE_DIR", default_value = ".")]
    pub storage_dir: PathBuf,

    /// Only accept connections from this address.
    #[arg(short = 'a', long, env = "ADDRESS", default_value = "localhost")]
    pub address: String,

    /// Listen for connections on this port.
    #[arg(short = 'p', long, env = "PORT", default_value_t = 9102)]
    pub port: u16,

    /// Metadata database; defaults to a SQLite file in the storage directory.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Seconds between garbage-collection sweeps.
    #[arg(long, env = "GC_INTERVAL_SECS", default_value_t = 300)]
    pub gc_interval_secs: u32,

    /// Idle seconds before a leaf under `sessions` expires.
    #[arg(long, env = "SESSION_TIMEOUT_SECS", default_value_t = 3 * 60 * 60)]
    pub session_timeout_secs: u32,

    /// Unreferenced blobs younger than this many seconds survive a sweep.
    #[arg(long, env = "ORPHAN_GRACE_SECS", default_value_t = 0)]
    pub orphan_grace_secs: u32,
}

impl Config {
    pub fn blob_dir(&self) -> PathBuf {
        self.storage_dir.join(BLOB_DIR)
    }

    pub fn database_url(&self) -> String {
        self.database_url.clone().unwrap_or_else(|| {
            format!(
                "sqlite://{}",
                self.storage_dir.join(DATABASE_FILE).display()
            )
        })
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs.into())
    }

    pub fn orphan_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.orphan_grace_secs.into())
    }

    pub fn namespaces(&self) -> Namespaces {
        Namespaces::new(chrono::Duration::seconds(self.session_timeout_secs.into()))
    }
}
