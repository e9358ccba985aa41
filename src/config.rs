//! Storage engine configuration.

use clap::Parser;
use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ErrorCode, StorageError, StorageResult};

/// Default account name for development storage.
pub const DEFAULT_ACCOUNT: &str = "devstoreaccount1";

/// Default per-destination write concurrency.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Default size at which an active extent is rotated out (64 MiB).
pub const DEFAULT_MAX_EXTENT_SIZE: u64 = 64 * 1024 * 1024;

/// Default page size for listings.
pub const DEFAULT_LIST_PAGE_SIZE: u32 = 5000;

/// Default minimum extent age before GC considers it.
pub const DEFAULT_SAFETY_WINDOW: Duration = Duration::from_secs(1);

/// Blob metadata file name inside the workspace location.
pub const BLOB_DB_FILE: &str = "__azurite_db_blob__.json";

/// Extent metadata file name inside the workspace location.
pub const EXTENT_DB_FILE: &str = "__azurite_db_blob_extent__.json";

/// Default directory for extent data inside the workspace location.
pub const DEFAULT_EXTENT_DIR: &str = "__blobstorage__";

/// Command-line arguments for the storage daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "azurite-store")]
#[command(about = "Blob storage engine: extent store, metadata stores and GC")]
#[command(version)]
pub struct Args {
    /// Location for workspace data.
    #[arg(long, short = 'l')]
    pub location: Option<PathBuf>,

    /// In-memory mode (no persistence).
    #[arg(long)]
    pub in_memory: bool,

    /// Extent destination as `id=path` or `id=path:concurrency`. Repeatable.
    #[arg(long = "destination")]
    pub destinations: Vec<StoreDestination>,

    /// Size in bytes at which an extent stops receiving appends.
    #[arg(long, default_value_t = DEFAULT_MAX_EXTENT_SIZE)]
    pub max_extent_size: u64,

    /// Seconds between GC sweeps.
    #[arg(long, default_value_t = 600)]
    pub gc_interval_secs: u64,

    /// Minimum extent age in milliseconds before GC may reclaim it.
    #[arg(long, default_value_t = 1000)]
    pub safety_window_ms: u64,

    /// Seconds between metadata autosaves.
    #[arg(long, default_value_t = 5)]
    pub autosave_interval_secs: u64,

    /// Enable debug logging.
    #[arg(long, short = 'd')]
    pub debug: bool,

    /// Enable silent mode (minimal logging).
    #[arg(long, short = 's')]
    pub silent: bool,
}

/// A physical location extents are written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDestination {
    /// Location id recorded in extent metadata.
    pub id: String,
    /// Directory holding the extent files.
    pub path: PathBuf,
    /// Maximum number of concurrent appends to this location.
    pub max_concurrency: usize,
}

impl StoreDestination {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>, max_concurrency: usize) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            max_concurrency,
        }
    }
}

impl FromStr for StoreDestination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, rest) = s
            .split_once('=')
            .ok_or_else(|| format!("expected `id=path[:concurrency]`, got `{}`", s))?;
        if id.is_empty() {
            return Err("destination id must not be empty".to_string());
        }

        // A trailing `:<digits>` is the concurrency; anything else belongs to the path.
        let (path, max_concurrency) = match rest.rsplit_once(':') {
            Some((path, n)) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => {
                let n = n.parse().map_err(|e| format!("invalid concurrency: {}", e))?;
                (path, n)
            }
            _ => (rest, DEFAULT_MAX_CONCURRENCY),
        };

        Ok(Self::new(id, path, max_concurrency))
    }
}

/// Engine configuration derived from command-line arguments.
#[derive(Debug, Clone)]
pub struct Config {
    /// Location for workspace data.
    pub location: Option<PathBuf>,
    /// In-memory mode (no persistence).
    pub in_memory: bool,
    /// Enable debug logging.
    pub debug: bool,
    /// Physical extent destinations, in round-robin order.
    pub destinations: Vec<StoreDestination>,
    /// Rotation threshold for active extents.
    pub max_extent_size: u64,
    /// Interval between GC sweeps.
    pub gc_interval: Duration,
    /// Minimum extent age before GC considers it.
    pub safety_window: Duration,
    /// Page size used when GC enumerates extents.
    pub gc_page_size: u32,
    /// Interval between metadata autosaves.
    pub autosave_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            location: None,
            in_memory: true,
            debug: false,
            destinations: Vec::new(),
            max_extent_size: DEFAULT_MAX_EXTENT_SIZE,
            gc_interval: Duration::from_secs(600),
            safety_window: DEFAULT_SAFETY_WINDOW,
            gc_page_size: DEFAULT_LIST_PAGE_SIZE,
            autosave_interval: Duration::from_secs(5),
        }
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        let in_memory = args.in_memory || args.location.is_none();
        let mut destinations = args.destinations;
        if destinations.is_empty() {
            if let Some(location) = &args.location {
                destinations.push(StoreDestination::new(
                    "default",
                    location.join(DEFAULT_EXTENT_DIR),
                    DEFAULT_MAX_CONCURRENCY,
                ));
            }
        }

        Self {
            location: args.location,
            in_memory,
            debug: args.debug,
            destinations,
            max_extent_size: args.max_extent_size,
            gc_interval: Duration::from_secs(args.gc_interval_secs),
            safety_window: Duration::from_millis(args.safety_window_ms),
            gc_page_size: DEFAULT_LIST_PAGE_SIZE,
            autosave_interval: Duration::from_secs(args.autosave_interval_secs),
        }
    }
}

impl Config {
    /// Creates a filesystem-backed configuration rooted at `location`.
    pub fn persistent(location: impl Into<PathBuf>) -> Self {
        let location = location.into();
        Self {
            destinations: vec![StoreDestination::new(
                "default",
                location.join(DEFAULT_EXTENT_DIR),
                DEFAULT_MAX_CONCURRENCY,
            )],
            location: Some(location),
            in_memory: false,
            ..Self::default()
        }
    }

    /// Path of the blob metadata snapshot, if persistent.
    pub fn blob_db_path(&self) -> Option<PathBuf> {
        self.persistent_location().map(|l| l.join(BLOB_DB_FILE))
    }

    /// Path of the extent metadata snapshot, if persistent.
    pub fn extent_db_path(&self) -> Option<PathBuf> {
        self.persistent_location().map(|l| l.join(EXTENT_DB_FILE))
    }

    fn persistent_location(&self) -> Option<&PathBuf> {
        if self.in_memory {
            None
        } else {
            self.location.as_ref()
        }
    }

    /// Checks the destination list for a filesystem-backed configuration.
    pub fn validate(&self) -> StorageResult<()> {
        if self.in_memory {
            return Ok(());
        }
        if self.destinations.is_empty() {
            return Err(StorageError::with_message(
                ErrorCode::InvalidInput,
                "At least one extent destination is required",
            ));
        }

        let mut seen = HashSet::new();
        for dest in &self.destinations {
            if !seen.insert(dest.id.as_str()) {
                return Err(StorageError::with_message(
                    ErrorCode::InvalidInput,
                    format!("Duplicate extent destination id: {}", dest.id),
                ));
            }
            if dest.max_concurrency == 0 {
                return Err(StorageError::with_message(
                    ErrorCode::InvalidInput,
                    format!("Destination {} must allow at least one writer", dest.id),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_destination_with_concurrency() {
        let dest: StoreDestination = "diskD=/data/d:2".parse().unwrap();
        assert_eq!(dest, StoreDestination::new("diskD", "/data/d", 2));
    }

    #[test]
    fn parses_destination_without_concurrency() {
        let dest: StoreDestination = "diskF=C:/ltTest".parse().unwrap();
        assert_eq!(dest.path, PathBuf::from("C:/ltTest"));
        assert_eq!(dest.max_concurrency, DEFAULT_MAX_CONCURRENCY);
    }

    #[test]
    fn rejects_duplicate_destinations() {
        let mut config = Config::persistent("/tmp/ws");
        config
            .destinations
            .push(StoreDestination::new("default", "/tmp/other", 2));
        let err = config.validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn in_memory_has_no_db_paths() {
        let config = Config::default();
        assert!(config.blob_db_path().is_none());
        assert!(config.extent_db_path().is_none());
    }
}
