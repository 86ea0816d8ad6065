use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::error::{Error, Result};

// 4096 * 4096. anything decently big but not too big seems to be reasonably fast, and it has to
// be bigger than the longest record.
pub const DEFAULT_BLOCK_SIZE: usize = 1 << 24;

// a couple of chunks in flight is plenty. a deeper queue means less likelihood of workers waiting,
// but more memory, since every slot can hold a whole block.
pub const DEFAULT_QUEUE_DEPTH: usize = 4;

/// Which aggregate store the workers fold records into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum StoreKind {
    /// Unordered hash map, keys get sorted once at the end.
    #[default]
    Hash,
    /// Prefix tree with sorted children, walked in order for output.
    Trie,
}

/// Computes min/mean/max per key over a `<key>;<value>` file.
#[derive(Debug, Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Input file of newline-terminated `<key>;<value>` records.
    pub path: PathBuf,

    /// Raw read block size in bytes. Must exceed the longest record.
    #[arg(long, env = "BUFFLEN", default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: usize,

    /// Number of parse/aggregate worker threads. Defaults to the host's parallelism.
    #[arg(long, env = "BRC_WORKERS")]
    pub workers: Option<usize>,

    /// Capacity of the bounded chunk queue between the reader and the workers.
    #[arg(long, default_value_t = DEFAULT_QUEUE_DEPTH)]
    pub queue_depth: usize,

    /// Aggregate store used by the workers.
    #[arg(long, value_enum, default_value_t = StoreKind::Hash)]
    pub store: StoreKind,

    /// Log the chunk queue length once a second (at debug level).
    #[arg(long)]
    pub monitor_queue: bool,
}

impl Config {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_size: DEFAULT_BLOCK_SIZE,
            workers: None,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            store: StoreKind::default(),
            monitor_queue: false,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    // checked before any file is touched
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::InvalidConfig {
                parameter: "block-size",
                reason: "must be at least 1 byte".to_string(),
            });
        }
        if self.worker_count() == 0 {
            return Err(Error::InvalidConfig {
                parameter: "workers",
                reason: "must be >= 1".to_string(),
            });
        }
        if self.queue_depth == 0 {
            return Err(Error::InvalidConfig {
                parameter: "queue-depth",
                reason: "must be >= 1".to_string(),
            });
        }
        Ok(())
    }
}
