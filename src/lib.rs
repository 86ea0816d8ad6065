//! Per-key min/mean/max over a huge `<key>;<value>\n` file in a single pass.
//!
//! The file is read in big raw blocks that get cut into record-aligned chunks ([`chunker`]), a
//! pool of workers parses them into private aggregate stores ([`compute`], [`store`], [`trie`]),
//! and the partial stores are merged once every worker is done ([`pipeline`]) and rendered as one
//! sorted line ([`format`]).

pub mod chunker;
pub mod compute;
pub mod config;
pub mod error;
pub mod format;
pub mod pipeline;
pub mod store;
pub mod trie;

use std::fs::File;

pub use config::{Config, StoreKind};
pub use error::{Error, Result};

use crate::format::format_results;
use crate::store::HashStore;
use crate::trie::Trie;

/// Opens `config.path`, runs the pipeline with the configured store and returns the output line.
pub fn run(config: &Config) -> Result<String> {
    config.validate()?;
    let input = File::open(&config.path)?;
    let line = match config.store {
        StoreKind::Hash => format_results(&pipeline::aggregate::<HashStore, _>(input, config)?),
        StoreKind::Trie => format_results(&pipeline::aggregate::<Trie, _>(input, config)?),
    };
    Ok(line)
}
