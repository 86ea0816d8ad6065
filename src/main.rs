use std::io::Write;

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::info;

use brc_pipeline::Config;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let config = Config::parse();
    info!(
        "input: {}, block size: {}, workers: {}, store: {:?}",
        config.path.display(),
        config.block_size,
        config.worker_count(),
        config.store
    );

    let begin = std::time::Instant::now();
    let line = brc_pipeline::run(&config)
        .with_context(|| format!("failed to aggregate {}", config.path.display()))?;
    info!("elapsed: {}ms", begin.elapsed().as_millis());

    let mut out = std::io::stdout().lock();
    writeln!(out, "{line}").context("failed to write result")?;
    Ok(())
}
