//! Producer -> worker pool -> merger.
//!
//! The calling thread reads and chunks the input and pushes chunks into a bounded queue, which is
//! what keeps the reader from running ahead of the workers. Each worker folds whatever chunks it
//! happens to pull into its own private store, and publishes that store exactly once when the
//! queue is closed and drained. The merger then waits for exactly one partial per worker.
//!
//! Which worker gets which chunk, and the order partials arrive in, doesn't matter: per-key
//! combination is associative and commutative.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender};
use log::{debug, info};

use crate::chunker::{Chunk, Chunker};
use crate::compute::process_chunk;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::AggregateStore;

// how long the reader waits on a full queue before checking whether the workers gave up
const SEND_POLL: Duration = Duration::from_millis(100);

/// Runs the whole pipeline over `input` and returns the merged store.
///
/// Only the tuning knobs of `config` are used here; opening the file is up to the caller.
pub fn aggregate<S: AggregateStore, R: Read>(input: R, config: &Config) -> Result<S> {
    config.validate()?;
    let workers = config.worker_count();

    let (tx, rx) = channel::bounded::<Chunk>(config.queue_depth);
    // consumed block buffers go back to the reader so steady-state reads don't allocate
    let (pool_tx, pool_rx) = channel::bounded::<Box<[u8]>>(config.queue_depth + workers);
    // every worker sends exactly once, so this never blocks
    let (result_tx, result_rx) = channel::bounded::<Result<S>>(workers);
    let abort = AtomicBool::new(false);

    std::thread::scope(|scope| {
        for id in 0..workers {
            let rx = rx.clone();
            let pool_tx = pool_tx.clone();
            let result_tx = result_tx.clone();
            let abort = &abort;
            scope.spawn(move || {
                let partial = worker::<S>(id, &rx, &pool_tx, abort);
                if partial.is_err() {
                    abort.store(true, Ordering::Relaxed);
                }
                result_tx.send(partial).ok();
            });
        }
        // the workers hold the only handles they need. keeping these around would stop the
        // channels from ever disconnecting.
        drop(pool_tx);
        drop(result_tx);

        let (done_tx, done_rx) = channel::bounded::<()>(0);
        if config.monitor_queue {
            let rx = rx.clone();
            scope.spawn(move || monitor_queue(&rx, &done_rx));
        }
        drop(rx);

        let produced = produce(input, config.block_size, &tx, pool_rx, &abort);
        if produced.is_err() {
            abort.store(true, Ordering::Relaxed);
        }

        // THIS PART IS IMPORTANT!
        // workers only stop once the queue is closed, and it only closes when the last sender is
        // dropped. merging before this would wait forever.
        drop(tx);

        let merged = merge_partials(&result_rx, workers);
        drop(done_tx);

        let chunks = produced?;
        let totals = merged?;
        info!(
            "aggregated {chunks} chunks with {workers} workers into {} keys",
            totals.len()
        );
        Ok(totals)
    })
}

// feeds chunks into the queue until the input ends, a worker fails, or every worker is gone.
// returns how many chunks went out.
fn produce<R: Read>(
    input: R,
    block_size: usize,
    tx: &Sender<Chunk>,
    pool: Receiver<Box<[u8]>>,
    abort: &AtomicBool,
) -> Result<u64> {
    let mut chunker = Chunker::new(input, block_size).with_pool(pool);
    let mut sent = 0;
    'chunks: while let Some(chunk) = chunker.next_chunk()? {
        let mut chunk = chunk;
        loop {
            if abort.load(Ordering::Relaxed) {
                debug!("producer: a worker failed, stopping after {sent} chunks");
                break 'chunks;
            }
            match tx.send_timeout(chunk, SEND_POLL) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(c)) => chunk = c,
                Err(SendTimeoutError::Disconnected(_)) => break 'chunks,
            }
        }
        sent += 1;
    }
    debug!(
        "producer: {} blocks, {} bytes, {sent} chunks, {} buffer allocations",
        chunker.blocks_read(),
        chunker.bytes_read(),
        chunker.allocations()
    );
    Ok(sent)
}

fn worker<S: AggregateStore>(
    id: usize,
    chunks: &Receiver<Chunk>,
    pool: &Sender<Box<[u8]>>,
    abort: &AtomicBool,
) -> Result<S> {
    let mut totals = S::default();
    let mut consumed = 0usize;
    let mut bytes = 0usize;
    while let Ok(chunk) = chunks.recv() {
        // someone else already failed, so this partial is getting thrown away
        if abort.load(Ordering::Relaxed) {
            break;
        }
        process_chunk(chunk.as_bytes(), &mut totals)?;
        consumed += 1;
        bytes += chunk.len();
        pool.try_send(chunk.into_buffer()).ok();
    }
    debug!(
        "worker {id}: {consumed} chunks, {bytes} bytes, {} distinct keys",
        totals.len()
    );
    Ok(totals)
}

/// Waits for exactly `expected` partial results and folds them into one store.
///
/// Returns the first worker error if any worker failed, and [`Error::WorkerLost`] if the result
/// channel closes before every worker has reported.
pub fn merge_partials<S: AggregateStore>(
    results: &Receiver<Result<S>>,
    expected: usize,
) -> Result<S> {
    let mut totals = S::default();
    let mut failure = None;
    for received in 0..expected {
        match results.recv() {
            Ok(Ok(partial)) => {
                if failure.is_none() {
                    totals.merge(partial);
                }
            }
            Ok(Err(e)) => {
                failure.get_or_insert(e);
            }
            Err(_) => {
                debug!("merger: result channel closed after {received} of {expected} partials");
                return Err(failure.unwrap_or(Error::WorkerLost));
            }
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(totals),
    }
}

fn monitor_queue(queue: &Receiver<Chunk>, done: &Receiver<()>) {
    let ticker = channel::tick(Duration::from_secs(1));
    loop {
        crossbeam::select! {
            recv(ticker) -> _ => debug!("chunk queue length: {}", queue.len()),
            recv(done) -> _ => break,
        }
    }
}
