//! src/dataloader/assembler.rs
//!
//! Batch assembly loop, one dedicated thread per epoch.
//!
//! The assembler keeps an active pool of up to `pool_size` DataManagers taken
//! from the handoff queue, starting each one as it enters the pool. Every step
//! picks one pooled manager (the first, or a seeded random pick when
//! shuffling), appends its next window pair to the pending batch and, once
//! `batch_size` pairs are pending, stacks them and pushes the batch into the
//! output queue.
//!
//! The pool is always refilled to capacity (or until the producer is done)
//! before the next pick, so which managers compete for a pick never depends on
//! thread timing.

use crate::collator::Collator;
use crate::error::{LoaderError, Result};
use crate::minibatch::Batch;
use crate::sample::WindowPair;
use crossbeam_channel::{Receiver, Sender};
use rand::rngs::StdRng;
use rand::Rng;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::common::queue::{recv_until_stopped, send_until_stopped, QueueClosed, StopToken};
use super::common::thread::{derive_rng, join_named, spawn_named, SeedStream};
use super::iterator::EpochCounters;
use super::manager::DataManager;
use super::producer::Handoff;

/// Item of the output queue.
pub(crate) enum Delivery<T> {
    Batch(Batch<T>),
    Done,
    Failed(LoaderError),
}

/// Batching parameters copied out of the loader configuration.
#[derive(Debug, Clone)]
pub(crate) struct AssemblySettings {
    pub(crate) batch_size: usize,
    pub(crate) pool_size: usize,
    pub(crate) drop_incomplete: bool,
    pub(crate) shuffle: bool,
    pub(crate) device: String,
    pub(crate) poll: Duration,
}

/// How the assembly loop ended.
enum Outcome {
    Completed,
    Stopped,
}

pub(crate) struct BatchAssembler<C: Collator> {
    collator: Arc<C>,
    settings: AssemblySettings,
    rng: Option<StdRng>,
    handoff: Receiver<Handoff>,
    output: Sender<Delivery<C::Output>>,
    // Cancelled by the caller
    stop: StopToken,
    // Child of `stop`, shared with the producer and every stream; cancelled
    // here when the epoch fails.
    workers: StopToken,
    producer: Option<thread::JoinHandle<()>>,
    producer_done: bool,
    pool: Vec<DataManager>,
    pending: Vec<WindowPair>,
    counters: Arc<EpochCounters>,
}

impl<C: Collator + 'static> BatchAssembler<C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        collator: Arc<C>,
        settings: AssemblySettings,
        base_seed: u64,
        handoff: Receiver<Handoff>,
        output: Sender<Delivery<C::Output>>,
        stop: StopToken,
        workers: StopToken,
        producer: thread::JoinHandle<()>,
        counters: Arc<EpochCounters>,
    ) -> Self {
        let rng = settings
            .shuffle
            .then(|| derive_rng(base_seed, SeedStream::Assembler, 0));
        Self {
            collator,
            pool: Vec::with_capacity(settings.pool_size),
            pending: Vec::with_capacity(settings.batch_size),
            settings,
            rng,
            handoff,
            output,
            stop,
            workers,
            producer: Some(producer),
            producer_done: false,
            counters,
        }
    }

    pub(crate) fn spawn(self, epoch: usize) -> Result<thread::JoinHandle<()>> {
        spawn_named(format!("window-loader-assembler-e{}", epoch), move || self.run())
    }

    /// Runs the epoch, then tears down every worker before reporting the end
    /// of the epoch to the caller.
    pub(crate) fn run(mut self) {
        let outcome = self.assemble();
        if !matches!(outcome, Ok(Outcome::Completed)) {
            self.workers.cancel();
        }

        // Dropping pooled managers joins their read-ahead workers.
        self.pool.clear();
        self.pending.clear();
        let joined = match self.producer.take() {
            Some(handle) => join_named(handle),
            None => Ok(()),
        };

        let terminal = match (outcome, joined) {
            (Ok(Outcome::Completed), Ok(())) => {
                self.counters.epoch_drained();
                Delivery::Done
            }
            (Ok(Outcome::Stopped), _) => return,
            (Err(e), _) | (Ok(Outcome::Completed), Err(e)) => {
                error!(error = %e, "Epoch failed");
                Delivery::Failed(e)
            }
        };
        if send_until_stopped(&self.output, terminal, &self.stop, self.settings.poll).is_err() {
            debug!("Caller left before the end of the epoch was delivered");
        }
    }

    fn assemble(&mut self) -> Result<Outcome> {
        loop {
            if !self.refill()? {
                return self.stopped();
            }
            if self.pool.is_empty() {
                break;
            }

            let slot = match self.rng.as_mut() {
                Some(rng) => rng.random_range(0..self.pool.len()),
                None => 0,
            };
            match self.pool[slot].next() {
                Some(Ok(pair)) => {
                    self.pending.push(pair);
                    if self.pending.len() == self.settings.batch_size && !self.emit()? {
                        return Ok(Outcome::Stopped);
                    }
                }
                Some(Err(e)) if e.is_cancelled() && self.workers.is_stopped() => {
                    return self.stopped();
                }
                Some(Err(e)) => return Err(e),
                None => {
                    let manager = self.pool.remove(slot);
                    self.counters.partition_completed();
                    debug!(partition = %manager.descriptor(), "Partition exhausted");
                }
            }
        }

        if !self.pending.is_empty() {
            if self.settings.drop_incomplete {
                debug!(windows = self.pending.len(), "Dropping incomplete final batch");
                self.pending.clear();
            } else if !self.emit()? {
                return Ok(Outcome::Stopped);
            }
        }
        Ok(Outcome::Completed)
    }

    /// The worker token fired. A producer failure queued before the cancel
    /// takes precedence over a plain stop.
    fn stopped(&self) -> Result<Outcome> {
        for item in self.handoff.try_iter() {
            if let Handoff::Failed(e) = item {
                return Err(e);
            }
        }
        Ok(Outcome::Stopped)
    }

    /// Tops the pool up to `pool_size` managers, blocking on the handoff queue.
    /// Returns false if the epoch was stopped while waiting.
    fn refill(&mut self) -> Result<bool> {
        while self.pool.len() < self.settings.pool_size && !self.producer_done {
            match recv_until_stopped(&self.handoff, &self.workers, self.settings.poll) {
                Ok(Handoff::Ready(mut manager)) => {
                    manager.start()?;
                    self.pool.push(manager);
                }
                Ok(Handoff::Failed(e)) => return Err(e),
                Err(QueueClosed::Disconnected) => self.producer_done = true,
                Err(QueueClosed::Stopped) => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Stacks the pending pairs and pushes the batch.
    /// Returns false if the caller stopped the epoch or went away.
    fn emit(&mut self) -> Result<bool> {
        let pairs = std::mem::take(&mut self.pending);
        let batch = Batch::collate(&pairs, self.collator.as_ref(), &self.settings.device)
            .map_err(|source| LoaderError::Stack { source })?;
        match send_until_stopped(
            &self.output,
            Delivery::Batch(batch),
            &self.stop,
            self.settings.poll,
        ) {
            Ok(()) => Ok(true),
            Err(QueueClosed::Stopped) => Ok(false),
            Err(QueueClosed::Disconnected) => {
                warn!("Output queue closed while the epoch was running");
                Ok(false)
            }
        }
    }
}

impl<C: Collator> Drop for BatchAssembler<C> {
    // Only reached with a live producer if the assembler never ran.
    fn drop(&mut self) {
        if let Some(handle) = self.producer.take() {
            self.workers.cancel();
            if let Err(e) = join_named(handle) {
                warn!(error = %e, "Producer did not exit cleanly");
            }
        }
    }
}
