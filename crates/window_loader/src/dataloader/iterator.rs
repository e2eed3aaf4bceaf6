//! src/dataloader/iterator.rs
//!
//! Iterator over the batches of one epoch.
//!
//! `EpochIter` is the per-epoch context: it owns the stop token, the receiving
//! end of the output queue and the assembler thread, which in turn owns the
//! producer thread and every read-ahead worker. Nothing of an epoch outlives
//! its `EpochIter`:
//!
//! - `next()` receives from the output queue on the caller's thread
//! - `release()` cancels and joins everything, reporting unfinished work
//! - dropping the iterator does the same silently

use crate::collator::Collator;
use crate::error::{LoaderError, Result};
use crate::minibatch::Batch;
use crate::query::PartitionDescriptor;
use crossbeam_channel::{bounded, Receiver};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use super::assembler::{AssemblySettings, BatchAssembler, Delivery};
use super::common::queue::{recv_until_stopped, QueueClosed, StopToken};
use super::common::thread::join_named;
use super::manager::ReadContext;
use super::producer::PartitionProducer;

/// Progress of one epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpochStats {
    /// Batches returned to the caller
    pub batches: usize,
    /// Windows in those batches
    pub windows: usize,
    /// Partitions whose windows were all assembled
    pub partitions_completed: usize,
    /// Partitions without a single window
    pub partitions_skipped: usize,
}

/// Partition counters updated by the background threads.
#[derive(Debug, Default)]
pub(crate) struct EpochCounters {
    completed: AtomicUsize,
    skipped: AtomicUsize,
    // Set once every batch of the epoch is queued, before `Done` is.
    drained: AtomicBool,
}

impl EpochCounters {
    pub(crate) fn partition_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn partition_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn epoch_drained(&self) {
        self.drained.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.drained.load(Ordering::SeqCst)
    }

    pub(crate) fn snapshot(&self) -> EpochStats {
        EpochStats {
            partitions_completed: self.completed.load(Ordering::Relaxed),
            partitions_skipped: self.skipped.load(Ordering::Relaxed),
            ..EpochStats::default()
        }
    }
}

/// Everything needed to start an epoch.
pub(crate) struct EpochPlan<C> {
    pub(crate) epoch: usize,
    pub(crate) seed: u64,
    pub(crate) collator: Arc<C>,
    pub(crate) context: Arc<ReadContext>,
    pub(crate) partitions: Vec<PartitionDescriptor>,
    pub(crate) settings: AssemblySettings,
    pub(crate) prefetch_depth: usize,
}

/// Iterator over the batches of one epoch.
///
/// Created by calling `loader.iter()`. Yields `Ok(batch)` until the epoch is
/// exhausted, or a single `Err` followed by `None` if a background thread
/// failed.
pub struct EpochIter<'a, C: Collator> {
    // The loader stays mutably borrowed for the whole epoch.
    _loader: PhantomData<&'a mut ()>,
    output: Receiver<Delivery<C::Output>>,
    stop: StopToken,
    assembler: Option<thread::JoinHandle<()>>,
    counters: Arc<EpochCounters>,
    epoch: usize,
    seed: u64,
    poll: Duration,
    batches: usize,
    windows: usize,
    finished: bool,
}

impl<'a, C: Collator + 'static> EpochIter<'a, C> {
    /// Spawns the producer and the assembler for `plan`.
    pub(crate) fn start(plan: EpochPlan<C>) -> Result<Self> {
        let EpochPlan {
            epoch,
            seed,
            collator,
            context,
            partitions,
            settings,
            prefetch_depth,
        } = plan;
        let poll = settings.poll;
        let stop = StopToken::new();
        let workers = stop.child();
        let counters = Arc::new(EpochCounters::default());
        let (handoff_tx, handoff_rx) = bounded(settings.pool_size);
        let (output_tx, output_rx) = bounded(prefetch_depth);

        info!(
            epoch,
            seed,
            partitions = partitions.len(),
            "Starting epoch"
        );

        let producer = PartitionProducer::new(
            context,
            partitions,
            seed,
            handoff_tx,
            workers.clone(),
            counters.clone(),
        )
        .spawn(epoch)?;

        // A failed spawn drops the assembler, which joins the producer.
        let assembler = BatchAssembler::new(
            collator,
            settings,
            seed,
            handoff_rx,
            output_tx,
            stop.clone(),
            workers,
            producer,
            counters.clone(),
        )
        .spawn(epoch)?;

        Ok(Self {
            _loader: PhantomData,
            output: output_rx,
            stop,
            assembler: Some(assembler),
            counters,
            epoch,
            seed,
            poll,
            batches: 0,
            windows: 0,
            finished: false,
        })
    }

    /// Zero-based epoch number of this iteration.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Base seed every random decision of this epoch derives from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Batches waiting in the output queue, at most `prefetch_depth`.
    pub fn buffered(&self) -> usize {
        self.output.len()
    }

    pub fn stats(&self) -> EpochStats {
        EpochStats {
            batches: self.batches,
            windows: self.windows,
            ..self.counters.snapshot()
        }
    }

    /// Stops the epoch and waits for every background thread.
    ///
    /// # Errors
    /// `Cancelled` if the epoch still had batches or partitions left. Taking
    /// the last batch drains the epoch even if the end marker is still queued.
    pub fn release(mut self) -> Result<()> {
        let unfinished = !self.finished;
        self.shutdown();
        if unfinished && !self.drained() {
            warn!(
                epoch = self.epoch,
                batches = self.batches,
                "Epoch released before it was exhausted"
            );
            return Err(LoaderError::Cancelled {
                batches_emitted: self.batches,
            });
        }
        Ok(())
    }

    /// True once the assembler queued every batch and none is left unread.
    /// Only meaningful after the assembler was joined.
    fn drained(&self) -> bool {
        self.counters.is_drained()
            && !self
                .output
                .try_iter()
                .any(|delivery| matches!(delivery, Delivery::Batch(_)))
    }

    fn shutdown(&mut self) {
        self.finished = true;
        self.stop.cancel();
        if let Some(e) = self.join_assembler() {
            warn!(error = %e, "Assembler did not exit cleanly");
        }
    }

    fn join_assembler(&mut self) -> Option<LoaderError> {
        let handle = self.assembler.take()?;
        join_named(handle).err()
    }

    fn finish(&mut self) -> Option<LoaderError> {
        self.finished = true;
        self.join_assembler()
    }
}

impl<C: Collator + 'static> Iterator for EpochIter<'_, C> {
    type Item = Result<Batch<C::Output>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match recv_until_stopped(&self.output, &self.stop, self.poll) {
            Ok(Delivery::Batch(batch)) => {
                self.batches += 1;
                self.windows += batch.len();
                Some(Ok(batch))
            }
            Ok(Delivery::Done) => {
                let failure = self.finish();
                info!(
                    epoch = self.epoch,
                    batches = self.batches,
                    windows = self.windows,
                    "Epoch complete"
                );
                failure.map(Err)
            }
            Ok(Delivery::Failed(e)) => {
                self.finish();
                Some(Err(e))
            }
            Err(QueueClosed::Stopped) => {
                self.finished = true;
                None
            }
            Err(QueueClosed::Disconnected) => {
                let failure = self.finish().unwrap_or_else(|| {
                    LoaderError::internal("Assembler exited without ending the epoch")
                });
                Some(Err(failure))
            }
        }
    }
}

impl<C: Collator> Drop for EpochIter<'_, C> {
    fn drop(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.assembler.take() {
            if let Err(e) = join_named(handle) {
                warn!(error = %e, "Assembler did not exit cleanly");
            }
        }
    }
}
