//! src/dataloader/producer.rs
//!
//! Background thread that turns planned partitions into DataManagers.
//!
//! The producer pops partitions one at a time (FIFO, or a seeded random pick
//! when shuffling), builds a manager for each, and publishes it into the
//! handoff queue. The queue holds at most `pool_size` managers, which caps how
//! far counting runs ahead of the assembler. Dropping the sender tells the
//! assembler that no more partitions are coming.

use crate::error::LoaderError;
use crate::query::PartitionDescriptor;
use crossbeam_channel::Sender;
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error};

use super::common::queue::{send_until_stopped, StopToken};
use super::common::thread::{derive_rng, derive_seed, spawn_named, SeedStream};
use super::iterator::EpochCounters;
use super::manager::{DataManager, ReadContext};

/// Item of the handoff queue.
pub(crate) enum Handoff {
    Ready(DataManager),
    Failed(LoaderError),
}

pub(crate) struct PartitionProducer {
    context: Arc<ReadContext>,
    remaining: VecDeque<PartitionDescriptor>,
    // Present only when shuffling
    rng: Option<StdRng>,
    base_seed: u64,
    handoff: Sender<Handoff>,
    stop: StopToken,
    counters: Arc<EpochCounters>,
}

impl PartitionProducer {
    pub(crate) fn new(
        context: Arc<ReadContext>,
        partitions: Vec<PartitionDescriptor>,
        base_seed: u64,
        handoff: Sender<Handoff>,
        stop: StopToken,
        counters: Arc<EpochCounters>,
    ) -> Self {
        let rng = context
            .shuffle
            .then(|| derive_rng(base_seed, SeedStream::Producer, 0));
        Self {
            context,
            remaining: partitions.into(),
            rng,
            base_seed,
            handoff,
            stop,
            counters,
        }
    }

    pub(crate) fn spawn(self, epoch: usize) -> crate::error::Result<thread::JoinHandle<()>> {
        spawn_named(format!("window-loader-producer-e{}", epoch), move || self.run())
    }

    fn next_partition(&mut self) -> Option<PartitionDescriptor> {
        match self.rng.as_mut() {
            Some(rng) if !self.remaining.is_empty() => {
                let pick = rng.random_range(0..self.remaining.len());
                self.remaining.remove(pick)
            }
            _ => self.remaining.pop_front(),
        }
    }

    pub(crate) fn run(mut self) {
        while let Some(partition) = self.next_partition() {
            if self.stop.is_stopped() {
                break;
            }
            let seed = derive_seed(self.base_seed, SeedStream::Partition, partition.ordinal);
            let label = partition.to_string();
            match DataManager::build(&self.context, partition, seed, &self.stop) {
                Ok(Some(manager)) => {
                    let item = Handoff::Ready(manager);
                    if send_until_stopped(&self.handoff, item, &self.stop, self.context.poll)
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(None) => {
                    self.counters.partition_skipped();
                    debug!(partition = %label, "Skipping partition without windows");
                }
                Err(e) => {
                    error!(partition = %label, error = %e, "Failed to build partition");
                    let _ = send_until_stopped(
                        &self.handoff,
                        Handoff::Failed(e),
                        &self.stop,
                        self.context.poll,
                    );
                    // Queued before the cancel, so the assembler still finds it.
                    self.stop.cancel();
                    break;
                }
            }
        }
        debug!(unvisited = self.remaining.len(), "Producer finished");
    }
}
