//! src/dataloader/manager.rs
//!
//! Per-partition worker pairing an input and a target stream.
//!
//! A `DataManager` is built on the producer thread (two remote counts plus
//! window alignment), handed to the assembler, and started only when it joins
//! the active pool. It then yields `(input, target)` window pairs in the order
//! of its index list until the list is used up.

use crate::error::Result;
use crate::query::PartitionDescriptor;
use crate::sample::WindowPair;
use crate::sampler::{align_windows, AlignedWindows};
use crate::source::{PartitionSource, Role};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::common::queue::StopToken;
use super::config::ResolvedConfig;
use super::stream::PartitionStream;

/// Everything a DataManager needs besides its partition, shared by the
/// producer and every manager of an epoch.
pub(crate) struct ReadContext {
    pub(crate) source: Arc<dyn PartitionSource>,
    pub(crate) resolved: ResolvedConfig,
    pub(crate) input_columns: Arc<[String]>,
    pub(crate) target_columns: Arc<[String]>,
    pub(crate) shuffle: bool,
    pub(crate) read_ahead: usize,
    pub(crate) poll: Duration,
}

impl ReadContext {
    pub(crate) fn new(
        source: Arc<dyn PartitionSource>,
        resolved: ResolvedConfig,
        shuffle: bool,
        read_ahead: usize,
        poll: Duration,
    ) -> Self {
        Self {
            source,
            input_columns: Arc::from(resolved.input_columns.clone()),
            target_columns: Arc::from(resolved.target_columns.clone()),
            resolved,
            shuffle,
            read_ahead,
            poll,
        }
    }

    fn stream(
        &self,
        partition: &PartitionDescriptor,
        role: Role,
        stop: &StopToken,
    ) -> PartitionStream {
        let (columns, window) = match role {
            Role::Input => (&self.input_columns, self.resolved.input_window),
            Role::Target => (&self.target_columns, self.resolved.target_window),
        };
        PartitionStream::new(
            self.source.clone(),
            partition.clone(),
            role,
            columns.clone(),
            window.size,
            self.read_ahead,
            self.poll,
            stop,
        )
    }
}

pub struct DataManager {
    partition: PartitionDescriptor,
    input: PartitionStream,
    target: PartitionStream,
    windows: AlignedWindows,
    cursor: usize,
    started: bool,
    failed: bool,
}

impl DataManager {
    /// Counts the partition and aligns its windows.
    ///
    /// Returns `None` when the partition has no complete `(input, target)` pair.
    pub(crate) fn build(
        context: &ReadContext,
        partition: PartitionDescriptor,
        seed: u64,
        stop: &StopToken,
    ) -> Result<Option<Self>> {
        let mut input = context.stream(&partition, Role::Input, stop);
        let mut target = context.stream(&partition, Role::Target, stop);

        // Both roles read the same partition; the shorter view bounds alignment.
        let length = input.length().min(target.length());
        let resolved = &context.resolved;
        let windows = align_windows(
            length,
            resolved.input_window,
            resolved.target_window,
            resolved.offset,
            context.shuffle,
            seed,
        )?;
        if windows.is_empty() {
            return Ok(None);
        }
        debug!(
            partition = %partition,
            rows = length,
            windows = windows.len(),
            driver = ?windows.driver,
            "Built partition"
        );

        Ok(Some(Self {
            partition,
            input,
            target,
            windows,
            cursor: 0,
            started: false,
            failed: false,
        }))
    }

    /// Spawns both read-ahead workers.
    pub(crate) fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.input.start(self.windows.starts.clone())?;
        self.target.start(self.windows.target_starts())?;
        self.started = true;
        debug!(partition = %self.partition, "Started partition");
        Ok(())
    }

    pub fn descriptor(&self) -> &PartitionDescriptor {
        &self.partition
    }

    /// Total number of pairs this manager yields.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn remaining(&self) -> usize {
        if self.failed {
            return 0;
        }
        self.windows.len() - self.cursor
    }

    /// Input window starts in yield order.
    pub fn starts(&self) -> &[usize] {
        &self.windows.starts
    }
}

impl Iterator for DataManager {
    type Item = Result<WindowPair>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor >= self.windows.len() {
            return None;
        }
        let start = self.windows.starts[self.cursor];
        let pair = self.input.window_at(start).and_then(|input| {
            self.target
                .window_at(start + self.windows.offset)
                .map(|target| WindowPair { input, target })
        });
        match pair {
            Ok(pair) => {
                self.cursor += 1;
                Some(Ok(pair))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl Drop for DataManager {
    fn drop(&mut self) {
        self.input.halt();
        self.target.halt();
    }
}
