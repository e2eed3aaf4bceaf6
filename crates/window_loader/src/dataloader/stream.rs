//! src/dataloader/stream.rs
//!
//! Lazy windowed row source for one partition and one role.
//!
//! A `PartitionStream` does nothing until it is asked for its length (one
//! remote count) or started. `start` hands it the ordered list of window
//! starts and spawns a single read-ahead worker that fetches those windows in
//! order into a bounded buffer:
//!
//! ```text
//!   PartitionSource::fetch ──> [read-ahead worker] ──> bounded(prepartition_num) ──> window_at()
//! ```
//!
//! The worker blocks only on a full buffer and the consumer only on an empty
//! one. Both re-check the stop token every poll interval.

use crate::error::{LoaderError, Result};
use crate::query::PartitionDescriptor;
use crate::sample::Window;
use crate::source::{PartitionSource, Role};
use anyhow::anyhow;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use super::common::queue::{recv_until_stopped, send_until_stopped, QueueClosed, StopToken};
use super::common::thread::{join_named, spawn_named};

pub struct PartitionStream {
    source: Arc<dyn PartitionSource>,
    partition: PartitionDescriptor,
    role: Role,
    columns: Arc<[String]>,
    window: usize,
    read_ahead: usize,
    poll: Duration,
    // Child of the epoch token, so one stream can be halted on its own.
    stop: StopToken,
    length: Option<usize>,
    buffer: Option<Receiver<Result<Window>>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl PartitionStream {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        source: Arc<dyn PartitionSource>,
        partition: PartitionDescriptor,
        role: Role,
        columns: Arc<[String]>,
        window: usize,
        read_ahead: usize,
        poll: Duration,
        stop: &StopToken,
    ) -> Self {
        Self {
            source,
            partition,
            role,
            columns,
            window,
            read_ahead,
            poll,
            stop: stop.child(),
            length: None,
            buffer: None,
            worker: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn partition(&self) -> &PartitionDescriptor {
        &self.partition
    }

    /// Row count of the partition, queried once and cached.
    ///
    /// A failed count is logged and treated as an empty partition.
    pub fn length(&mut self) -> usize {
        if let Some(length) = self.length {
            return length;
        }
        let length = match self.source.count(&self.partition) {
            Ok(length) => length,
            Err(e) => {
                warn!(
                    partition = %self.partition,
                    role = %self.role,
                    error = %format!("{:#}", e),
                    "Row count failed; treating partition as empty"
                );
                0
            }
        };
        self.length = Some(length);
        length
    }

    /// Spawns the read-ahead worker for `starts`, fetched in the given order.
    pub(crate) fn start(&mut self, starts: Vec<usize>) -> Result<()> {
        if self.worker.is_some() {
            return Err(LoaderError::internal(format!(
                "{} stream of partition {} started twice",
                self.role, self.partition
            )));
        }
        let (tx, rx) = bounded(self.read_ahead);
        let reader = Reader {
            source: self.source.clone(),
            partition: self.partition.clone(),
            role: self.role,
            columns: self.columns.clone(),
            window: self.window,
            poll: self.poll,
            stop: self.stop.clone(),
        };
        let name = format!("window-loader-p{}-{}", self.partition.ordinal, self.role);
        self.worker = Some(spawn_named(name, move || reader.run(starts, tx))?);
        self.buffer = Some(rx);
        Ok(())
    }

    /// Next buffered window, which must be the window at `start`.
    pub(crate) fn window_at(&mut self, start: usize) -> Result<Window> {
        let buffer = self.buffer.as_ref().ok_or_else(|| {
            LoaderError::internal(format!(
                "{} stream of partition {} read before start",
                self.role, self.partition
            ))
        })?;
        match recv_until_stopped(buffer, &self.stop, self.poll) {
            Ok(Ok(window)) if window.start == start => Ok(window),
            Ok(Ok(window)) => Err(LoaderError::internal(format!(
                "{} stream of partition {} delivered start {} where {} was expected",
                self.role, self.partition, window.start, start
            ))),
            Ok(Err(e)) => Err(e),
            Err(QueueClosed::Stopped) => Err(LoaderError::Cancelled { batches_emitted: 0 }),
            Err(QueueClosed::Disconnected) => Err(LoaderError::internal(format!(
                "{} stream of partition {} ran out of windows before start {}",
                self.role, self.partition, start
            ))),
        }
    }

    /// Stops the read-ahead worker and waits for it.
    pub(crate) fn halt(&mut self) {
        self.stop.cancel();
        self.buffer.take();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = join_named(worker) {
                warn!(error = %e, "Read-ahead worker did not exit cleanly");
            }
        }
    }
}

impl Drop for PartitionStream {
    fn drop(&mut self) {
        self.halt();
    }
}

/// State moved into the read-ahead worker.
struct Reader {
    source: Arc<dyn PartitionSource>,
    partition: PartitionDescriptor,
    role: Role,
    columns: Arc<[String]>,
    window: usize,
    poll: Duration,
    stop: StopToken,
}

impl Reader {
    fn run(self, starts: Vec<usize>, tx: Sender<Result<Window>>) {
        let total = starts.len();
        let mut fetched = 0;
        for start in starts {
            if self.stop.is_stopped() {
                break;
            }
            let window = self.fetch(start);
            let failed = window.is_err();
            if send_until_stopped(&tx, window, &self.stop, self.poll).is_err() || failed {
                break;
            }
            fetched += 1;
        }
        debug!(
            partition = %self.partition,
            role = %self.role,
            fetched,
            total,
            "Read-ahead worker finished"
        );
        self.source.release(&self.partition, self.role);
    }

    fn fetch(&self, start: usize) -> Result<Window> {
        let range = start..start + self.window;
        let rows = self
            .source
            .fetch(&self.partition, &self.columns, range.clone())
            .map_err(|source| LoaderError::Query {
                partition: self.partition.to_string(),
                source,
            })?;
        if rows.num_rows() != self.window {
            return Err(LoaderError::Query {
                partition: self.partition.to_string(),
                source: anyhow!(
                    "{} fetch of rows {:?} returned {} rows, expected {}",
                    self.role,
                    range,
                    rows.num_rows(),
                    self.window
                ),
            });
        }
        Ok(Window::new(self.partition.ordinal, self.role, start, rows))
    }
}
