#![allow(dead_code)]

use anyhow::{bail, Result};
use arrow::array::{Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use window_loader::{
    Batch, LoaderConfig, MemorySource, PartitionDescriptor, PartitionScheme, PartitionSource,
    Query, Role, ScalarValue, WindowOrigin, WindowTensor,
};

/// Rows for partitions of the given sizes.
///
/// Columns:
/// - `partition`: partition index
/// - `row`: position within the partition
/// - `value`: `partition * 1000 + row`
pub fn sensor_batch(sizes: &[usize]) -> RecordBatch {
    let mut partition = Vec::new();
    let mut row = Vec::new();
    let mut value = Vec::new();
    for (p, &n) in sizes.iter().enumerate() {
        for r in 0..n {
            partition.push(p as i64);
            row.push(r as i64);
            value.push((p * 1000 + r) as f64);
        }
    }
    let schema = Arc::new(Schema::new(vec![
        Field::new("partition", DataType::Int64, false),
        Field::new("row", DataType::Int64, false),
        Field::new("value", DataType::Float64, false),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(partition)),
            Arc::new(Int64Array::from(row)),
            Arc::new(Float64Array::from(value)),
        ],
    )
    .expect("valid sensor batch")
}

/// Poll interval of every test configuration.
pub const POLL: Duration = Duration::from_millis(10);

/// Config over `sizes.len()` partitions grouped by the `partition` column,
/// reading `row` as input and `value` as target.
pub fn grouped_config(sizes: &[usize]) -> window_loader::dataloader::LoaderConfigBuilder {
    let values = (0..sizes.len() as i64).map(ScalarValue::Int).collect();
    LoaderConfig::builder(Query::new("sensors"))
        .input_columns(["row"])
        .target_columns(["value"])
        .group_by("partition", PartitionScheme::Values(values))
        .poll_interval(POLL)
}

/// A MemorySource that records every call and can be told to misbehave.
#[derive(Default)]
pub struct TrackedSource {
    inner: Option<MemorySource>,
    pub counts: AtomicUsize,
    pub fetches: AtomicUsize,
    pub releases: AtomicUsize,
    /// Sleep before every fetch
    pub fetch_delay: Duration,
    /// Fetches of this partition ordinal fail
    pub fail_fetch: Option<usize>,
    /// Counts of this partition ordinal fail
    pub fail_count: Option<usize>,
}

impl TrackedSource {
    pub fn new(sizes: &[usize]) -> Self {
        Self {
            inner: Some(MemorySource::new(sensor_batch(sizes))),
            ..Self::default()
        }
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn failing_fetch(mut self, ordinal: usize) -> Self {
        self.fail_fetch = Some(ordinal);
        self
    }

    pub fn failing_count(mut self, ordinal: usize) -> Self {
        self.fail_count = Some(ordinal);
        self
    }

    pub fn counts(&self) -> usize {
        self.counts.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    fn inner(&self) -> Result<&MemorySource> {
        match &self.inner {
            Some(inner) => Ok(inner),
            None => bail!("source has no rows"),
        }
    }
}

impl PartitionSource for TrackedSource {
    fn columns(&self) -> Result<Vec<String>> {
        self.inner()?.columns()
    }

    fn count(&self, partition: &PartitionDescriptor) -> Result<usize> {
        self.counts.fetch_add(1, Ordering::SeqCst);
        if self.fail_count == Some(partition.ordinal) {
            bail!("count rejected for {}", partition);
        }
        self.inner()?.count(partition)
    }

    fn fetch(
        &self,
        partition: &PartitionDescriptor,
        columns: &[String],
        range: Range<usize>,
    ) -> Result<RecordBatch> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.fetch_delay.is_zero() {
            thread::sleep(self.fetch_delay);
        }
        if self.fail_fetch == Some(partition.ordinal) {
            bail!("connection reset while reading {}", partition);
        }
        self.inner()?.fetch(partition, columns, range)
    }

    fn release(&self, _partition: &PartitionDescriptor, _role: Role) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// All origins of an epoch, in delivery order.
pub fn origins<'a>(batches: impl IntoIterator<Item = &'a Batch<WindowTensor>>) -> Vec<WindowOrigin> {
    batches
        .into_iter()
        .flat_map(|b| b.origins.iter().copied())
        .collect()
}

pub fn origin(partition: usize, start: usize) -> WindowOrigin {
    WindowOrigin { partition, start }
}
