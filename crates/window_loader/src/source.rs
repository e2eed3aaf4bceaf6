use crate::query::{PartitionDescriptor, Predicate, ScalarValue};
use anyhow::{anyhow, bail, Context, Result};
use arrow::array::{Array, ArrayRef, BooleanArray, Float64Array, StringArray};
use arrow::compute::{cast, filter_record_batch};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::{RwLock, RwLockReadGuard};

/// Which side of a sample a stream produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Input,
    Target,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Input => write!(f, "input"),
            Role::Target => write!(f, "target"),
        }
    }
}

/// A `PartitionSource` is the loader's only view of the remote store.
///
/// It answers row counts and row-range fetches for one partition at a time,
/// keeping the loader independent of any query language or driver.
///
/// # Threading
/// One source instance is shared (`Arc`) by the producer thread and every
/// read-ahead worker, so implementations must be `Send + Sync`. Calls for
/// different partitions may arrive concurrently.
///
/// # Row order
/// `fetch` must return rows in the same stable order for the whole epoch;
/// window starts are positions in that order.
pub trait PartitionSource: Send + Sync {
    /// All column names available to queries, in schema order.
    fn columns(&self) -> Result<Vec<String>>;

    /// Number of rows in the partition.
    fn count(&self, partition: &PartitionDescriptor) -> Result<usize>;

    /// Rows `range` of the partition, projected to `columns` in that order.
    ///
    /// May return fewer rows than requested only when the range runs past the
    /// end of the partition.
    fn fetch(
        &self,
        partition: &PartitionDescriptor,
        columns: &[String],
        range: Range<usize>,
    ) -> Result<RecordBatch>;

    /// Called once per partition and role when a read-ahead worker stops, so
    /// remote cursors can be closed. The default does nothing.
    fn release(&self, _partition: &PartitionDescriptor, _role: Role) {}
}

/// ============================================================================
/// An in-memory `PartitionSource` over one Arrow `RecordBatch`.
///
/// Partition predicates are evaluated against the batch:
/// - `Eq` compares strings against `Utf8` columns and numbers against any
///   numeric column (compared as `f64`)
/// - `Range` is numeric only, `lower <= value < upper`
/// - Null values never match
///
/// Matching rows keep their original relative order, so a partition's window
/// starts are positions within the filtered rows. Filtered rows are cached per
/// partition, so repeated fetches only slice.
///
/// # Example
/// ```ignore
/// let source = MemorySource::new(batch);
/// let descriptor = plan(&Query::new("memory"), None, None, None, None)?.remove(0).remove(0);
/// let rows = source.fetch(&descriptor, &["value".into()], 0..4)?;
/// ```
#[derive(Debug)]
pub struct MemorySource {
    batch: RecordBatch,
    // Keyed by the partition's rendered conjunction
    filtered: RwLock<HashMap<String, RecordBatch>>,
}

impl MemorySource {
    pub fn new(batch: RecordBatch) -> Self {
        Self {
            batch,
            filtered: RwLock::new(HashMap::new()),
        }
    }

    /// The full underlying batch.
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Rows of the batch that satisfy every predicate of `partition`.
    pub fn partition_rows(&self, partition: &PartitionDescriptor) -> Result<RecordBatch> {
        let key = partition
            .all_predicates()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(" AND ");
        if let Some(rows) = self.read_cache()?.get(&key) {
            return Ok(rows.clone());
        }
        let rows = self.filter(partition)?;
        self.filtered
            .write()
            .map_err(|_| anyhow!("Partition cache lock poisoned"))?
            .insert(key, rows.clone());
        Ok(rows)
    }

    fn read_cache(&self) -> Result<RwLockReadGuard<'_, HashMap<String, RecordBatch>>> {
        self.filtered
            .read()
            .map_err(|_| anyhow!("Partition cache lock poisoned"))
    }

    fn filter(&self, partition: &PartitionDescriptor) -> Result<RecordBatch> {
        let mut mask = vec![true; self.batch.num_rows()];
        for predicate in partition.all_predicates() {
            let column = self
                .batch
                .column_by_name(predicate.column())
                .ok_or_else(|| anyhow!("Unknown column '{}' in {}", predicate.column(), predicate))?;
            let matched = evaluate(column, predicate)
                .with_context(|| format!("Failed to evaluate predicate {}", predicate))?;
            for (keep, hit) in mask.iter_mut().zip(matched) {
                *keep &= hit;
            }
        }
        filter_record_batch(&self.batch, &BooleanArray::from(mask))
            .context("Failed to filter partition rows")
    }
}

impl PartitionSource for MemorySource {
    fn columns(&self) -> Result<Vec<String>> {
        Ok(self
            .batch
            .schema()
            .fields()
            .iter()
            .map(|field| field.name().clone())
            .collect())
    }

    fn count(&self, partition: &PartitionDescriptor) -> Result<usize> {
        Ok(self.partition_rows(partition)?.num_rows())
    }

    fn fetch(
        &self,
        partition: &PartitionDescriptor,
        columns: &[String],
        range: Range<usize>,
    ) -> Result<RecordBatch> {
        let rows = self.partition_rows(partition)?;
        let schema = rows.schema();
        let indices = columns
            .iter()
            .map(|name| {
                schema
                    .index_of(name)
                    .with_context(|| format!("Column '{}' not found", name))
            })
            .collect::<Result<Vec<_>>>()?;
        let projected = rows.project(&indices)?;

        let start = range.start.min(projected.num_rows());
        let end = range.end.min(projected.num_rows());
        Ok(projected.slice(start, end.saturating_sub(start)))
    }
}

/// Per-row truth values of `predicate` over `column`.
fn evaluate(column: &ArrayRef, predicate: &Predicate) -> Result<Vec<bool>> {
    match predicate {
        Predicate::Eq {
            value: ScalarValue::Str(expected),
            ..
        } => {
            let strings = column
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| anyhow!("String literal compared with {} column", column.data_type()))?;
            Ok((0..strings.len())
                .map(|i| !strings.is_null(i) && strings.value(i) == expected.as_str())
                .collect())
        }
        Predicate::Eq { value, .. } => {
            let expected = value
                .as_f64()
                .ok_or_else(|| anyhow!("Non-numeric literal {}", value))?;
            let numbers = numeric(column)?;
            Ok((0..numbers.len())
                .map(|i| !numbers.is_null(i) && numbers.value(i) == expected)
                .collect())
        }
        Predicate::Range { lower, upper, .. } => {
            let numbers = numeric(column)?;
            Ok((0..numbers.len())
                .map(|i| {
                    !numbers.is_null(i) && numbers.value(i) >= *lower && numbers.value(i) < *upper
                })
                .collect())
        }
    }
}

fn numeric(column: &ArrayRef) -> Result<Float64Array> {
    if !column.data_type().is_numeric() {
        bail!("Numeric comparison on {} column", column.data_type());
    }
    let casted = cast(column.as_ref(), &DataType::Float64)?;
    casted
        .as_any()
        .downcast_ref::<Float64Array>()
        .cloned()
        .ok_or_else(|| anyhow!("Cast to Float64 produced {}", casted.data_type()))
}
