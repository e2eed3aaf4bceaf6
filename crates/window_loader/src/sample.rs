use crate::source::Role;
use arrow::record_batch::RecordBatch;

/// The `Window` struct represents a single sample side: a contiguous run of
/// rows from one partition.
///
/// Internally it holds:
/// - `partition`: ordinal of the partition the rows come from
/// - `role`: whether the rows feed the input or the target side
/// - `start`: position of the first row within the partition
/// - `rows`: the projected rows themselves (`window size` rows)
///
/// # Examples:
/// - Input window of 3 rows at start 4: rows `4, 5, 6` of the input columns
/// - Matching target window with offset 3: rows `7, 8, 9` of the target columns
#[derive(Debug, Clone)]
pub struct Window {
    pub partition: usize,
    pub role: Role,
    pub start: usize,
    pub rows: RecordBatch,
}

impl Window {
    pub fn new(partition: usize, role: Role, start: usize, rows: RecordBatch) -> Self {
        Self {
            partition,
            role,
            start,
            rows,
        }
    }

    /// Number of rows in the window.
    pub fn len(&self) -> usize {
        self.rows.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.num_rows() == 0
    }

    /// Returns the column names of this window, in projection order.
    pub fn columns(&self) -> Vec<String> {
        self.rows
            .schema()
            .fields()
            .iter()
            .map(|field| field.name().clone())
            .collect()
    }
}

/// One aligned sample: an input window and the target window `offset` rows later.
#[derive(Debug, Clone)]
pub struct WindowPair {
    pub input: Window,
    pub target: Window,
}
