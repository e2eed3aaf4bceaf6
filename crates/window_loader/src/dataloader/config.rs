//! src/dataloader/config.rs
//!
//! Configuration for WindowedLoader behaviour
//!
//! The `LoaderConfig` struct stores every parameter that controls how
//! partitions are planned, windowed, batched and prefetched. It is checked
//! once, against the source's column list, by [`LoaderConfig::validate`].
//!
//! Example:
//! ```ignore
//! let config = LoaderConfig::builder(Query::new("sensors"))
//!     .target_columns(["value"])
//!     .batch_size(32)
//!     .window_size(24)
//!     .window_stride(1)
//!     .shuffle(true)
//!     .pool_size(4)
//!     .build();
//! ```
//!
//! The same record can be read from JSON:
//! ```json
//! {
//!   "base_query": { "source": "sensors" },
//!   "target_columns": ["value"],
//!   "window_size": [24, 6],
//!   "group_col": "site",
//!   "group_scheme": { "values": ["north", "south"] }
//! }
//! ```
//!
//! # Performance considerations:
//! - `prefetch_depth`: Finished batches buffered ahead of the caller
//! - `prepartition_num`: Windows each read-ahead worker fetches ahead of the assembler
//! - `pool_size`: Partitions read concurrently. Each one runs two read-ahead
//!   workers, so memory grows with `pool_size * prepartition_num`

use crate::error::{LoaderError, Result};
use crate::query::{PartitionScheme, Query};
use crate::sampler::WindowSpec;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// A window parameter given either once for both roles or as `[input, target]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WindowParam {
    Scalar(usize),
    Pair([usize; 2]),
}

impl WindowParam {
    pub fn input(&self) -> usize {
        match self {
            WindowParam::Scalar(v) => *v,
            WindowParam::Pair([input, _]) => *input,
        }
    }

    pub fn target(&self) -> usize {
        match self {
            WindowParam::Scalar(v) => *v,
            WindowParam::Pair([_, target]) => *target,
        }
    }
}

impl Default for WindowParam {
    fn default() -> Self {
        WindowParam::Scalar(1)
    }
}

impl From<usize> for WindowParam {
    fn from(v: usize) -> Self {
        WindowParam::Scalar(v)
    }
}

impl From<(usize, usize)> for WindowParam {
    fn from((input, target): (usize, usize)) -> Self {
        WindowParam::Pair([input, target])
    }
}

/// Configuration for WindowedLoader
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoaderConfig {
    /// Query every partition is derived from
    pub base_query: Query,
    /// Columns stacked into the target tensor
    pub target_columns: Vec<String>,
    /// Columns stacked into the input tensor.
    /// Defaults to every column that is neither excluded nor a target.
    #[serde(default)]
    pub input_columns: Option<Vec<String>>,
    /// Columns never read
    #[serde(default)]
    pub excluded_columns: Vec<String>,
    /// Number of windows per batch (defaults to 1)
    #[serde(default = "default_one")]
    pub batch_size: usize,
    /// Whether partition order, pool picks and window order are randomised
    #[serde(default)]
    pub shuffle: bool,
    /// Rows per window, for both roles or as `[input, target]`
    #[serde(default)]
    pub window_size: WindowParam,
    /// Rows between consecutive window starts
    #[serde(default)]
    pub window_stride: WindowParam,
    /// Rows between an input window start and its target window start.
    /// Defaults to the input window size, i.e. the target follows the input.
    #[serde(default)]
    pub offset: Option<usize>,
    /// Whether to drop the last incomplete batch of an epoch
    #[serde(default)]
    pub drop_incomplete: bool,
    /// Opaque placement tag passed to the collator
    #[serde(default = "default_device")]
    pub device: String,
    /// Finished batches buffered ahead of the caller
    #[serde(default = "default_two")]
    pub prefetch_depth: usize,
    /// Windows each read-ahead worker buffers
    #[serde(default = "default_two")]
    pub prepartition_num: usize,
    /// Partitions read concurrently
    #[serde(default = "default_one")]
    pub pool_size: usize,
    /// Random seed for reproducible shuffling.
    /// Without one, every epoch draws a fresh seed.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub group_col: Option<String>,
    #[serde(default)]
    pub group_scheme: Option<PartitionScheme>,
    #[serde(default)]
    pub repartition_col: Option<String>,
    #[serde(default)]
    pub repartition_scheme: Option<PartitionScheme>,
    /// How often blocked threads re-check the stop flag.
    /// Not an error timeout - just a polling interval. Default: 100ms.
    #[serde(default = "default_poll_interval", with = "duration_ms")]
    pub poll_interval: Duration,
}

fn default_one() -> usize {
    1
}

fn default_two() -> usize {
    2
}

fn default_device() -> String {
    "cpu".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

/// Durations are written as integer milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

impl LoaderConfig {
    /// A configuration with every optional field at its default.
    pub fn new(base_query: Query) -> Self {
        Self {
            base_query,
            target_columns: Vec::new(),
            input_columns: None,
            excluded_columns: Vec::new(),
            batch_size: 1,
            shuffle: false,
            window_size: WindowParam::default(),
            window_stride: WindowParam::default(),
            offset: None,
            drop_incomplete: false,
            device: default_device(),
            prefetch_depth: 2,
            prepartition_num: 2,
            pool_size: 1,
            seed: None,
            group_col: None,
            group_scheme: None,
            repartition_col: None,
            repartition_scheme: None,
            poll_interval: default_poll_interval(),
        }
    }

    pub fn builder(base_query: Query) -> LoaderConfigBuilder {
        LoaderConfigBuilder {
            config: Self::new(base_query),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| LoaderError::config(format!("Malformed loader config: {}", e)))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read loader config {}", path.display()))
            .map_err(|e| LoaderError::config(format!("{:#}", e)))?;
        Self::from_json_str(&json)
    }

    pub fn input_window(&self) -> WindowSpec {
        WindowSpec {
            size: self.window_size.input(),
            stride: self.window_stride.input(),
        }
    }

    pub fn target_window(&self) -> WindowSpec {
        WindowSpec {
            size: self.window_size.target(),
            stride: self.window_stride.target(),
        }
    }

    /// Checks every parameter against the source's `columns` and resolves the
    /// defaults that depend on them.
    ///
    /// Grouping pairs (`group_col`/`group_scheme`) are checked by the planner;
    /// here only their columns are looked up.
    /// Checks everything that does not depend on the source's columns.
    pub fn check_parameters(&self) -> Result<()> {
        positive("batch_size", self.batch_size)?;
        positive("prefetch_depth", self.prefetch_depth)?;
        positive("prepartition_num", self.prepartition_num)?;
        positive("pool_size", self.pool_size)?;
        positive("window_size (input)", self.window_size.input())?;
        positive("window_size (target)", self.window_size.target())?;
        positive("window_stride (input)", self.window_stride.input())?;
        positive("window_stride (target)", self.window_stride.target())?;
        if self.poll_interval.is_zero() {
            return Err(LoaderError::config("poll_interval must be > 0"));
        }
        if self.target_columns.is_empty() {
            return Err(LoaderError::config("target_columns must not be empty"));
        }
        if self.input_columns.as_ref().is_some_and(Vec::is_empty) {
            return Err(LoaderError::config("input_columns must not be empty"));
        }
        Ok(())
    }

    pub fn validate(&self, columns: &[String]) -> Result<ResolvedConfig> {
        self.check_parameters()?;

        let available: HashSet<&str> = columns.iter().map(String::as_str).collect();
        let excluded: HashSet<&str> = self.excluded_columns.iter().map(String::as_str).collect();

        check_columns("target_columns", &self.target_columns, &available, &excluded)?;

        let input_columns = match &self.input_columns {
            Some(explicit) => {
                check_columns("input_columns", explicit, &available, &excluded)?;
                explicit.clone()
            }
            None => {
                let targets: HashSet<&str> =
                    self.target_columns.iter().map(String::as_str).collect();
                let derived: Vec<String> = columns
                    .iter()
                    .filter(|c| !excluded.contains(c.as_str()) && !targets.contains(c.as_str()))
                    .cloned()
                    .collect();
                if derived.is_empty() {
                    return Err(LoaderError::config(
                        "No input columns left after removing excluded and target columns",
                    ));
                }
                derived
            }
        };

        for (name, column) in [
            ("group_col", &self.group_col),
            ("repartition_col", &self.repartition_col),
        ] {
            if let Some(column) = column {
                if !column.is_empty() && !available.contains(column.as_str()) {
                    return Err(LoaderError::config(format!(
                        "{} '{}' is not a column of the source",
                        name, column
                    )));
                }
            }
        }

        let input_window = self.input_window();
        Ok(ResolvedConfig {
            input_columns,
            target_columns: self.target_columns.clone(),
            input_window,
            target_window: self.target_window(),
            offset: self.offset.unwrap_or(input_window.size),
        })
    }
}

fn positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(LoaderError::config(format!("{} must be > 0", name)));
    }
    Ok(())
}

fn check_columns(
    name: &str,
    requested: &[String],
    available: &HashSet<&str>,
    excluded: &HashSet<&str>,
) -> Result<()> {
    let mut seen = HashSet::new();
    for column in requested {
        if !available.contains(column.as_str()) {
            return Err(LoaderError::config(format!(
                "{} references unknown column '{}'",
                name, column
            )));
        }
        if excluded.contains(column.as_str()) {
            return Err(LoaderError::config(format!(
                "{} references excluded column '{}'",
                name, column
            )));
        }
        if !seen.insert(column.as_str()) {
            return Err(LoaderError::config(format!(
                "{} lists column '{}' twice",
                name, column
            )));
        }
    }
    Ok(())
}

/// The column-dependent parts of a [`LoaderConfig`] after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub input_columns: Vec<String>,
    pub target_columns: Vec<String>,
    pub input_window: WindowSpec,
    pub target_window: WindowSpec,
    pub offset: usize,
}

/// Builder for LoaderConfig with method chaining
pub struct LoaderConfigBuilder {
    config: LoaderConfig,
}

impl LoaderConfigBuilder {
    pub fn target_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.target_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn input_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.input_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn excluded_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.excluded_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the batch size (must be > 0)
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set whether partitions and windows are shuffled every epoch
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.config.shuffle = shuffle;
        self
    }

    /// Set the window size, e.g. `24` or `(24, 6)` for `(input, target)`
    pub fn window_size(mut self, size: impl Into<WindowParam>) -> Self {
        self.config.window_size = size.into();
        self
    }

    /// Set the window stride, e.g. `1` or `(1, 1)` for `(input, target)`
    pub fn window_stride(mut self, stride: impl Into<WindowParam>) -> Self {
        self.config.window_stride = stride.into();
        self
    }

    /// Set the distance between input and target window starts
    pub fn offset(mut self, offset: usize) -> Self {
        self.config.offset = Some(offset);
        self
    }

    /// Set whether to drop the last incomplete batch
    pub fn drop_incomplete(mut self, drop: bool) -> Self {
        self.config.drop_incomplete = drop;
        self
    }

    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.config.device = device.into();
        self
    }

    /// Set how many finished batches are buffered ahead of the caller.
    /// Higher values smooth out slow partitions but use more memory.
    pub fn prefetch_depth(mut self, depth: usize) -> Self {
        self.config.prefetch_depth = depth;
        self
    }

    /// Set how many windows each read-ahead worker fetches ahead
    pub fn prepartition_num(mut self, num: usize) -> Self {
        self.config.prepartition_num = num;
        self
    }

    /// Set how many partitions are read concurrently
    pub fn pool_size(mut self, size: usize) -> Self {
        self.config.pool_size = size;
        self
    }

    /// Set the random seed for reproducible data loading.
    ///
    /// When set, this seed controls:
    /// - Partition order (if shuffle = true)
    /// - Which pooled partition feeds the next window
    /// - Window order within every partition
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn group_by(mut self, column: impl Into<String>, scheme: PartitionScheme) -> Self {
        self.config.group_col = Some(column.into());
        self.config.group_scheme = Some(scheme);
        self
    }

    pub fn repartition_by(mut self, column: impl Into<String>, scheme: PartitionScheme) -> Self {
        self.config.repartition_col = Some(column.into());
        self.config.repartition_scheme = Some(scheme);
        self
    }

    /// Set the stop-flag polling interval
    ///
    /// - Too low: More responsive shutdown, higher CPU usage.
    /// - Too high: Less CPU overhead, slower shutdown response
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> LoaderConfig {
        self.config
    }
}
