//! Partition-aware, windowed streaming loader.
//!
//! A [`WindowedLoader`] splits a base [`Query`] into partitions, cuts every
//! partition into aligned `(input, target)` windows and delivers them as
//! stacked [`Batch`]es. Rows come from a [`PartitionSource`]; stacking is done
//! by a [`Collator`]. See the [`dataloader`] module for the threading model.

pub mod collator;
pub mod dataloader;
pub mod error;
pub mod minibatch;
pub mod planner;
pub mod query;
pub mod sample;
pub mod sampler;
pub mod source;

#[cfg(feature = "tch")]
pub use collator::TchCollator;
pub use collator::{Collator, StackCollator, WindowTensor};
pub use dataloader::{
    derive_seed, EpochIter, EpochStats, LoaderConfig, LoaderConfigBuilder, ResolvedConfig,
    SeedStream, WindowParam, WindowedLoader,
};
pub use error::{LoaderError, Result};
pub use minibatch::{Batch, WindowOrigin};
pub use planner::plan;
pub use query::{PartitionDescriptor, PartitionScheme, Predicate, Query, ScalarValue};
pub use sample::{Window, WindowPair};
pub use sampler::{align_windows, window_count, WindowSampler, WindowSpec};
pub use source::{MemorySource, PartitionSource, Role};
