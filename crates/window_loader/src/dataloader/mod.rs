//! src/dataloader/mod.rs
//!
//! This module implements the `WindowedLoader`.
//!
//! The `WindowedLoader` splits a base query into partitions, cuts every
//! partition into aligned `(input, target)` windows and stacks them into
//! batches, overlapping remote fetches with consumption through bounded
//! queues.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────┐
//!                  │ PartitionPlanner │ (base query → partitions)
//!                  └────────┬─────────┘
//!                           │ partition list
//!                           ↓
//!                 ┌───────────────────┐
//!                 │ PartitionProducer │ (thread) counts + aligns windows
//!                 └─────────┬─────────┘
//!                           │ DataManager per partition
//!                           ↓
//!                 [handoff queue: bounded(pool_size)]
//!                           │
//!                           ↓
//!                  ┌────────────────┐     ┌─────────────────────────┐
//!                  │ BatchAssembler │ ←── │ DataManager             │
//!                  │    (thread)    │     │  ├ input PartitionStream │ (read-ahead thread)
//!                  └───────┬────────┘     │  └ target PartitionStream│ (read-ahead thread)
//!                          │              └─────────────────────────┘
//!                          │ Collator stacks pending windows
//!                          ↓
//!                 [output queue: bounded(prefetch_depth)]
//!                          │
//!                          ↓
//!                    ┌───────────┐
//!                    │ EpochIter │ (caller's thread)
//!                    └───────────┘
//! ```
//!
//! # Module Structure
//!
//! ```text
//! src/dataloader/
//! ├── mod.rs             # Public API exports + module-level architecture docs
//! ├── config.rs          # LoaderConfig, builder, and validation
//! ├── loader.rs          # WindowedLoader struct and constructors
//! ├── iterator.rs        # EpochIter and epoch statistics
//! ├── assembler.rs       # BatchAssembler thread
//! ├── producer.rs        # PartitionProducer thread and handoff items
//! ├── manager.rs         # DataManager (one partition, two streams)
//! ├── stream.rs          # PartitionStream and its read-ahead worker
//! └── common/
//!     ├── mod.rs         # Module declarations for shared utilities
//!     ├── queue.rs       # StopToken and stop-aware queue operations
//!     └── thread.rs      # Seed derivation and named threads
//! ```
//!
//! # Example Usage
//!
//! ```ignore
//! let source = Arc::new(MemorySource::new(record_batch));
//! let config = LoaderConfig::builder(Query::new("sensors"))
//!     .target_columns(["value"])
//!     .window_size(24)
//!     .batch_size(32)
//!     .shuffle(true)
//!     .seed(42)
//!     .group_by("site", PartitionScheme::Values(vec!["north".into(), "south".into()]))
//!     .build();
//!
//! let mut loader = WindowedLoader::new(source, config)?;
//! for epoch in 0..10 {
//!     let mut batches = loader.iter()?;
//!     for batch in &mut batches {
//!         let (input, target) = batch?.into_pair();
//!         // input.shape() == [32, 24, n_input_columns]
//!     }
//!     println!("epoch {}: {:?}", epoch, batches.stats());
//! }
//! ```
//!
//! # Performance Guidelines
//!
//! ## Memory Usage
//! - Output queue: O(prefetch_depth x batch_size x window_size)
//! - Read-ahead: O(pool_size x 2 x prepartition_num x window_size)
//!
//! ## Notes:
//! - Increase `pool_size` to read several partitions at once and to mix them
//!   within batches when shuffling
//! - Increase `prefetch_depth` if the consumer is starved for data
//! - Increase `prepartition_num` if single fetches are slow
//! - Every blocked thread notices cancellation within one `poll_interval`

// Module declarations
mod assembler;
mod common;
mod config;
mod iterator;
mod loader;
mod manager;
mod producer;
mod stream;

// Public re-exports
pub use config::{LoaderConfig, LoaderConfigBuilder, ResolvedConfig, WindowParam};
pub use iterator::{EpochIter, EpochStats};
pub use loader::WindowedLoader;
pub use manager::DataManager;
pub use stream::PartitionStream;

pub use common::queue::StopToken;
pub use common::thread::{derive_seed, SeedStream};
