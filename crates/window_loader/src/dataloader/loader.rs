//! src/dataloader/loader.rs
//!
//! WindowedLoader constructors and epoch entry point.
//!
//! # Constructor Overview
//! - `new()` - default StackCollator
//! - `new_with_collator()` - custom Collator
//!
//! Both constructors do all validation up front, synchronously: they list the
//! source's columns, check the configuration against them and plan the
//! partitions. No thread is started and no partition is counted until
//! `iter()` is called.
//!
//! # Seed Coordination
//!
//! With `config.seed` set, every epoch uses that seed, so two epochs (or two
//! loaders) with the same configuration yield identical batches. Without it,
//! every `iter()` draws a fresh base seed, readable from `EpochIter::seed()`.

use crate::collator::{Collator, StackCollator};
use crate::error::{LoaderError, Result};
use crate::planner::plan;
use crate::query::PartitionDescriptor;
use crate::source::PartitionSource;
use rand::Rng;
use std::sync::Arc;

use super::assembler::AssemblySettings;
use super::config::{LoaderConfig, ResolvedConfig};
use super::iterator::{EpochIter, EpochPlan};
use super::manager::ReadContext;

// ================================================================================================
// 1. Core Type
// ================================================================================================
/// Partition-aware loader of windowed `(input, target)` batches.
///
/// # Thread safety:
/// - One epoch at a time: `iter()` borrows the loader mutably until the
///   returned `EpochIter` is dropped or released.
/// - The source and collator are shared with the epoch's background threads.
///
/// # Type parameters:
/// - `C`: Collator type (defaults to StackCollator)
pub struct WindowedLoader<C = StackCollator> {
    source: Arc<dyn PartitionSource>,
    collator: Arc<C>,
    config: LoaderConfig,
    resolved: ResolvedConfig,
    partitions: Vec<Vec<PartitionDescriptor>>,
    current_epoch: usize,
}

// ================================================================================================
// 2. Constructors
// ================================================================================================
impl WindowedLoader<StackCollator> {
    /// Creates a loader that stacks windows with the default StackCollator.
    ///
    /// # Errors
    /// - `Configuration` for any invalid or contradictory parameter
    /// - `Query` if the source cannot list its columns
    pub fn new(source: Arc<dyn PartitionSource>, config: LoaderConfig) -> Result<Self> {
        Self::new_with_collator(source, config, StackCollator)
    }
}

impl<C> WindowedLoader<C>
where
    C: Collator + 'static,
{
    /// Creates a loader with a custom Collator.
    ///
    /// # Errors
    /// - `Configuration` for any invalid or contradictory parameter
    /// - `Query` if the source cannot list its columns
    pub fn new_with_collator(
        source: Arc<dyn PartitionSource>,
        config: LoaderConfig,
        collator: C,
    ) -> Result<Self> {
        // Structural checks first, so they never depend on the remote source.
        config.check_parameters()?;
        let partitions = plan(
            &config.base_query,
            config.group_col.as_deref(),
            config.group_scheme.as_ref(),
            config.repartition_col.as_deref(),
            config.repartition_scheme.as_ref(),
        )?;
        let columns = source.columns().map_err(|e| LoaderError::Query {
            partition: config.base_query.to_string(),
            source: e,
        })?;
        let resolved = config.validate(&columns)?;

        Ok(Self {
            source,
            collator: Arc::new(collator),
            config,
            resolved,
            partitions,
            current_epoch: 0,
        })
    }

    // ============================================================================================
    // 3. Iteration
    // ============================================================================================
    /// Starts a new epoch.
    ///
    /// Every call creates fresh queues, a fresh stop token and fresh threads,
    /// so a loader can be iterated any number of times.
    ///
    /// # Errors
    /// `Internal` if a background thread cannot be spawned.
    pub fn iter(&mut self) -> Result<EpochIter<'_, C>> {
        let epoch = self.current_epoch;
        self.current_epoch += 1;
        let seed = self.config.seed.unwrap_or_else(|| rand::rng().random());

        let context = ReadContext::new(
            self.source.clone(),
            self.resolved.clone(),
            self.config.shuffle,
            self.config.prepartition_num,
            self.config.poll_interval,
        );
        let settings = AssemblySettings {
            batch_size: self.config.batch_size,
            pool_size: self.config.pool_size,
            drop_incomplete: self.config.drop_incomplete,
            shuffle: self.config.shuffle,
            device: self.config.device.clone(),
            poll: self.config.poll_interval,
        };

        EpochIter::start(EpochPlan {
            epoch,
            seed,
            collator: self.collator.clone(),
            context: Arc::new(context),
            partitions: self.partitions.iter().flatten().cloned().collect(),
            settings,
            prefetch_depth: self.config.prefetch_depth,
        })
    }

    /// Planned partitions, one list per group.
    pub fn partitions(&self) -> &[Vec<PartitionDescriptor>] {
        &self.partitions
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Column lists, window specs and offset after validation.
    pub fn resolved(&self) -> &ResolvedConfig {
        &self.resolved
    }

    /// Number of epochs started so far.
    pub fn epochs_started(&self) -> usize {
        self.current_epoch
    }
}
