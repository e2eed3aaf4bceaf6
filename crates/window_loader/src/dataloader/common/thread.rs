//! Seed derivation and worker thread spawning.
//!
//! Every random decision in an epoch comes from an `StdRng` whose seed is
//! derived from the epoch's base seed, so a fixed base seed reproduces the
//! whole epoch regardless of thread timing.

use crate::error::{LoaderError, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::thread;

/// Independent random streams within one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedStream {
    /// Partition pick order in the producer
    Producer = 1,
    /// Pool pick order in the assembler
    Assembler = 2,
    /// Window order within a partition, keyed by partition ordinal
    Partition = 3,
}

/// Derives a sub-seed for `stream` and `id` from the epoch's base seed.
/// Seed formula: base_seed + (stream << 48) + id
pub fn derive_seed(base_seed: u64, stream: SeedStream, id: usize) -> u64 {
    base_seed
        .wrapping_add((stream as u64) << 48)
        .wrapping_add(id as u64)
}

/// Creates the RNG for `stream` and `id`.
pub fn derive_rng(base_seed: u64, stream: SeedStream, id: usize) -> StdRng {
    StdRng::seed_from_u64(derive_seed(base_seed, stream, id))
}

/// Spawns a named worker thread.
pub(crate) fn spawn_named<F, T>(name: String, body: F) -> Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(body)
        .map_err(|e| LoaderError::internal(format!("Failed to spawn thread {}: {}", name, e)))
}

/// Joins a worker, converting a panic into an `Internal` error.
pub(crate) fn join_named<T>(handle: thread::JoinHandle<T>) -> Result<T> {
    let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
    handle.join().map_err(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        LoaderError::internal(format!("Thread {} panicked: {}", name, reason))
    })
}
