//! src/dataloader/common/mod.rs
//!
//! Utilities shared by the producer, assembler and read-ahead workers:
//! cancellation, stop-aware queue operations, seeding and thread spawning.

pub mod queue;
pub mod thread;
