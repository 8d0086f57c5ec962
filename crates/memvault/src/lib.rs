//! Memvault - durable conversational memory
//!
//! This crate stores conversational facts as one file per record, keeps a
//! summary index for ranking and rotation, reconciles a legacy on-disk
//! schema with the current one, and takes periodic restorable snapshots.

pub mod backup;
pub mod clock;
pub mod config;
pub mod error;
pub mod memory;
pub mod storage;
pub mod testing;

pub use error::MemvaultError;
pub use memory::MemoryService;
