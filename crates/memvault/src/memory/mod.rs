//! Memory records and the operations on them
//!
//! Defines the record shape, the two on-disk schema generations and their
//! normalization, secure info, ranking and retrieval, fuzzy search, access
//! counters, and the service facade that callers use.

pub mod access;
pub mod ranking;
pub mod retrieval;
pub mod schema;
pub mod search;
pub mod secure;
pub mod service;
pub mod stats;
pub mod types;

pub use access::{AccessKind, AccessPattern, AccessTracker};
pub use ranking::RecencyDecay;
pub use retrieval::{RetrievalConfig, RetrievalPipeline, RetrievedMemory};
pub use schema::{CurrentRecord, LegacyRecord, RawRecord, SchemaGeneration, normalize};
pub use search::{FuzzySearch, SearchHit};
pub use secure::{SecureInfoRecord, SecureInfoStore};
pub use service::MemoryService;
pub use stats::MemoryStats;
pub use types::{DEFAULT_KIND, MemoryRecord, NewMemory, SECURE_INFO_ID};
