pub mod eviction;
pub mod files;
pub mod filter;
pub mod index;
pub mod layout;
pub mod tombstone;

pub use eviction::{CapacityStatus, Evictor};
pub use files::{PutMode, PutOutcome, RecordStore, StoreOptions, StoreScan, StoreView};
pub use filter::MemoryFilter;
pub use index::{IndexDrift, IndexEntry, IndexMap, MemoryIndex};
pub use layout::StoreLayout;
pub use tombstone::{Tombstone, TombstoneLog, TombstoneReason};
