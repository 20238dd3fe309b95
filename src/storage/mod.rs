//! Storage backends for the resolution ledger.
//!
//! [`traits`] defines the abstract store interface; [`InMemoryStore`] is the
//! always-available backend and the `persistent` feature adds a WAL-backed
//! one with the same semantics.

mod memory;
mod state;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryStore;
pub use traits::{DedupeStore, LedgerSnapshot, StorageError};
