//! # Townsync Storage
//!
//! The storage boundary of Townsync federation.
//!
//! This crate holds the two seams the federation subsystem talks through:
//!
//! - [`VersionedStore`] - the external versioned store that performs fetch,
//!   merge, commit and push. Townsync never diffs or merges data itself.
//! - [`Catalog`] - the three logical tables federation owns inside the store:
//!   shared peers, machine-scoped peer auth overlays and a key/value metadata
//!   table.
//!
//! ## Available Catalogs
//!
//! - [`MemoryCatalog`] - For testing and ephemeral stores
//! - [`FileCatalog`] - CBOR snapshot on disk, guarded by an advisory lock
//!
//! ## Example
//!
//! ```rust
//! use townsync_storage::{Catalog, MemoryCatalog};
//!
//! let catalog = MemoryCatalog::new();
//! catalog.upsert_peer("alpha-town", "http://alpha:50051/db", "T1").unwrap();
//! assert_eq!(catalog.peer("alpha-town").unwrap().unwrap().sovereignty, "T1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod context;
mod error;
mod file;
mod memory;
mod types;
mod versioned;

pub use catalog::{Catalog, LegacyPeerAuth, PeerAuthRecord, PeerAuthUpdate, PeerRecord};
pub use context::{ContextError, OpContext};
pub use error::{StorageError, StorageResult, StoreError, StoreResult};
pub use file::FileCatalog;
pub use memory::MemoryCatalog;
pub use types::Timestamp;
pub use versioned::{Conflict, HistoryDivergence, PositionMarker, RemoteInfo, VersionedStore};
