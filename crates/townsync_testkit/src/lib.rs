//! # Townsync Testkit
//!
//! Test utilities for Townsync federation.
//!
//! This crate provides:
//! - An in-memory versioned store on a simulated network ([`MemoryVersionedStore`])
//! - Failure injection and call recording for that store
//! - Town fixtures with temporary store paths
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use townsync_storage::{OpContext, VersionedStore};
//! use townsync_testkit::{town_pair, MemoryNetwork};
//!
//! let network = MemoryNetwork::new();
//! let (alpha, beta) = town_pair(&network, "alpha-town", "beta-town");
//! beta.commit_row("issues", "bd-1", "open");
//!
//! let ctx = OpContext::new();
//! alpha.store.add_remote(&ctx, "beta-town", &beta.url()).unwrap();
//! alpha.store.pull(&ctx, "beta-town", None).unwrap();
//! assert_eq!(alpha.store.read("issues", "bd-1").as_deref(), Some("open"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod network;
pub mod store;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::network::MemoryNetwork;
    pub use crate::store::*;
}

pub use fixtures::*;
pub use generators::*;
pub use network::MemoryNetwork;
pub use store::{CommitInfo, MemoryVersionedStore, RecordedCall, StoreOp, DEFAULT_BRANCH};
