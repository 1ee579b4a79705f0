//! # Townsync Sync Engine
//!
//! Federation sync between towns sharing a versioned store.
//!
//! This crate implements the sync orchestrator, the conflict resolver and
//! the status reporter on top of the credential store in `townsync_core`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Federation                   │
//! │  peers · remotes · fetch · pull · push       │
//! ├──────────────────────────────────────────────┤
//! │  SyncEngine          resolver     status     │
//! │  fetch → commit →    (txn with    (ahead /   │
//! │  merge → resolve →    autocommit   behind)   │
//! │  push → record        disabled)              │
//! ├──────────────────────────────────────────────┤
//! │     CredentialStore + CredentialSession      │
//! ├──────────────────────────────────────────────┤
//! │        Catalog          VersionedStore       │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Key Invariants
//!
//! - Remote steps run inside a credential session; the peer's password is
//!   never passed as an argument or logged
//! - A peer with a username but no usable password fails before any remote
//!   call
//! - Fetch, merge and resolution failures are fatal; push failures are not
//! - A failed resolution is rolled back and autocommit is restored
//! - The last sync time is recorded only when a run pulled or resolved
//!   something

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod federation;
mod resolver;
mod state;
mod status;

pub use config::SyncConfig;
pub use error::{SyncError, SyncFailure, SyncResult};
pub use federation::Federation;
pub use resolver::{resolve_merge, MergeTransaction, ResolutionStrategy};
pub use state::{SyncEngine, SyncPhase, SyncReport, SyncStats};
pub use status::{sync_status, SyncStatus, UNKNOWN_COUNT};
