//! # Townsync Core
//!
//! Machine-scoped peer credentials for Townsync federation.
//!
//! This crate provides:
//! - Credential encryption keyed by the local store path ([`crypto`])
//! - Peer name validation and the effective peer view ([`peer`])
//! - Machine identity ([`identity`])
//! - The credential overlay store with lazy legacy migration
//!   ([`CredentialStore`])
//! - Process-wide ambient credential sessions ([`session`])
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use townsync_core::{CredentialStore, FederationConfig, PeerRegistration};
//! use townsync_storage::{MemoryCatalog, OpContext};
//!
//! let creds = CredentialStore::open(catalog, store, &store_path, FederationConfig::default());
//! let ctx = OpContext::new();
//! creds.add_peer(&ctx, &PeerRegistration::new("hub", "http://hub:50051/db")
//!     .with_credentials("sync", "s3cret"))?;
//!
//! creds.with_peer_credentials(&ctx, "hub", |user| store.fetch(&ctx, "hub", user))?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod peer;
pub mod session;

pub use config::FederationConfig;
pub use credentials::CredentialStore;
pub use crypto::{CipherError, CredentialCipher, CredentialKey};
pub use error::{CoreError, CoreResult};
pub use identity::StoreIdentity;
pub use peer::{validate_peer_name, Peer, PeerRegistration, MAX_PEER_NAME_LEN};
pub use session::{with_credentials, AmbientChannel, CredentialSession, EnvChannel};
