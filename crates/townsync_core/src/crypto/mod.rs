//! Credential encryption for federation peers.
//!
//! Peer passwords are persisted only as AES-256-GCM ciphertext.
//!
//! ## Security Model
//!
//! - Uses AES-256-GCM for authenticated encryption
//! - Unique random nonce per encryption, prepended to the ciphertext
//! - The key is derived from the resolved local store path and a versioned
//!   domain tag; it is never persisted
//! - Keys are zeroized on drop
//!
//! Moving a store to another path invalidates its stored credentials; peers
//! must then be registered again on that machine.
//!
//! ## Usage
//!
//! ```
//! use std::path::Path;
//! use townsync_core::crypto::{CredentialCipher, CredentialKey};
//!
//! let key = CredentialKey::derive(Path::new("/srv/town/.db"), "townsync-federation-key-v1");
//! let cipher = CredentialCipher::new(&key);
//!
//! let ciphertext = cipher.encrypt("hunter2").unwrap();
//! assert_eq!(cipher.decrypt(&ciphertext).unwrap(), "hunter2");
//! ```

mod cipher;

pub use cipher::{CipherError, CredentialCipher, CredentialKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
