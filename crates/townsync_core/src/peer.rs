//! Peer names, registrations and the effective peer view.

use crate::error::{CoreError, CoreResult};
use std::fmt;
use townsync_storage::Timestamp;

/// Maximum length of a peer name, in bytes.
pub const MAX_PEER_NAME_LEN: usize = 64;

/// Validates a peer name.
///
/// A name is 1 to 64 characters, starts with an ASCII letter and continues
/// with ASCII letters, digits, `_` or `-`. Names end up in remote-naming
/// commands and identifiers, so nothing else is allowed through.
///
/// # Errors
///
/// Returns [`CoreError::InvalidPeerName`] naming the broken rule.
pub fn validate_peer_name(name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::invalid_peer_name(name, "name is empty"));
    }
    if name.len() > MAX_PEER_NAME_LEN {
        return Err(CoreError::invalid_peer_name(name, "name exceeds 64 characters"));
    }

    let mut chars = name.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return Err(CoreError::invalid_peer_name(name, "name must start with a letter"));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(CoreError::invalid_peer_name(
            name,
            "name may only contain letters, digits, '_' and '-'",
        ));
    }
    Ok(())
}

/// Input to [`CredentialStore::add_peer`](crate::CredentialStore::add_peer).
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PeerRegistration {
    /// Peer name.
    pub name: String,
    /// Remote URL.
    pub remote_url: String,
    /// Sovereignty tag.
    pub sovereignty: String,
    /// Username, empty for none.
    pub username: String,
    /// Plaintext password, empty for none.
    pub password: String,
}

impl PeerRegistration {
    /// Creates a registration without credentials.
    pub fn new(name: impl Into<String>, remote_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            remote_url: remote_url.into(),
            ..Self::default()
        }
    }

    /// Sets the sovereignty tag.
    #[must_use]
    pub fn with_sovereignty(mut self, sovereignty: impl Into<String>) -> Self {
        self.sovereignty = sovereignty.into();
        self
    }

    /// Sets the credentials.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }
}

impl fmt::Debug for PeerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerRegistration")
            .field("name", &self.name)
            .field("remote_url", &self.remote_url)
            .field("sovereignty", &self.sovereignty)
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .finish()
    }
}

/// The effective view of a peer on this machine.
///
/// Built at read time by laying this machine's auth overlay over the shared
/// peer row. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Peer {
    /// Peer name.
    pub name: String,
    /// Effective remote URL.
    pub remote_url: String,
    /// Sovereignty tag.
    pub sovereignty: String,
    /// Effective username, empty for none.
    pub username: String,
    /// Decrypted password, empty when there is no usable credential.
    pub password: String,
    /// Last sync on this machine.
    pub last_sync: Option<Timestamp>,
    /// Shared row creation time.
    pub created_at: Timestamp,
    /// Shared row update time.
    pub updated_at: Timestamp,
}

impl Peer {
    /// Returns true if the peer declares a username.
    #[must_use]
    pub fn has_username(&self) -> bool {
        !self.username.is_empty()
    }

    /// Returns true if both username and password are present.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// Username as an option, for the `--user` argument.
    #[must_use]
    pub fn username_arg(&self) -> Option<&str> {
        if self.username.is_empty() {
            None
        } else {
            Some(&self.username)
        }
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("name", &self.name)
            .field("remote_url", &self.remote_url)
            .field("sovereignty", &self.sovereignty)
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .field("last_sync", &self.last_sync)
            .finish_non_exhaustive()
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "[REDACTED]"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use townsync_testkit::generators::{invalid_peer_name_strategy, peer_name_strategy};

    #[test]
    fn accepts_valid_names() {
        for name in ["abc-123_x", "a", "Beta-town", "hub_01"] {
            assert!(validate_peer_name(name).is_ok(), "{name} should be valid");
        }
        assert!(validate_peer_name(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn rejects_invalid_names() {
        let long = "a".repeat(65);
        for name in ["1abc", "", long.as_str(), "abc;rm", "-abc", "_abc", "ab c", "ab/c", "été"] {
            let err = validate_peer_name(name).unwrap_err();
            assert!(err.is_validation(), "{name:?} should be rejected");
        }
    }

    #[test]
    fn error_names_the_rule() {
        let err = validate_peer_name("1abc").unwrap_err();
        assert!(err.to_string().contains("start with a letter"));
    }

    #[test]
    fn debug_redacts_password() {
        let reg = PeerRegistration::new("hub", "http://hub/db").with_credentials("u", "s3cret");
        let rendered = format!("{reg:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn username_arg() {
        let mut peer = Peer {
            name: "hub".into(),
            remote_url: "http://hub/db".into(),
            sovereignty: String::new(),
            username: String::new(),
            password: String::new(),
            last_sync: None,
            created_at: Timestamp::from_millis(1),
            updated_at: Timestamp::from_millis(1),
        };
        assert_eq!(peer.username_arg(), None);
        assert!(!peer.has_credentials());

        peer.username = "u".into();
        assert_eq!(peer.username_arg(), Some("u"));
        assert!(peer.has_username());
        assert!(!peer.has_credentials());

        peer.password = "p".into();
        assert!(peer.has_credentials());
        assert!(!format!("{peer:?}").contains("\"p\""));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn generated_valid_names_pass(name in peer_name_strategy()) {
            prop_assert!(validate_peer_name(&name).is_ok());
        }

        #[test]
        fn generated_invalid_names_fail(name in invalid_peer_name_strategy()) {
            prop_assert!(validate_peer_name(&name).is_err());
        }
    }
}
