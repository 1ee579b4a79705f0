//! Federation configuration.

/// Default name of the ambient username variable.
pub const DEFAULT_USER_ENV_VAR: &str = "TOWN_REMOTE_USER";
/// Default name of the ambient password variable.
pub const DEFAULT_PASSWORD_ENV_VAR: &str = "TOWN_REMOTE_PASSWORD";

/// Configuration for the credential subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederationConfig {
    /// Ambient variable the store reads the remote username from.
    pub user_env_var: String,

    /// Ambient variable the store reads the remote password from.
    pub password_env_var: String,

    /// Command named in the missing-credential remediation message.
    pub add_peer_command: String,

    /// Domain separation tag for credential key derivation.
    pub key_domain: String,

    /// Domain separation tag for machine identifiers.
    pub machine_domain: String,

    /// Host name used when the real one cannot be read.
    pub fallback_host: String,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            user_env_var: DEFAULT_USER_ENV_VAR.to_string(),
            password_env_var: DEFAULT_PASSWORD_ENV_VAR.to_string(),
            add_peer_command: "town federation add-peer".to_string(),
            key_domain: "townsync-federation-key-v1".to_string(),
            machine_domain: "townsync-federation-machine-v1".to_string(),
            fallback_host: "unknown-host".to_string(),
        }
    }
}

impl FederationConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the ambient credential variable names.
    #[must_use]
    pub fn with_env_vars(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user_env_var = user.into();
        self.password_env_var = password.into();
        self
    }

    /// Sets the remediation command.
    #[must_use]
    pub fn with_add_peer_command(mut self, command: impl Into<String>) -> Self {
        self.add_peer_command = command.into();
        self
    }

    /// Sets the host name fallback.
    #[must_use]
    pub fn with_fallback_host(mut self, host: impl Into<String>) -> Self {
        self.fallback_host = host.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = FederationConfig::default();
        assert_eq!(config.user_env_var, "TOWN_REMOTE_USER");
        assert_eq!(config.password_env_var, "TOWN_REMOTE_PASSWORD");
        assert!(config.key_domain.ends_with("-v1"));
        assert_ne!(config.key_domain, config.machine_domain);
    }

    #[test]
    fn builder_pattern() {
        let config = FederationConfig::new()
            .with_env_vars("U", "P")
            .with_add_peer_command("townctl peers add")
            .with_fallback_host("nowhere");

        assert_eq!(config.user_env_var, "U");
        assert_eq!(config.password_env_var, "P");
        assert_eq!(config.add_peer_command, "townctl peers add");
        assert_eq!(config.fallback_host, "nowhere");
    }
}
