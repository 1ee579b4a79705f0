//! Ambient credential sessions.
//!
//! The versioned store reads remote credentials from process-wide state (the
//! environment), which cannot be partitioned between concurrent callers. A
//! [`CredentialSession`] is the only way credentials get there:
//!
//! - A credentialed session holds the write half of one process-wide lock, so
//!   at most one credentialed remote operation is in flight per process.
//! - A session without credentials holds the read half: such sessions run
//!   concurrently with each other but never alongside a credentialed one.
//! - Dropping a session clears the ambient values first and releases the lock
//!   second, on every exit path including unwinding.
//!
//! Sessions must not be nested on one thread; the lock is not reentrant.

use crate::config::FederationConfig;
use crate::error::CoreResult;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use townsync_storage::OpContext;
use tracing::debug;

static CREDENTIAL_LOCK: RwLock<()> = parking_lot::const_rwlock(());

/// The process-wide channel the versioned store reads credentials from.
pub trait AmbientChannel: Send + Sync {
    /// Makes credentials visible to the versioned store.
    fn install(&self, username: &str, password: &str);

    /// Removes any installed credentials.
    fn clear(&self);
}

/// Ambient channel backed by two process environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvChannel {
    user_var: String,
    password_var: String,
}

impl EnvChannel {
    /// Creates a channel over the given variable names.
    pub fn new(user_var: impl Into<String>, password_var: impl Into<String>) -> Self {
        Self {
            user_var: user_var.into(),
            password_var: password_var.into(),
        }
    }

    /// Creates a channel over the configured variable names.
    #[must_use]
    pub fn from_config(config: &FederationConfig) -> Self {
        Self::new(&config.user_env_var, &config.password_env_var)
    }

    /// Returns the username variable name.
    #[must_use]
    pub fn user_var(&self) -> &str {
        &self.user_var
    }

    /// Returns the password variable name.
    #[must_use]
    pub fn password_var(&self) -> &str {
        &self.password_var
    }
}

impl Default for EnvChannel {
    fn default() -> Self {
        Self::from_config(&FederationConfig::default())
    }
}

impl AmbientChannel for EnvChannel {
    fn install(&self, username: &str, password: &str) {
        std::env::set_var(&self.user_var, username);
        std::env::set_var(&self.password_var, password);
    }

    fn clear(&self) {
        std::env::remove_var(&self.user_var);
        std::env::remove_var(&self.password_var);
    }
}

// Held only for its Drop.
#[allow(dead_code)]
enum SessionGuard {
    Exclusive(RwLockWriteGuard<'static, ()>),
    Shared(RwLockReadGuard<'static, ()>),
}

/// Scoped exposure of credentials on the ambient channel.
///
/// See the [module documentation](self) for the locking rules.
pub struct CredentialSession<'a> {
    channel: &'a dyn AmbientChannel,
    installed: bool,
    // Dropped after `Drop::drop` has cleared the channel.
    _guard: SessionGuard,
}

impl<'a> CredentialSession<'a> {
    /// Opens a session.
    ///
    /// Credentials are installed only when both `username` and `password` are
    /// non-empty; otherwise the session is shared and touches nothing.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::Cancelled`](crate::CoreError::Cancelled) or
    /// [`CoreError::DeadlineExceeded`](crate::CoreError::DeadlineExceeded)
    /// without taking the lock or installing anything.
    pub fn open(
        ctx: &OpContext,
        channel: &'a dyn AmbientChannel,
        username: &str,
        password: &str,
    ) -> CoreResult<Self> {
        ctx.check()?;

        if username.is_empty() || password.is_empty() {
            let guard = CREDENTIAL_LOCK.read();
            return Ok(Self {
                channel,
                installed: false,
                _guard: SessionGuard::Shared(guard),
            });
        }

        let guard = CREDENTIAL_LOCK.write();
        // The context may have expired while waiting for the lock.
        ctx.check()?;
        channel.install(username, password);
        debug!(username = %username, "installed ambient credentials");

        Ok(Self {
            channel,
            installed: true,
            _guard: SessionGuard::Exclusive(guard),
        })
    }

    /// Returns true if this session installed credentials.
    #[must_use]
    pub fn is_credentialed(&self) -> bool {
        self.installed
    }
}

impl Drop for CredentialSession<'_> {
    fn drop(&mut self) {
        if self.installed {
            self.channel.clear();
            debug!("cleared ambient credentials");
        }
    }
}

impl std::fmt::Debug for CredentialSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSession")
            .field("installed", &self.installed)
            .finish_non_exhaustive()
    }
}

/// Runs `body` inside a [`CredentialSession`].
///
/// # Errors
///
/// Returns the session's open error or `body`'s own error.
pub fn with_credentials<T, E>(
    ctx: &OpContext,
    channel: &dyn AmbientChannel,
    username: &str,
    password: &str,
    body: impl FnOnce() -> Result<T, E>,
) -> Result<T, E>
where
    E: From<crate::CoreError>,
{
    let _session = CredentialSession::open(ctx, channel, username, password)?;
    body()
}
