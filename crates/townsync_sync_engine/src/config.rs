//! Configuration for the sync engine.

use crate::resolver::ResolutionStrategy;

/// Configuration for sync operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Local branch that is merged into and pushed.
    pub branch: String,
    /// Strategy used when a caller does not name one.
    pub default_strategy: ResolutionStrategy,
    /// Prefix of the shared metadata key recording the last sync per peer.
    pub last_sync_key_prefix: String,
    /// Message of the commit taken before merging. `{peer}` is substituted.
    pub pre_merge_message: String,
    /// Message of a resolved merge commit. `{peer}`, `{ref}` and
    /// `{strategy}` are substituted.
    pub merge_message: String,
}

impl SyncConfig {
    /// Creates a new sync configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the branch.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Sets the default resolution strategy.
    #[must_use]
    pub fn with_default_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Sets the last-sync metadata key prefix.
    #[must_use]
    pub fn with_last_sync_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.last_sync_key_prefix = prefix.into();
        self
    }

    /// Sets the pre-merge commit message template.
    #[must_use]
    pub fn with_pre_merge_message(mut self, template: impl Into<String>) -> Self {
        self.pre_merge_message = template.into();
        self
    }

    /// Sets the merge commit message template.
    #[must_use]
    pub fn with_merge_message(mut self, template: impl Into<String>) -> Self {
        self.merge_message = template.into();
        self
    }

    /// Returns the remote-tracking ref of a peer's branch.
    pub fn remote_ref(&self, peer: &str) -> String {
        format!("{peer}/{}", self.branch)
    }

    /// Returns the metadata key of a peer's last sync.
    pub fn last_sync_key(&self, peer: &str) -> String {
        format!("{}{peer}", self.last_sync_key_prefix)
    }

    /// Renders the pre-merge commit message.
    pub fn render_pre_merge_message(&self, peer: &str) -> String {
        self.pre_merge_message.replace("{peer}", peer)
    }

    /// Renders the merge commit message.
    pub fn render_merge_message(&self, peer: &str, strategy: &ResolutionStrategy) -> String {
        self.merge_message
            .replace("{peer}", peer)
            .replace("{ref}", &self.remote_ref(peer))
            .replace("{strategy}", strategy.as_str())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            branch: "main".to_string(),
            default_strategy: ResolutionStrategy::Ours,
            last_sync_key_prefix: "last_sync_".to_string(),
            pre_merge_message: "Pre-merge commit for federation sync with {peer}".to_string(),
            merge_message: "Federation merge of {ref} (conflicts resolved: {strategy})"
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.branch, "main");
        assert_eq!(config.default_strategy, ResolutionStrategy::Ours);
        assert_eq!(config.remote_ref("beta-town"), "beta-town/main");
        assert_eq!(config.last_sync_key("beta-town"), "last_sync_beta-town");
    }

    #[test]
    fn builder_pattern() {
        let config = SyncConfig::new()
            .with_branch("trunk")
            .with_default_strategy(ResolutionStrategy::Theirs)
            .with_last_sync_key_prefix("synced:");

        assert_eq!(config.remote_ref("hub"), "hub/trunk");
        assert_eq!(config.last_sync_key("hub"), "synced:hub");
        assert_eq!(config.default_strategy, ResolutionStrategy::Theirs);
    }

    #[test]
    fn messages_are_rendered() {
        let config = SyncConfig::default();
        assert_eq!(
            config.render_pre_merge_message("hub"),
            "Pre-merge commit for federation sync with hub"
        );
        assert_eq!(
            config.render_merge_message("hub", &ResolutionStrategy::Theirs),
            "Federation merge of hub/main (conflicts resolved: theirs)"
        );
    }
}
