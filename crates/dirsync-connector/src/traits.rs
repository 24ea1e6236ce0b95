//! Connector Framework traits
//!
//! The two seams of the synchronization core: a [`GroupResolver`] reads
//! membership from an external source, a [`TargetDirectory`] applies it.

use async_trait::async_trait;

use crate::error::ConnectorResult;

/// Resolves an external group name to the usernames of its members.
#[async_trait]
pub trait GroupResolver: Send + Sync {
    /// Selector this resolver was registered under (e.g. `"ldap"`).
    fn resolver_type(&self) -> &str;

    /// Display name for logs.
    fn display_name(&self) -> &str;

    /// Get the usernames belonging to `group`.
    ///
    /// Never fails. An empty result means either that the group has no
    /// resolvable members or that resolution failed; only the logs tell
    /// the two apart.
    async fn get_members(&self, group: &str) -> Vec<String>;

    /// Release cached connections.
    async fn dispose(&self) -> ConnectorResult<()> {
        Ok(())
    }
}

/// Capability interface of the directory that receives membership.
///
/// Every mutating call is expected to be preceded by the matching check,
/// which keeps a reconciliation cycle idempotent.
#[async_trait]
pub trait TargetDirectory: Send + Sync {
    /// Readiness gate, polled before the first cycle.
    async fn is_started(&self) -> bool;

    /// Whether a group with this name exists.
    async fn group_exists(&self, group: &str) -> ConnectorResult<bool>;

    /// Create an empty group.
    async fn create_group(&self, group: &str) -> ConnectorResult<()>;

    /// Whether a user with this name exists.
    async fn user_exists(&self, user: &str) -> ConnectorResult<bool>;

    /// Create a user with an initial credential.
    async fn create_user(&self, user: &str, credential: &str) -> ConnectorResult<()>;

    /// Whether `user` is a member of `group`.
    async fn is_member(&self, user: &str, group: &str) -> ConnectorResult<bool>;

    /// Add `user` to `group`.
    async fn add_member(&self, user: &str, group: &str) -> ConnectorResult<()>;
}
