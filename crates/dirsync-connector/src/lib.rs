//! # Directory Sync Connector Framework
//!
//! Core abstractions shared by the group resolvers and the reconciliation
//! engine.
//!
//! - [`config`] - Flat string-keyed configuration with provider scoping
//! - [`error`] - Error types with transient/permanent classification
//! - [`traits`] - [`GroupResolver`](traits::GroupResolver) and
//!   [`TargetDirectory`](traits::TargetDirectory)
//! - [`registry`] - Resolver factories keyed by selector
//! - [`resilience`] - Retry executor for transport failures
//! - [`dn`] - Distinguished name parsing and escaping
//! - [`types`] - Membership snapshots
//!
//! ## Example
//!
//! ```ignore
//! use dirsync_connector::prelude::*;
//!
//! let mut registry = ResolverRegistry::new();
//! registry.register_factory("ldap", ldap_factory);
//!
//! let scoped = config.scoped("providers", "corp");
//! let resolver = registry.create(scoped.get_or("impl", "ldap"), &scoped)?;
//! let users = resolver.get_members("eng").await;
//! ```

pub mod config;
pub mod dn;
pub mod error;
pub mod registry;
pub mod resilience;
pub mod traits;
pub mod types;

/// Prelude module for convenient imports.
///
/// ```
/// use dirsync_connector::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::Configuration;
    pub use crate::dn::{escape_dn_value, escape_filter_value, leaf_common_name, DistinguishedName};
    pub use crate::error::{ConnectorError, ConnectorResult};
    pub use crate::registry::{BoxedResolver, ResolverFactory, ResolverRegistry};
    pub use crate::resilience::{RetryConfig, RetryExecutor, RECONNECT_ATTEMPTS};
    pub use crate::traits::{GroupResolver, TargetDirectory};
    pub use crate::types::ResolvedMembership;
}

// Re-export async_trait for resolver implementors
pub use async_trait::async_trait;

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _config = Configuration::new().with("url", "ldap://localhost:10389");
        let _registry = ResolverRegistry::new();
        let _retry = RetryExecutor::with_defaults();
        let _membership = ResolvedMembership::new("eng", Vec::new());
        assert_eq!(
            leaf_common_name("cn=alice,dc=example").unwrap().as_deref(),
            Some("alice")
        );
    }
}
