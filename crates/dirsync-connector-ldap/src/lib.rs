//! # LDAP Group Resolver
//!
//! LDAP/Active Directory resolver and LDAP target directory for dirsync.
//!
//! ## Features
//!
//! - Group lookup by name with a configurable filter and name attribute
//! - Usernames taken from the leftmost `cn` of each member DN
//! - LDAPS with an optional PKCS#12 client identity
//! - Cached session, dropped and retried on transport failures
//!
//! ## Example
//!
//! ```ignore
//! use dirsync_connector::prelude::*;
//! use dirsync_connector_ldap::LdapGroupResolver;
//!
//! let config = Configuration::new()
//!     .with("url", "ldap://dc1.corp.local:389")
//!     .with("base", "dc=corp,dc=local")
//!     .with("bind.user", "cn=svc-sync,ou=service,dc=corp,dc=local")
//!     .with("bind.password.file", "/run/secrets/ldap");
//!
//! let resolver = LdapGroupResolver::configure(&config)?;
//! let users = resolver.get_members("eng").await;
//! ```

pub mod config;
pub mod resolver;
pub mod session;
pub mod writer;

// Re-exports
pub use config::{ConnectionSettings, LdapSettings, TargetSettings};
pub use resolver::{ldap_resolver_factory, register, LdapGroupResolver, RESOLVER_TYPE};
pub use session::{DirectorySession, Ldap3Session, Ldap3SessionFactory, SessionFactory};
pub use writer::LdapTargetDirectory;
