//! # Group Mapping Provisioning
//!
//! Reconciles external group membership into the target directory.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌──────────────────┐
//! │  providers.* │────►│ Provider       │────►│ MappingRegistry  │
//! │ configuration│     │ registry       │     │ (snapshot swap)  │
//! └──────────────┘     └────────────────┘     └────────┬─────────┘
//!                                                      │
//!                      ┌────────────────┐              ▼
//!                      │ Group resolver │◄──── GroupMappingUpdater
//!                      └────────────────┘              │
//!                                                      ▼
//!                                             ┌──────────────────┐
//!                                             │ TargetDirectory  │
//!                                             └──────────────────┘
//! ```
//!
//! Membership is only ever added. Users are created with the configured
//! initial credential, groups are created only when at least one member
//! resolved.
//!
//! ## Example
//!
//! ```ignore
//! use dirsync_provisioning::{build_mapping_units, GroupMappingUpdater, MappingRegistry, UpdaterConfig};
//!
//! let units = build_mapping_units(&config, &resolvers)?;
//! let mappings = Arc::new(MappingRegistry::new(units));
//! let updater = GroupMappingUpdater::new(mappings, target, UpdaterConfig::from_configuration(&config)?);
//!
//! updater.start().await;
//! // ...
//! updater.stop().await;
//! ```

pub mod directory;
pub mod mapping;
pub mod reconcile;
pub mod registry;
pub mod updater;

// Re-exports for convenience
pub use directory::InMemoryDirectory;
pub use mapping::{MappingRegistry, MappingSnapshot, MappingUnit};
pub use reconcile::{reconcile_units, CycleReport, ReconcileError};
pub use registry::{build_mapping_units, reload_mapping_units, DEFAULT_SELECTOR};
pub use updater::{GroupMappingUpdater, UpdaterConfig, UpdaterState, INSECURE_PLACEHOLDER_PASSWORD};
