//! Mapping units and the swappable mapping snapshot.

use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::info;

use dirsync_connector::registry::BoxedResolver;

/// One provider: the groups to synchronize and the resolver that reads them.
#[derive(Clone)]
pub struct MappingUnit {
    pub provider_name: String,
    pub group_names: Vec<String>,
    pub resolver: BoxedResolver,
}

impl MappingUnit {
    pub fn new(
        provider_name: impl Into<String>,
        group_names: Vec<String>,
        resolver: BoxedResolver,
    ) -> Self {
        Self {
            provider_name: provider_name.into(),
            group_names,
            resolver,
        }
    }
}

impl fmt::Debug for MappingUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingUnit")
            .field("provider_name", &self.provider_name)
            .field("group_names", &self.group_names)
            .field("resolver", &self.resolver.display_name())
            .finish()
    }
}

/// Immutable list of units used for one whole cycle.
pub type MappingSnapshot = Arc<Vec<MappingUnit>>;

/// Holds the current snapshot. Replacing it never affects a cycle that
/// already took its snapshot.
#[derive(Debug, Default)]
pub struct MappingRegistry {
    current: RwLock<MappingSnapshot>,
}

impl MappingRegistry {
    #[must_use]
    pub fn new(units: Vec<MappingUnit>) -> Self {
        Self {
            current: RwLock::new(Arc::new(units)),
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> MappingSnapshot {
        let guard = self
            .current
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Swap in a new set of units and return the previous snapshot.
    pub fn replace(&self, units: Vec<MappingUnit>) -> MappingSnapshot {
        let next = Arc::new(units);
        info!(
            providers = next.len(),
            groups = next.iter().map(|u| u.group_names.len()).sum::<usize>(),
            "Replacing mapping snapshot"
        );
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        std::mem::replace(&mut *guard, next)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}
