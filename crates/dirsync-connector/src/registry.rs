//! Resolver factory registry
//!
//! Maps a configuration selector (the value of `providers.<name>.impl`) to
//! a constructor. Lookup fails closed: an unknown selector is a
//! configuration error, never a silent fallback.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::Configuration;
use crate::error::{ConnectorError, ConnectorResult};
use crate::traits::GroupResolver;

/// Shared, type-erased resolver.
pub type BoxedResolver = Arc<dyn GroupResolver>;

/// Constructor for a resolver from its scoped configuration.
pub type ResolverFactory =
    Arc<dyn Fn(&Configuration) -> ConnectorResult<BoxedResolver> + Send + Sync>;

/// Registry of resolver factories keyed by selector.
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    factories: HashMap<String, ResolverFactory>,
}

impl fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("selectors", &self.selectors())
            .finish()
    }
}

impl ResolverRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one under the same selector.
    ///
    /// Selectors are case-insensitive.
    pub fn register_factory<F>(&mut self, selector: &str, factory: F)
    where
        F: Fn(&Configuration) -> ConnectorResult<BoxedResolver> + Send + Sync + 'static,
    {
        debug!(selector = %selector, "Registering resolver factory");
        self.factories
            .insert(selector.to_ascii_lowercase(), Arc::new(factory));
    }

    /// Builder-style [`ResolverRegistry::register_factory`].
    #[must_use]
    pub fn with_factory<F>(mut self, selector: &str, factory: F) -> Self
    where
        F: Fn(&Configuration) -> ConnectorResult<BoxedResolver> + Send + Sync + 'static,
    {
        self.register_factory(selector, factory);
        self
    }

    /// Whether a factory is registered for `selector`.
    #[must_use]
    pub fn contains(&self, selector: &str) -> bool {
        self.factories
            .contains_key(&selector.trim().to_ascii_lowercase())
    }

    /// Registered selectors, sorted.
    #[must_use]
    pub fn selectors(&self) -> Vec<String> {
        let mut selectors: Vec<String> = self.factories.keys().cloned().collect();
        selectors.sort();
        selectors
    }

    /// Construct a resolver for `selector` from its scoped configuration.
    pub fn create(&self, selector: &str, config: &Configuration) -> ConnectorResult<BoxedResolver> {
        let key = selector.trim().to_ascii_lowercase();
        let Some(factory) = self.factories.get(&key) else {
            return Err(ConnectorError::UnsupportedResolver {
                selector: selector.to_string(),
            });
        };
        factory(config)
    }
}
