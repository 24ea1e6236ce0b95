//! Provider registry
//!
//! Builds mapping units from the `providers` list of the configuration.

use tracing::{debug, info, instrument};

use dirsync_connector::config::Configuration;
use dirsync_connector::error::{ConnectorError, ConnectorResult};
use dirsync_connector::registry::ResolverRegistry;

use crate::mapping::{MappingRegistry, MappingUnit};

/// Key listing provider names.
pub const PROVIDERS_KEY: &str = "providers";
/// Per-provider key selecting the resolver implementation.
pub const IMPL_KEY: &str = "impl";
/// Per-provider key listing the groups to synchronize.
pub const GROUPS_KEY: &str = "groups";
/// Selector used when a provider names no implementation.
pub const DEFAULT_SELECTOR: &str = "ldap";

/// Build one mapping unit per listed provider, in listed order.
///
/// Any resolver construction failure aborts the whole build.
#[instrument(skip_all)]
pub fn build_mapping_units(
    config: &Configuration,
    resolvers: &ResolverRegistry,
) -> ConnectorResult<Vec<MappingUnit>> {
    let providers = config.get_tokens(PROVIDERS_KEY);
    if providers.is_empty() {
        info!("No providers configured");
        return Ok(Vec::new());
    }

    // A dotted name would make one provider's keys a prefix of another's.
    if let Some(name) = providers.iter().find(|name| name.contains('.')) {
        return Err(ConnectorError::invalid_configuration(format!(
            "provider name '{name}' must not contain '.'"
        )));
    }

    let mut units = Vec::with_capacity(providers.len());
    for name in providers {
        let derived = config.scoped(PROVIDERS_KEY, &name);
        let selector = derived
            .get(IMPL_KEY)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SELECTOR)
            .to_string();

        let resolver = resolvers.create(&selector, &derived)?;
        let groups = derived.get_strings(GROUPS_KEY);

        debug!(
            provider = %name,
            selector = %selector,
            groups = groups.len(),
            "Built mapping unit"
        );
        units.push(MappingUnit::new(name, groups, resolver));
    }

    info!(providers = units.len(), "Mapping units built");
    Ok(units)
}

/// Rebuild the units and swap them in. On failure the current snapshot
/// stays in place.
pub fn reload_mapping_units(
    mappings: &MappingRegistry,
    config: &Configuration,
    resolvers: &ResolverRegistry,
) -> ConnectorResult<usize> {
    let units = build_mapping_units(config, resolvers)?;
    let count = units.len();
    mappings.replace(units);
    Ok(count)
}
