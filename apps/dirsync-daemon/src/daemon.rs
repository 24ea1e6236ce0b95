//! Daemon wiring: configuration loading, target selection, reload and
//! signal handling.

use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, warn};

use dirsync_connector::config::Configuration;
use dirsync_connector::registry::ResolverRegistry;
use dirsync_connector::traits::TargetDirectory;
use dirsync_connector_ldap::LdapTargetDirectory;
use dirsync_provisioning::{reload_mapping_units, InMemoryDirectory, MappingRegistry};

use crate::cli::Cli;
use crate::error::{DaemonError, DaemonResult};

/// Key selecting the target directory implementation.
pub const TARGET_KIND_KEY: &str = "target.kind";

/// Read the layered configuration named on the command line.
pub fn load_configuration(cli: &Cli) -> DaemonResult<Configuration> {
    let default = cli.default_config.as_path();
    Configuration::load(Some(default), &cli.config).map_err(DaemonError::from)
}

/// Registry with every built-in resolver.
pub fn resolver_registry() -> ResolverRegistry {
    let mut registry = ResolverRegistry::new();
    dirsync_connector_ldap::register(&mut registry);
    registry
}

/// Build the target directory selected by `target.kind` (default `ldap`).
pub fn build_target(config: &Configuration) -> DaemonResult<Arc<dyn TargetDirectory>> {
    let kind = config
        .get_or(TARGET_KIND_KEY, "ldap")
        .trim()
        .to_ascii_lowercase();
    match kind.as_str() {
        "ldap" => Ok(Arc::new(LdapTargetDirectory::configure(config)?)),
        "memory" => {
            warn!("Using the in-memory target directory, changes are not persisted");
            Ok(Arc::new(InMemoryDirectory::new()))
        }
        _ => Err(DaemonError::UnsupportedTarget { kind }),
    }
}

/// Re-read configuration and swap in rebuilt mapping units. A failure
/// leaves the current units in place.
pub fn reload(cli: &Cli, mappings: &MappingRegistry, resolvers: &ResolverRegistry) {
    let result = load_configuration(cli).and_then(|config| {
        reload_mapping_units(mappings, &config, resolvers).map_err(DaemonError::from)
    });
    match result {
        Ok(providers) => info!(providers, "Mapping units reloaded"),
        Err(e) => error!(error = %e, "Reload failed, keeping current mapping units"),
    }
}

/// SIGHUP listener. Never fires where SIGHUP is unavailable.
pub struct ReloadSignal {
    #[cfg(unix)]
    hangup: Option<signal::unix::Signal>,
}

impl ReloadSignal {
    pub fn install() -> Self {
        #[cfg(unix)]
        let hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                error!("Failed to install SIGHUP handler: {e}");
                None
            }
        };

        Self {
            #[cfg(unix)]
            hangup,
        }
    }

    /// Wait for the next SIGHUP.
    pub async fn recv(&mut self) {
        #[cfg(unix)]
        let fired = match self.hangup.as_mut() {
            Some(hangup) => hangup.recv().await.is_some(),
            None => false,
        };
        #[cfg(not(unix))]
        let fired = false;

        if !fired {
            std::future::pending::<()>().await;
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn cli_with(default_config: PathBuf, config: Vec<PathBuf>) -> Cli {
        Cli {
            default_config,
            config,
            once: false,
            log_filter: "info".to_string(),
        }
    }

    fn toml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut builder = tempfile::Builder::new();
        let mut file = builder.suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_registry_has_ldap() {
        assert!(resolver_registry().contains("ldap"));
        assert!(resolver_registry().contains("LDAP"));
    }

    #[test]
    fn test_memory_target() {
        let config = Configuration::new().with(TARGET_KIND_KEY, "Memory");
        assert!(build_target(&config).is_ok());
    }

    #[test]
    fn test_unknown_target_kind() {
        let config = Configuration::new().with(TARGET_KIND_KEY, "nis");
        match build_target(&config) {
            Err(DaemonError::UnsupportedTarget { kind }) => assert_eq!(kind, "nis"),
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }

    #[test]
    fn test_ldap_target_requires_containers() {
        let err = build_target(&Configuration::new()).err().unwrap();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_override_file_wins_over_default() {
        let default = toml_file("url = \"ldap://default:389\"\nproviders = \"corp\"\n");
        let site = toml_file("url = \"ldap://site:389\"\n");
        let cli = cli_with(
            default.path().to_path_buf(),
            vec![site.path().to_path_buf()],
        );

        let config = load_configuration(&cli).unwrap();
        assert_eq!(config.get("url"), Some("ldap://site:389"));
        assert_eq!(config.get("providers"), Some("corp"));
    }

    #[test]
    fn test_missing_default_is_skipped() {
        let cli = cli_with(PathBuf::from("/nonexistent/dirsync.toml"), Vec::new());
        assert!(load_configuration(&cli).is_ok());
    }

    #[test]
    fn test_missing_override_is_fatal() {
        let cli = cli_with(
            PathBuf::from("/nonexistent/dirsync.toml"),
            vec![PathBuf::from("/nonexistent/site.toml")],
        );
        assert_eq!(load_configuration(&cli).unwrap_err().exit_code(), 2);
    }

    #[test]
    fn test_failed_reload_keeps_units() {
        let resolvers = ResolverRegistry::new();
        let mappings = MappingRegistry::new(Vec::new());
        let file = toml_file("providers = \"corp\"\n\"providers.corp.impl\" = \"nis\"\n");
        let cli = cli_with(file.path().to_path_buf(), Vec::new());

        reload(&cli, &mappings, &resolvers);
        assert!(mappings.is_empty());
    }

    #[test]
    fn test_reload_swaps_units() {
        let mappings = MappingRegistry::new(Vec::new());
        let file = toml_file(concat!(
            "providers = \"corp\"\n",
            "\"providers.corp.groups\" = \"eng\"\n",
            "\"providers.corp.url\" = \"ldap://127.0.0.1:9\"\n",
        ));
        let cli = cli_with(file.path().to_path_buf(), Vec::new());

        reload(&cli, &mappings, &resolver_registry());
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings.snapshot()[0].group_names, vec!["eng"]);
    }
}
