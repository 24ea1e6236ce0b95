//! dirsync daemon
//!
//! Keeps groups in the embedded directory in step with the groups of one or
//! more enterprise LDAP directories. Membership is only ever added.
//!
//! Signals:
//! - `SIGHUP` re-reads configuration and rebuilds the providers
//! - `SIGINT` / `SIGTERM` stop the updater and exit

mod cli;
mod daemon;
mod error;
mod logging;

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use dirsync_connector::config::Configuration;
use dirsync_provisioning::{
    build_mapping_units, GroupMappingUpdater, MappingRegistry, UpdaterConfig,
};

use cli::Cli;
use daemon::{
    build_target, load_configuration, reload, resolver_registry, shutdown_signal, ReloadSignal,
};
use error::{DaemonError, DaemonResult};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Fail fast on unreadable configuration, before logging is up.
    let configuration = match load_configuration(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(e.exit_code());
        }
    };

    logging::init_logging(&cli.log_filter);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        overrides = cli.config.len(),
        once = cli.once,
        "Starting dirsync daemon"
    );

    if let Err(e) = run(&cli, configuration).await {
        error!(error = %e, "dirsync daemon failed");
        eprintln!("FATAL: {e}");
        std::process::exit(e.exit_code());
    }

    info!("dirsync daemon stopped");
}

async fn run(cli: &Cli, configuration: Configuration) -> DaemonResult<()> {
    let resolvers = resolver_registry();
    let units = build_mapping_units(&configuration, &resolvers)?;
    let target = build_target(&configuration)?;
    let config = UpdaterConfig::from_configuration(&configuration)?;

    let mappings = Arc::new(MappingRegistry::new(units));
    let updater = GroupMappingUpdater::new(Arc::clone(&mappings), Arc::clone(&target), config);

    if cli.once {
        if !target.is_started().await {
            return Err(DaemonError::TargetUnavailable);
        }
        let report = updater.run_once().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    updater.start().await;

    let mut reload_signal = ReloadSignal::install();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            () = reload_signal.recv() => {
                info!("Received SIGHUP, reloading configuration");
                reload(cli, &mappings, &resolvers);
            }
        }
    }

    updater.stop().await;
    Ok(())
}
