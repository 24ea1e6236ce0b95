//! Command-line arguments

use std::path::PathBuf;

use clap::Parser;

/// dirsync daemon - keep embedded directory groups in sync with LDAP
#[derive(Parser, Debug, Clone)]
#[command(name = "dirsync-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Default configuration resource; skipped when missing
    #[arg(long, env = "DIRSYNCD_DEFAULT_CONFIG", default_value = "dirsync.toml")]
    pub default_config: PathBuf,

    /// Override configuration files, applied in order
    #[arg(short, long = "config", env = "DIRSYNCD_CONFIG", value_delimiter = ',')]
    pub config: Vec<PathBuf>,

    /// Run a single reconciliation cycle, print its report and exit
    #[arg(long)]
    pub once: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "DIRSYNCD_LOG_FILTER", default_value = "info")]
    pub log_filter: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["dirsync-daemon"]).unwrap();
        assert_eq!(cli.default_config, PathBuf::from("dirsync.toml"));
        assert!(cli.config.is_empty());
        assert!(!cli.once);
    }

    #[test]
    fn test_override_files_keep_order() {
        let cli = Cli::try_parse_from([
            "dirsync-daemon",
            "-c",
            "/etc/dirsync/site.toml",
            "--config",
            "/etc/dirsync/a.yaml,/etc/dirsync/b.json",
            "--once",
        ])
        .unwrap();

        assert_eq!(
            cli.config,
            vec![
                PathBuf::from("/etc/dirsync/site.toml"),
                PathBuf::from("/etc/dirsync/a.yaml"),
                PathBuf::from("/etc/dirsync/b.json"),
            ]
        );
        assert!(cli.once);
    }

    #[test]
    fn test_unknown_flag_rejected() {
        assert!(Cli::try_parse_from(["dirsync-daemon", "--dry"]).is_err());
    }
}
