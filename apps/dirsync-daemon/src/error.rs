//! Daemon error types and exit codes

use thiserror::Error;

use dirsync_connector::error::ConnectorError;
use dirsync_provisioning::ReconcileError;

/// Exit codes
/// - 0: Success
/// - 1: General error
/// - 2: Configuration error
/// - 3: Directory unavailable
pub type DaemonResult<T> = Result<T, DaemonError>;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error("Unsupported target kind: {kind} (expected 'ldap' or 'memory')")]
    UnsupportedTarget { kind: String },

    #[error("Target directory is not started")]
    TargetUnavailable,

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("Failed to write report: {0}")]
    Output(#[from] serde_json::Error),
}

impl DaemonError {
    pub fn exit_code(&self) -> i32 {
        match self {
            DaemonError::Connector(e) if e.is_configuration() => 2,
            DaemonError::Connector(e) if e.is_transient() => 3,
            DaemonError::UnsupportedTarget { .. } => 2,
            DaemonError::TargetUnavailable => 3,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_configuration() {
        let source = ConnectorError::invalid_configuration("url is required");
        let err = DaemonError::from(source);
        assert_eq!(err.exit_code(), 2);

        let kind = "nis".to_string();
        assert_eq!(DaemonError::UnsupportedTarget { kind }.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_unavailable() {
        assert_eq!(DaemonError::TargetUnavailable.exit_code(), 3);
        let err = DaemonError::from(ConnectorError::connection_failed("refused"));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_general() {
        let err = DaemonError::from(ReconcileError::CycleInProgress);
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_display_is_transparent() {
        let err = DaemonError::from(ConnectorError::invalid_configuration("bad base"));
        assert!(err.to_string().contains("bad base"));
    }
}
