//! Reconciliation cycle
//!
//! One pass over a mapping snapshot: resolve each group and bring the
//! target directory up to date. Every write is preceded by its check, so a
//! repeated cycle with unchanged membership performs no writes. Removals
//! are never made.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use dirsync_connector::error::{ConnectorError, ConnectorResult};
use dirsync_connector::traits::TargetDirectory;
use dirsync_connector::types::ResolvedMembership;

use crate::mapping::MappingUnit;

/// Errors of an ad hoc reconciliation request.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Another cycle holds the cycle lock.
    #[error("a reconciliation cycle is already in progress")]
    CycleInProgress,

    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

/// Outcome of one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Units in the snapshot.
    pub providers: u32,
    pub groups_processed: u32,
    pub groups_created: u32,
    pub users_created: u32,
    pub memberships_added: u32,
    /// Groups that resolved to no members (including failed resolutions).
    pub empty_resolutions: u32,
    pub write_failures: u32,
    /// The cycle stopped early on cancellation.
    pub cancelled: bool,
}

impl CycleReport {
    fn begin(providers: usize) -> Self {
        let now = Utc::now();
        Self {
            cycle_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            providers: u32::try_from(providers).unwrap_or(u32::MAX),
            groups_processed: 0,
            groups_created: 0,
            users_created: 0,
            memberships_added: 0,
            empty_resolutions: 0,
            write_failures: 0,
            cancelled: false,
        }
    }

    /// Writes performed by the cycle.
    #[must_use]
    pub fn mutations(&self) -> u32 {
        self.groups_created + self.users_created + self.memberships_added
    }

    /// Cycle duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Run one cycle over `units`.
///
/// Cancellation is honoured between groups; a group that has started is
/// finished first.
#[instrument(skip_all, fields(providers = units.len()))]
pub async fn reconcile_units(
    units: &[MappingUnit],
    target: &dyn TargetDirectory,
    credential: &str,
    cancel: &CancellationToken,
) -> CycleReport {
    let mut report = CycleReport::begin(units.len());

    'units: for unit in units {
        for group in &unit.group_names {
            if cancel.is_cancelled() {
                info!(cycle_id = %report.cycle_id, "Cycle cancelled");
                report.cancelled = true;
                break 'units;
            }

            let users = unit.resolver.get_members(group).await;
            let membership = ResolvedMembership::new(group.as_str(), users);
            report.groups_processed += 1;

            debug!(
                provider = %unit.provider_name,
                group = %group,
                members = membership.len(),
                "Resolved group"
            );
            apply_membership(&membership, target, credential, &mut report).await;
        }
    }

    report.finished_at = Utc::now();
    report
}

/// Apply one group's membership. Failures are counted and logged; the
/// remaining users are still processed.
async fn apply_membership(
    membership: &ResolvedMembership,
    target: &dyn TargetDirectory,
    credential: &str,
    report: &mut CycleReport,
) {
    let group = membership.group_name.as_str();

    // An empty result may be a failed lookup: never create a group from it.
    if membership.is_empty() {
        report.empty_resolutions += 1;
        return;
    }

    match ensure_group(target, group).await {
        Ok(created) => {
            if created {
                report.groups_created += 1;
            }
        }
        Err(e) => {
            report.write_failures += 1;
            warn!(group = %group, error = %e, "Could not ensure group, skipping its members");
            return;
        }
    }

    for user in &membership.usernames {
        match ensure_user(target, user, credential).await {
            Ok(created) => {
                if created {
                    report.users_created += 1;
                }
            }
            Err(e) => {
                report.write_failures += 1;
                warn!(user = %user, error = %e, "Could not ensure user");
                continue;
            }
        }

        match ensure_membership(target, user, group).await {
            Ok(true) => report.memberships_added += 1,
            Ok(false) => {}
            Err(e) => {
                report.write_failures += 1;
                warn!(user = %user, group = %group, error = %e, "Could not add membership");
            }
        }
    }
}

/// Create the group if absent. Returns whether it was created.
async fn ensure_group(target: &dyn TargetDirectory, group: &str) -> ConnectorResult<bool> {
    if target.group_exists(group).await? {
        return Ok(false);
    }
    match target.create_group(group).await {
        Ok(()) => {
            info!(group = %group, "Created group");
            Ok(true)
        }
        Err(ConnectorError::ObjectAlreadyExists { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

async fn ensure_user(
    target: &dyn TargetDirectory,
    user: &str,
    credential: &str,
) -> ConnectorResult<bool> {
    if target.user_exists(user).await? {
        return Ok(false);
    }
    match target.create_user(user, credential).await {
        Ok(()) => {
            info!(user = %user, "Created user");
            Ok(true)
        }
        Err(ConnectorError::ObjectAlreadyExists { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

async fn ensure_membership(
    target: &dyn TargetDirectory,
    user: &str,
    group: &str,
) -> ConnectorResult<bool> {
    if target.is_member(user, group).await? {
        return Ok(false);
    }
    match target.add_member(user, group).await {
        Ok(()) => {
            debug!(user = %user, group = %group, "Added member");
            Ok(true)
        }
        Err(ConnectorError::ObjectAlreadyExists { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;
    use async_trait::async_trait;
    use dirsync_connector::traits::GroupResolver;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StaticResolver {
        groups: HashMap<String, Vec<String>>,
        calls: AtomicUsize,
    }

    impl StaticResolver {
        fn new(groups: Vec<(&str, Vec<&str>)>) -> Arc<Self> {
            Arc::new(Self {
                groups: groups
                    .into_iter()
                    .map(|(g, users)| {
                        (
                            g.to_string(),
                            users.into_iter().map(str::to_string).collect(),
                        )
                    })
                    .collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl GroupResolver for StaticResolver {
        fn resolver_type(&self) -> &str {
            "static"
        }

        fn display_name(&self) -> &str {
            "static"
        }

        async fn get_members(&self, group: &str) -> Vec<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.groups.get(group).cloned().unwrap_or_default()
        }
    }

    fn unit(groups: &[&str], resolver: Arc<StaticResolver>) -> MappingUnit {
        MappingUnit::new(
            "corp",
            groups.iter().map(|g| (*g).to_string()).collect(),
            resolver,
        )
    }

    #[tokio::test]
    async fn test_cycle_applies_membership() {
        let groups = vec![("eng", vec!["alice", "bob"]), ("ops", vec!["bob"])];
        let resolver = StaticResolver::new(groups);
        let units = vec![unit(&["eng", "ops"], resolver)];
        let target = InMemoryDirectory::new();

        let report = reconcile_units(&units, &target, "pw", &CancellationToken::new()).await;

        assert_eq!(target.members("eng"), vec!["alice", "bob"]);
        assert_eq!(target.members("ops"), vec!["bob"]);
        assert_eq!(report.groups_processed, 2);
        assert_eq!(report.groups_created, 2);
        assert_eq!(report.users_created, 2);
        assert_eq!(report.memberships_added, 3);
        assert_eq!(report.mutations(), 7);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_empty_resolution_creates_nothing() {
        let resolver = StaticResolver::new(Vec::new());
        let units = vec![unit(&["ghost"], resolver)];
        let target = InMemoryDirectory::new();

        let report = reconcile_units(&units, &target, "pw", &CancellationToken::new()).await;

        assert!(target.groups().is_empty());
        assert_eq!(report.empty_resolutions, 1);
        assert_eq!(report.mutations(), 0);
    }

    #[tokio::test]
    async fn test_existing_membership_not_rewritten() {
        let resolver = StaticResolver::new(vec![("eng", vec!["alice"])]);
        let units = vec![unit(&["eng"], resolver)];
        let target = InMemoryDirectory::new();
        target.seed_user("alice", "original");
        target.seed_group("eng", &["alice", "carol"]);

        let report = reconcile_units(&units, &target, "pw", &CancellationToken::new()).await;

        assert_eq!(report.mutations(), 0);
        assert_eq!(target.credential_of("alice").as_deref(), Some("original"));
        // Memberships are never removed.
        assert_eq!(target.members("eng"), vec!["alice", "carol"]);
    }

    #[tokio::test]
    async fn test_user_failure_does_not_stop_group() {
        let resolver = StaticResolver::new(vec![("eng", vec!["mallory", "alice"])]);
        let units = vec![unit(&["eng"], resolver)];
        let target = InMemoryDirectory::new();
        target.reject_user("mallory");

        let report = reconcile_units(&units, &target, "pw", &CancellationToken::new()).await;

        assert_eq!(report.write_failures, 1);
        assert_eq!(target.members("eng"), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_group() {
        let resolver = StaticResolver::new(vec![("eng", vec!["alice"])]);
        let units = vec![unit(&["eng"], Arc::clone(&resolver))];
        let target = InMemoryDirectory::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = reconcile_units(&units, &target, "pw", &cancel).await;

        assert!(report.cancelled);
        assert_eq!(report.groups_processed, 0);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_report_serializes() {
        let report = CycleReport::begin(2);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["providers"], 2);
        assert_eq!(json["cancelled"], false);
    }
}
