//! In-memory target directory
//!
//! Used for dry runs (`target.kind = memory`) and by tests. Mutation
//! counters record only successful writes.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use dirsync_connector::error::{ConnectorError, ConnectorResult};
use dirsync_connector::traits::TargetDirectory;

#[derive(Debug, Default)]
struct DirectoryState {
    /// User name -> credential.
    users: BTreeMap<String, String>,
    /// Group name -> member names.
    groups: BTreeMap<String, BTreeSet<String>>,
}

/// Thread-safe in-memory [`TargetDirectory`].
#[derive(Debug)]
pub struct InMemoryDirectory {
    state: RwLock<DirectoryState>,
    started: AtomicBool,
    rejected_users: RwLock<HashSet<String>>,
    rejected_groups: RwLock<HashSet<String>>,
    groups_created: AtomicUsize,
    users_created: AtomicUsize,
    members_added: AtomicUsize,
    readiness_checks: AtomicUsize,
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDirectory {
    /// A started, empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(DirectoryState::default()),
            started: AtomicBool::new(true),
            rejected_users: RwLock::new(HashSet::new()),
            rejected_groups: RwLock::new(HashSet::new()),
            groups_created: AtomicUsize::new(0),
            users_created: AtomicUsize::new(0),
            members_added: AtomicUsize::new(0),
            readiness_checks: AtomicUsize::new(0),
        }
    }

    /// A directory that reports not started until [`set_started`](Self::set_started).
    #[must_use]
    pub fn not_started() -> Self {
        let directory = Self::new();
        directory.started.store(false, Ordering::SeqCst);
        directory
    }

    pub fn set_started(&self, started: bool) {
        self.started.store(started, Ordering::SeqCst);
    }

    /// Make `create_user` fail for this name.
    pub fn reject_user(&self, user: impl Into<String>) {
        self.write_rejected().insert(user.into());
    }

    /// Make `create_group` fail for this name.
    pub fn reject_group(&self, group: impl Into<String>) {
        self.rejected_groups
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(group.into());
    }

    /// Seed a group without counting it as a mutation.
    pub fn seed_group(&self, group: impl Into<String>, members: &[&str]) {
        let members = members.iter().map(|m| (*m).to_string()).collect();
        self.write_state().groups.insert(group.into(), members);
    }

    /// Seed a user without counting it as a mutation.
    pub fn seed_user(&self, user: impl Into<String>, credential: impl Into<String>) {
        self.write_state()
            .users
            .insert(user.into(), credential.into());
    }

    #[must_use]
    pub fn groups(&self) -> Vec<String> {
        self.read_state().groups.keys().cloned().collect()
    }

    #[must_use]
    pub fn users(&self) -> Vec<String> {
        self.read_state().users.keys().cloned().collect()
    }

    /// Members of `group`, sorted. Empty when the group does not exist.
    #[must_use]
    pub fn members(&self, group: &str) -> Vec<String> {
        self.read_state()
            .groups
            .get(group)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn credential_of(&self, user: &str) -> Option<String> {
        self.read_state().users.get(user).cloned()
    }

    #[must_use]
    pub fn groups_created(&self) -> usize {
        self.groups_created.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn users_created(&self) -> usize {
        self.users_created.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn members_added(&self) -> usize {
        self.members_added.load(Ordering::SeqCst)
    }

    /// Total successful mutations.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.groups_created() + self.users_created() + self.members_added()
    }

    /// Number of `is_started` calls.
    #[must_use]
    pub fn readiness_checks(&self) -> usize {
        self.readiness_checks.load(Ordering::SeqCst)
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, DirectoryState> {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, DirectoryState> {
        self.state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_rejected(&self) -> std::sync::RwLockWriteGuard<'_, HashSet<String>> {
        self.rejected_users
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn is_rejected(&self, user: &str) -> bool {
        self.rejected_users
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(user)
    }
}

#[async_trait]
impl TargetDirectory for InMemoryDirectory {
    async fn is_started(&self) -> bool {
        self.readiness_checks.fetch_add(1, Ordering::SeqCst);
        self.started.load(Ordering::SeqCst)
    }

    async fn group_exists(&self, group: &str) -> ConnectorResult<bool> {
        Ok(self.read_state().groups.contains_key(group))
    }

    async fn create_group(&self, group: &str) -> ConnectorResult<()> {
        let rejected = self
            .rejected_groups
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(group);
        if rejected {
            return Err(ConnectorError::write_failed(format!(
                "group {group} rejected by directory"
            )));
        }

        let mut state = self.write_state();
        if state.groups.contains_key(group) {
            return Err(ConnectorError::ObjectAlreadyExists {
                identifier: group.to_string(),
            });
        }
        state.groups.insert(group.to_string(), BTreeSet::new());
        self.groups_created.fetch_add(1, Ordering::SeqCst);
        debug!(group = %group, "Created group");
        Ok(())
    }

    async fn user_exists(&self, user: &str) -> ConnectorResult<bool> {
        Ok(self.read_state().users.contains_key(user))
    }

    async fn create_user(&self, user: &str, credential: &str) -> ConnectorResult<()> {
        if self.is_rejected(user) {
            return Err(ConnectorError::write_failed(format!(
                "user {user} rejected by directory"
            )));
        }

        let mut state = self.write_state();
        if state.users.contains_key(user) {
            return Err(ConnectorError::ObjectAlreadyExists {
                identifier: user.to_string(),
            });
        }
        state.users.insert(user.to_string(), credential.to_string());
        self.users_created.fetch_add(1, Ordering::SeqCst);
        debug!(user = %user, "Created user");
        Ok(())
    }

    async fn is_member(&self, user: &str, group: &str) -> ConnectorResult<bool> {
        Ok(self
            .read_state()
            .groups
            .get(group)
            .is_some_and(|members| members.contains(user)))
    }

    async fn add_member(&self, user: &str, group: &str) -> ConnectorResult<()> {
        let mut state = self.write_state();
        if !state.users.contains_key(user) {
            return Err(ConnectorError::ObjectNotFound {
                identifier: user.to_string(),
            });
        }
        let members = state
            .groups
            .get_mut(group)
            .ok_or_else(|| ConnectorError::ObjectNotFound {
                identifier: group.to_string(),
            })?;
        if !members.insert(user.to_string()) {
            return Err(ConnectorError::ObjectAlreadyExists {
                identifier: format!("{user} in {group}"),
            });
        }
        self.members_added.fetch_add(1, Ordering::SeqCst);
        debug!(user = %user, group = %group, "Added member");
        Ok(())
    }
}
