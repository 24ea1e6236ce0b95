//! LDAP target directory
//!
//! Applies membership to the embedded directory over LDAP. Users are
//! `inetOrgPerson` entries under the users container, groups are
//! `groupOfNames` entries under the groups container.

use async_trait::async_trait;
use ldap3::Scope;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use dirsync_connector::config::Configuration;
use dirsync_connector::dn::{escape_dn_value, escape_filter_value};
use dirsync_connector::error::{ConnectorError, ConnectorResult};
use dirsync_connector::traits::TargetDirectory;

use crate::config::TargetSettings;
use crate::session::{DirectorySession, Ldap3SessionFactory, SessionFactory, RC_NO_SUCH_OBJECT};

const USER_OBJECT_CLASSES: &[&str] = &["top", "person", "organizationalPerson", "inetOrgPerson"];
const GROUP_OBJECT_CLASSES: &[&str] = &["top", "groupOfNames"];
const MEMBER_ATTRIBUTE: &str = "member";
const NO_ATTRIBUTES: &str = "1.1";

/// [`TargetDirectory`] over LDAP.
pub struct LdapTargetDirectory<F: SessionFactory = Ldap3SessionFactory> {
    settings: TargetSettings,
    factory: F,
    session: Mutex<Option<F::Session>>,
}

impl LdapTargetDirectory {
    /// Build from the `target.*` keys of the configuration.
    pub fn configure(config: &Configuration) -> ConnectorResult<Self> {
        let settings = TargetSettings::from_configuration(config)?;
        let factory = Ldap3SessionFactory::new(settings.connection.clone())?;
        Ok(Self::with_factory(settings, factory))
    }
}

impl<F: SessionFactory> LdapTargetDirectory<F> {
    pub fn with_factory(settings: TargetSettings, factory: F) -> Self {
        Self {
            settings,
            factory,
            session: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn user_dn(&self, user: &str) -> String {
        format!("cn={},{}", escape_dn_value(user), self.settings.users_dn)
    }

    #[must_use]
    pub fn group_dn(&self, group: &str) -> String {
        format!("cn={},{}", escape_dn_value(group), self.settings.groups_dn)
    }

    /// Lock the session slot, connecting if it is empty.
    async fn session(&self) -> ConnectorResult<MutexGuard<'_, Option<F::Session>>> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.factory.connect().await?);
        }
        Ok(guard)
    }

    /// Drop the cached session after a transport failure.
    fn release_on_transport_error<T>(guard: &mut Option<F::Session>, result: &ConnectorResult<T>) {
        if matches!(result, Err(e) if e.is_transient()) {
            debug!("Dropping cached target session");
            *guard = None;
        }
    }

    /// Base-scope search: `Ok(false)` when the entry does not exist or
    /// does not match `filter`.
    async fn matches(&self, dn: &str, filter: &str) -> ConnectorResult<bool> {
        let mut guard = self.session().await?;
        let Some(session) = guard.as_mut() else {
            return Err(ConnectorError::internal("target session missing"));
        };

        let result = session
            .search(
                dn,
                Scope::Base,
                filter,
                &[NO_ATTRIBUTES.to_string()],
                std::time::Duration::ZERO,
            )
            .await;
        Self::release_on_transport_error(&mut guard, &result);

        match result {
            Ok(entries) => Ok(!entries.is_empty()),
            Err(ConnectorError::SearchFailed { rc, .. }) if rc == RC_NO_SUCH_OBJECT => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn add_entry(&self, dn: &str, attrs: Vec<(String, Vec<String>)>) -> ConnectorResult<()> {
        let mut guard = self.session().await?;
        let Some(session) = guard.as_mut() else {
            return Err(ConnectorError::internal("target session missing"));
        };

        let result = session.add(dn, attrs).await;
        Self::release_on_transport_error(&mut guard, &result);
        result
    }
}

fn attr(name: &str, values: &[&str]) -> (String, Vec<String>) {
    (
        name.to_string(),
        values.iter().map(|v| (*v).to_string()).collect(),
    )
}

#[async_trait]
impl<F> TargetDirectory for LdapTargetDirectory<F>
where
    F: SessionFactory + 'static,
{
    async fn is_started(&self) -> bool {
        match self.session().await {
            Ok(_) => true,
            Err(e) => {
                debug!(
                    endpoint = %self.factory.endpoint(),
                    error = %e,
                    "Target directory not reachable yet"
                );
                false
            }
        }
    }

    async fn group_exists(&self, group: &str) -> ConnectorResult<bool> {
        self.matches(&self.group_dn(group), "(objectClass=*)").await
    }

    #[instrument(skip(self))]
    async fn create_group(&self, group: &str) -> ConnectorResult<()> {
        let dn = self.group_dn(group);
        let placeholder = self.settings.placeholder_member.clone();
        self.add_entry(
            &dn,
            vec![
                attr("objectClass", GROUP_OBJECT_CLASSES),
                attr("cn", &[group]),
                attr(MEMBER_ATTRIBUTE, &[placeholder.as_str()]),
            ],
        )
        .await?;
        info!(dn = %dn, "Created group");
        Ok(())
    }

    async fn user_exists(&self, user: &str) -> ConnectorResult<bool> {
        self.matches(&self.user_dn(user), "(objectClass=*)").await
    }

    #[instrument(skip(self, credential))]
    async fn create_user(&self, user: &str, credential: &str) -> ConnectorResult<()> {
        let dn = self.user_dn(user);
        self.add_entry(
            &dn,
            vec![
                attr("objectClass", USER_OBJECT_CLASSES),
                attr("cn", &[user]),
                attr("sn", &[user]),
                attr("uid", &[user]),
                attr("userPassword", &[credential]),
            ],
        )
        .await?;
        info!(dn = %dn, "Created user");
        Ok(())
    }

    async fn is_member(&self, user: &str, group: &str) -> ConnectorResult<bool> {
        let filter = format!(
            "({}={})",
            MEMBER_ATTRIBUTE,
            escape_filter_value(&self.user_dn(user))
        );
        self.matches(&self.group_dn(group), &filter).await
    }

    #[instrument(skip(self))]
    async fn add_member(&self, user: &str, group: &str) -> ConnectorResult<()> {
        let group_dn = self.group_dn(group);
        let user_dn = self.user_dn(user);

        let mut guard = self.session().await?;
        let Some(session) = guard.as_mut() else {
            return Err(ConnectorError::internal("target session missing"));
        };
        let result = session.add_value(&group_dn, MEMBER_ATTRIBUTE, &user_dn).await;
        Self::release_on_transport_error(&mut guard, &result);

        if let Err(e) = &result {
            warn!(group_dn = %group_dn, user_dn = %user_dn, error = %e, "Adding member failed");
        }
        result
    }
}

impl<F: SessionFactory> std::fmt::Debug for LdapTargetDirectory<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapTargetDirectory")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
