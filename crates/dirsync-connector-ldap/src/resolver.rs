//! LDAP group resolver
//!
//! Looks a group up by name and turns the DNs in its member attributes
//! into usernames (the leftmost `cn` of each DN).

use std::sync::Arc;

use async_trait::async_trait;
use ldap3::{Scope, SearchEntry};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use dirsync_connector::config::Configuration;
use dirsync_connector::dn::{escape_filter_value, leaf_common_name};
use dirsync_connector::error::{ConnectorError, ConnectorResult};
use dirsync_connector::registry::{BoxedResolver, ResolverRegistry};
use dirsync_connector::resilience::RetryExecutor;
use dirsync_connector::traits::GroupResolver;
use dirsync_connector::types::ResolvedMembership;

use crate::config::LdapSettings;
use crate::session::{DirectorySession, Ldap3SessionFactory, SessionFactory};

/// Selector under which the LDAP resolver is registered.
pub const RESOLVER_TYPE: &str = "ldap";

/// Resolver factory for [`ResolverRegistry`].
pub fn ldap_resolver_factory(config: &Configuration) -> ConnectorResult<BoxedResolver> {
    Ok(Arc::new(LdapGroupResolver::configure(config)?))
}

/// Register the LDAP resolver under [`RESOLVER_TYPE`].
pub fn register(registry: &mut ResolverRegistry) {
    registry.register_factory(RESOLVER_TYPE, ldap_resolver_factory);
}

/// Group resolver backed by an LDAP directory.
///
/// The bound session is created lazily, cached, and dropped after any
/// transport failure. A mutex serializes use of the cached session.
pub struct LdapGroupResolver<F: SessionFactory = Ldap3SessionFactory> {
    settings: LdapSettings,
    factory: F,
    display_name: String,
    session: Mutex<Option<F::Session>>,
    retry: RetryExecutor,
}

impl LdapGroupResolver {
    /// Build a resolver from a provider-scoped configuration.
    pub fn configure(config: &Configuration) -> ConnectorResult<Self> {
        let settings = LdapSettings::from_configuration(config)?;
        let factory = Ldap3SessionFactory::new(settings.connection.clone())?;
        Ok(Self::with_factory(settings, factory))
    }
}

impl<F: SessionFactory> LdapGroupResolver<F> {
    /// Build a resolver over a custom session factory.
    pub fn with_factory(settings: LdapSettings, factory: F) -> Self {
        let display_name = format!("LDAP: {}", factory.endpoint());
        Self {
            settings,
            factory,
            display_name,
            session: Mutex::new(None),
            retry: RetryExecutor::with_defaults(),
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &LdapSettings {
        &self.settings
    }

    /// `(&<group filter>(<name attribute>=<group>))`
    #[must_use]
    pub fn group_filter(&self, group: &str) -> String {
        format!(
            "(&{}({}={}))",
            self.settings.group_search_filter,
            self.settings.group_name_attribute,
            escape_filter_value(group)
        )
    }

    /// Resolve `group`, surfacing the error instead of an empty list.
    pub async fn try_get_members(&self, group: &str) -> ConnectorResult<ResolvedMembership> {
        let usernames = self
            .retry
            .execute(|attempt| self.search_members(group, attempt))
            .await?;
        Ok(ResolvedMembership::new(group, usernames))
    }

    /// One search attempt against the cached (or a fresh) session.
    async fn search_members(&self, group: &str, attempt: u32) -> ConnectorResult<Vec<String>> {
        let mut guard = self.session.lock().await;

        if guard.is_none() {
            debug!(attempt, endpoint = %self.factory.endpoint(), "Opening directory session");
            *guard = Some(self.factory.connect().await?);
        }
        let Some(session) = guard.as_mut() else {
            return Err(ConnectorError::internal("directory session missing"));
        };

        let filter = self.group_filter(group);
        let result = session
            .search(
                &self.settings.base_dn,
                Scope::Subtree,
                &filter,
                &self.settings.member_attributes,
                self.settings.search_timeout,
            )
            .await;

        match result {
            Ok(entries) => Ok(self.extract_usernames(group, entries)),
            Err(e) => {
                if e.is_transient() {
                    debug!(attempt, "Dropping cached directory session");
                    *guard = None;
                }
                Err(e)
            }
        }
    }

    fn extract_usernames(&self, group: &str, entries: Vec<SearchEntry>) -> Vec<String> {
        let mut usernames = Vec::new();

        for entry in entries {
            let values = entry
                .attrs
                .iter()
                .filter(|(name, _)| {
                    self.settings
                        .member_attributes
                        .iter()
                        .any(|attr| attr.eq_ignore_ascii_case(name))
                })
                .flat_map(|(_, values)| values.iter());

            for value in values {
                match leaf_common_name(value) {
                    Ok(Some(name)) => usernames.push(name),
                    Ok(None) => {
                        debug!(group = %group, member = %value, "Member DN has no cn, skipping");
                    }
                    Err(e) => {
                        warn!(
                            group = %group,
                            member = %value,
                            error = %e,
                            "Unparseable member DN, skipping"
                        );
                    }
                }
            }
        }

        usernames
    }
}

#[async_trait]
impl<F> GroupResolver for LdapGroupResolver<F>
where
    F: SessionFactory + 'static,
{
    fn resolver_type(&self) -> &str {
        RESOLVER_TYPE
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    #[instrument(skip(self))]
    async fn get_members(&self, group: &str) -> Vec<String> {
        match self.try_get_members(group).await {
            Ok(membership) => {
                debug!(
                    resolver = %self.display_name,
                    members = membership.len(),
                    "Resolved group"
                );
                membership.usernames
            }
            Err(e) => {
                warn!(
                    resolver = %self.display_name,
                    error = %e,
                    error_code = e.error_code(),
                    "Group resolution failed, treating as empty"
                );
                Vec::new()
            }
        }
    }

    async fn dispose(&self) -> ConnectorResult<()> {
        let mut guard = self.session.lock().await;
        if let Some(mut session) = guard.take() {
            if let Err(e) = session.unbind().await {
                warn!(error = %e, "Error during LDAP unbind");
            }
        }
        info!(resolver = %self.display_name, "LDAP resolver disposed");
        Ok(())
    }
}

impl<F: SessionFactory> std::fmt::Debug for LdapGroupResolver<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapGroupResolver")
            .field("display_name", &self.display_name)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Script {
        connects: AtomicUsize,
        searches: AtomicUsize,
        unbinds: AtomicUsize,
        connect_results: std::sync::Mutex<VecDeque<ConnectorResult<()>>>,
        search_results: std::sync::Mutex<VecDeque<ConnectorResult<Vec<SearchEntry>>>>,
        filters: std::sync::Mutex<Vec<String>>,
    }

    impl Script {
        fn push_search(&self, result: ConnectorResult<Vec<SearchEntry>>) {
            self.search_results.lock().unwrap().push_back(result);
        }

        fn push_connect(&self, result: ConnectorResult<()>) {
            self.connect_results.lock().unwrap().push_back(result);
        }
    }

    struct MockSession {
        script: Arc<Script>,
    }

    #[async_trait]
    impl DirectorySession for MockSession {
        async fn search(
            &mut self,
            _base: &str,
            _scope: Scope,
            filter: &str,
            _attrs: &[String],
            _time_limit: Duration,
        ) -> ConnectorResult<Vec<SearchEntry>> {
            self.script.searches.fetch_add(1, Ordering::SeqCst);
            self.script.filters.lock().unwrap().push(filter.to_string());
            self.script
                .search_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn add(
            &mut self,
            _dn: &str,
            _attrs: Vec<(String, Vec<String>)>,
        ) -> ConnectorResult<()> {
            Ok(())
        }

        async fn add_value(&mut self, _dn: &str, _attr: &str, _value: &str) -> ConnectorResult<()> {
            Ok(())
        }

        async fn unbind(&mut self) -> ConnectorResult<()> {
            self.script.unbinds.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct MockFactory {
        script: Arc<Script>,
    }

    #[async_trait]
    impl SessionFactory for MockFactory {
        type Session = MockSession;

        async fn connect(&self) -> ConnectorResult<MockSession> {
            self.script.connects.fetch_add(1, Ordering::SeqCst);
            let scripted = self.script.connect_results.lock().unwrap().pop_front();
            scripted.unwrap_or(Ok(()))?;
            Ok(MockSession {
                script: Arc::clone(&self.script),
            })
        }

        fn endpoint(&self) -> &str {
            "ldap://mock:389"
        }
    }

    fn group_entry(dn: &str, members: &[&str]) -> SearchEntry {
        let mut attrs = HashMap::new();
        attrs.insert(
            "member".to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        );
        SearchEntry {
            dn: dn.to_string(),
            attrs,
            bin_attrs: HashMap::new(),
        }
    }

    fn resolver(config: &Configuration) -> (LdapGroupResolver<MockFactory>, Arc<Script>) {
        let script = Arc::new(Script::default());
        let settings = LdapSettings::from_configuration(config).unwrap();
        let resolver = LdapGroupResolver::with_factory(
            settings,
            MockFactory {
                script: Arc::clone(&script),
            },
        );
        (resolver, script)
    }

    #[tokio::test]
    async fn test_resolves_leaf_cn_of_each_member() {
        let (resolver, script) = resolver(&Configuration::new());
        script.push_search(Ok(vec![group_entry(
            "cn=eng,ou=groups,dc=corp",
            &[
                "cn=alice,ou=users,dc=corp",
                "CN=Bob,OU=Users,DC=corp",
                "uid=svc,ou=system",
                "not a dn",
                "cn=alice,ou=other,dc=corp",
            ],
        )]));

        let members = resolver.get_members("eng").await;

        assert_eq!(members, vec!["alice", "Bob"]);
        assert_eq!(script.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_filter_combines_group_filter_and_escaped_name() {
        let config = Configuration::new()
            .with("search.filter.group", "(objectClass=groupOfNames)")
            .with("search.attr.group.name", "cn");
        let (resolver, script) = resolver(&config);

        resolver.get_members("R&D (west)*").await;

        let filters = script.filters.lock().unwrap().clone();
        assert_eq!(
            filters,
            vec![r"(&(objectClass=groupOfNames)(cn=R&D \28west\29\2a))"]
        );
    }

    #[tokio::test]
    async fn test_transport_failure_retries_three_times() {
        let (resolver, script) = resolver(&Configuration::new());
        for _ in 0..3 {
            script.push_search(Err(ConnectorError::network("connection reset")));
        }

        let members = resolver.get_members("eng").await;

        assert!(members.is_empty());
        assert_eq!(script.searches.load(Ordering::SeqCst), 3);
        // Session dropped after every transport failure.
        assert_eq!(script.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_connect_failures_count_as_attempts() {
        let (resolver, script) = resolver(&Configuration::new());
        for _ in 0..3 {
            script.push_connect(Err(ConnectorError::connection_failed("refused")));
        }

        assert!(resolver.get_members("eng").await.is_empty());
        assert_eq!(script.connects.load(Ordering::SeqCst), 3);
        assert_eq!(script.searches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_protocol_failure_is_not_retried() {
        let (resolver, script) = resolver(&Configuration::new());
        script.push_search(Err(ConnectorError::SearchFailed {
            rc: 32,
            message: "no such object".to_string(),
        }));

        assert!(resolver.get_members("eng").await.is_empty());
        assert_eq!(script.searches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bind_rejection_is_not_retried() {
        let (resolver, script) = resolver(&Configuration::new());
        script.push_connect(Err(ConnectorError::AuthenticationFailed));

        assert!(resolver.get_members("eng").await.is_empty());
        assert_eq!(script.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_on_second_attempt() {
        let (resolver, script) = resolver(&Configuration::new());
        script.push_search(Err(ConnectorError::network("connection reset")));
        script.push_search(Ok(vec![group_entry("cn=ops", &["cn=carol,dc=corp"])]));

        assert_eq!(resolver.get_members("ops").await, vec!["carol"]);
        assert_eq!(script.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_session_is_reused() {
        let (resolver, script) = resolver(&Configuration::new());

        resolver.get_members("eng").await;
        resolver.get_members("ops").await;

        assert_eq!(script.connects.load(Ordering::SeqCst), 1);
        assert_eq!(script.searches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_member_attribute_lookup_is_case_insensitive() {
        let config = Configuration::new().with("search.attr.member", "uniqueMember");
        let (resolver, script) = resolver(&config);

        let mut attrs = HashMap::new();
        attrs.insert(
            "uniquemember".to_string(),
            vec!["cn=dave,dc=corp".to_string()],
        );
        attrs.insert("member".to_string(), vec!["cn=ignored,dc=corp".to_string()]);
        script.push_search(Ok(vec![SearchEntry {
            dn: "cn=eng".to_string(),
            attrs,
            bin_attrs: HashMap::new(),
        }]));

        assert_eq!(resolver.get_members("eng").await, vec!["dave"]);
    }

    #[tokio::test]
    async fn test_dispose_unbinds_cached_session() {
        let (resolver, script) = resolver(&Configuration::new());
        resolver.get_members("eng").await;

        resolver.dispose().await.unwrap();
        resolver.dispose().await.unwrap();

        assert_eq!(script.unbinds.load(Ordering::SeqCst), 1);
        resolver.get_members("eng").await;
        assert_eq!(script.connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_configure_rejects_empty_url() {
        let err = LdapGroupResolver::configure(&Configuration::new().with("url", ""))
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_registered_under_ldap() {
        let mut registry = ResolverRegistry::new();
        register(&mut registry);
        let resolver = registry
            .create("LDAP", &Configuration::new().with("url", "ldap://dc1:389"))
            .unwrap();
        assert_eq!(resolver.resolver_type(), "ldap");
        assert_eq!(resolver.display_name(), "LDAP: ldap://dc1:389");
    }
}
