//! LDAP resolver and target configuration
//!
//! Settings are read from a provider-scoped [`Configuration`]; every key is
//! optional and falls back to a default suited to a local Active Directory
//! style server.

use std::path::PathBuf;
use std::time::Duration;

use dirsync_connector::config::Configuration;
use dirsync_connector::error::{ConnectorError, ConnectorResult};
use tracing::debug;

pub const DEFAULT_URL: &str = "ldap://localhost:10389";
pub const DEFAULT_GROUP_SEARCH_FILTER: &str = "(objectClass=group)";
pub const DEFAULT_USER_SEARCH_FILTER: &str = "(&(objectClass=user)(sAMAccountName={0}))";
pub const DEFAULT_MEMBER_ATTRIBUTE: &str = "member";
pub const DEFAULT_NAME_ATTRIBUTE: &str = "cn";
pub const DEFAULT_TARGET_BIND_DN: &str = "uid=admin,ou=system";

fn default_search_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

/// Connection parameters shared by the resolver and the target writer.
#[derive(Clone)]
pub struct ConnectionSettings {
    /// Effective URL, already upgraded to `ldaps://` when SSL is requested.
    pub url: String,
    /// Bind DN; empty binds anonymously.
    pub bind_dn: String,
    /// Bind password.
    pub bind_password: String,
    /// PKCS#12 client identity for TLS.
    pub keystore: Option<PathBuf>,
    /// Password protecting the keystore.
    pub keystore_password: String,
    /// Connect timeout.
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("url", &self.url)
            .field("bind_dn", &self.bind_dn)
            .field(
                "bind_password",
                &(!self.bind_password.is_empty()).then_some("***REDACTED***"),
            )
            .field("keystore", &self.keystore)
            .field(
                "keystore_password",
                &(!self.keystore_password.is_empty()).then_some("***REDACTED***"),
            )
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl ConnectionSettings {
    /// Read connection keys, each prefixed with `prefix` (`""` or `"target."`).
    fn from_configuration(
        config: &Configuration,
        prefix: &str,
        default_bind_dn: &str,
    ) -> ConnectorResult<Self> {
        let key = |name: &str| format!("{prefix}{name}");

        let raw_url = config.get_or(&key("url"), DEFAULT_URL).trim().to_string();
        let use_ssl = config.get_bool(&key("ssl"), false)?;
        let url = effective_url(&raw_url, use_ssl)?;

        let keystore = config
            .get(&key("ssl.keystore"))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            url,
            bind_dn: config
                .get_or(&key("bind.user"), default_bind_dn)
                .trim()
                .to_string(),
            bind_password: config.get_password(&key("bind.password"))?,
            keystore,
            keystore_password: config.get_password(&key("ssl.keystore.password"))?,
            connect_timeout: Duration::from_millis(
                config.get_u64(&key("connection.timeout"), default_connect_timeout_ms())?,
            ),
        })
    }

    /// Whether the connection uses LDAP over TLS.
    #[must_use]
    pub fn is_ldaps(&self) -> bool {
        self.url.to_ascii_lowercase().starts_with("ldaps://")
    }
}

/// Validate the URL scheme and apply the `ssl` upgrade.
fn effective_url(raw: &str, use_ssl: bool) -> ConnectorResult<String> {
    if raw.is_empty() {
        return Err(ConnectorError::invalid_configuration("url is required"));
    }

    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("ldaps://") {
        return Ok(raw.to_string());
    }
    if lower.starts_with("ldap://") && use_ssl {
        let rest = &raw["ldap://".len()..];
        return Ok(format!("ldaps://{rest}"));
    }
    if lower.starts_with("ldap://") {
        return Ok(raw.to_string());
    }

    Err(ConnectorError::invalid_configuration(format!(
        "url '{raw}' must use the ldap:// or ldaps:// scheme"
    )))
}

/// Settings of one LDAP group resolver.
#[derive(Debug, Clone)]
pub struct LdapSettings {
    pub connection: ConnectionSettings,
    /// Search base for group lookups.
    pub base_dn: String,
    /// Filter selecting group entries.
    pub group_search_filter: String,
    /// User lookup filter. Parsed but not used by group resolution.
    pub user_search_filter: String,
    /// Attributes whose values are member DNs.
    pub member_attributes: Vec<String>,
    /// Attribute matched against the external group name.
    pub group_name_attribute: String,
    /// Server and client time limit for a search.
    pub search_timeout: Duration,
}

impl LdapSettings {
    /// Parse resolver settings from a provider-scoped configuration.
    pub fn from_configuration(config: &Configuration) -> ConnectorResult<Self> {
        let connection = ConnectionSettings::from_configuration(config, "", "")?;

        let mut member_attributes = config.get_strings("search.attr.member");
        if member_attributes.is_empty() {
            member_attributes.push(DEFAULT_MEMBER_ATTRIBUTE.to_string());
        }

        let group_name_attribute = config
            .get("search.attr.group.name")
            .or_else(|| config.get("search.attr.user.name"))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_NAME_ATTRIBUTE)
            .to_string();

        let settings = Self {
            connection,
            base_dn: config.get_or("base", "").trim().to_string(),
            group_search_filter: config
                .get_or("search.filter.group", DEFAULT_GROUP_SEARCH_FILTER)
                .trim()
                .to_string(),
            user_search_filter: config
                .get_or("search.filter.user", DEFAULT_USER_SEARCH_FILTER)
                .trim()
                .to_string(),
            member_attributes,
            group_name_attribute,
            search_timeout: Duration::from_millis(
                config.get_u64("directory.search.timeout", default_search_timeout_ms())?,
            ),
        };

        debug!(settings = ?settings, "Parsed LDAP resolver settings");
        Ok(settings)
    }

    /// Server-side time limit in whole seconds, rounded up.
    #[must_use]
    pub fn search_time_limit_secs(&self) -> i32 {
        let millis = self.search_timeout.as_millis();
        i32::try_from(millis.div_ceil(1000)).unwrap_or(i32::MAX)
    }
}

/// Settings of the LDAP target directory (keys under `target.`).
#[derive(Debug, Clone)]
pub struct TargetSettings {
    pub connection: ConnectionSettings,
    /// Container of user entries.
    pub users_dn: String,
    /// Container of group entries.
    pub groups_dn: String,
    /// Member placed in a new `groupOfNames`, which requires at least one.
    pub placeholder_member: String,
}

impl TargetSettings {
    pub fn from_configuration(config: &Configuration) -> ConnectorResult<Self> {
        let connection =
            ConnectionSettings::from_configuration(config, "target.", DEFAULT_TARGET_BIND_DN)?;

        let users_dn = config.get_or("target.users.dn", "").trim().to_string();
        let groups_dn = config.get_or("target.groups.dn", "").trim().to_string();
        if users_dn.is_empty() || groups_dn.is_empty() {
            return Err(ConnectorError::invalid_configuration(
                "target.users.dn and target.groups.dn are required",
            ));
        }

        let placeholder_member = config
            .get("target.group.placeholder.member")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or_else(|| connection.bind_dn.clone(), str::to_string);

        Ok(Self {
            connection,
            users_dn,
            groups_dn,
            placeholder_member,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = LdapSettings::from_configuration(&Configuration::new()).unwrap();

        assert_eq!(settings.connection.url, "ldap://localhost:10389");
        assert!(settings.connection.bind_dn.is_empty());
        assert!(settings.connection.bind_password.is_empty());
        assert!(settings.base_dn.is_empty());
        assert_eq!(settings.group_search_filter, "(objectClass=group)");
        assert_eq!(
            settings.user_search_filter,
            "(&(objectClass=user)(sAMAccountName={0}))"
        );
        assert_eq!(settings.member_attributes, vec!["member"]);
        assert_eq!(settings.group_name_attribute, "cn");
        assert_eq!(settings.search_timeout, Duration::from_secs(10));
        assert_eq!(settings.connection.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_empty_url_rejected() {
        let config = Configuration::new().with("url", "  ");
        let err = LdapSettings::from_configuration(&config).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unknown_scheme_rejected() {
        let config = Configuration::new().with("url", "http://dc1:389");
        assert!(LdapSettings::from_configuration(&config).is_err());
    }

    #[test]
    fn test_ssl_upgrades_url() {
        let config = Configuration::new()
            .with("url", "ldap://dc1.corp.local:636")
            .with("ssl", "true");
        let settings = LdapSettings::from_configuration(&config).unwrap();
        assert_eq!(settings.connection.url, "ldaps://dc1.corp.local:636");
        assert!(settings.connection.is_ldaps());
    }

    #[test]
    fn test_group_name_attribute_fallback() {
        let config = Configuration::new().with("search.attr.user.name", "sAMAccountName");
        let settings = LdapSettings::from_configuration(&config).unwrap();
        assert_eq!(settings.group_name_attribute, "sAMAccountName");

        let config = config.with("search.attr.group.name", "name");
        let settings = LdapSettings::from_configuration(&config).unwrap();
        assert_eq!(settings.group_name_attribute, "name");
    }

    #[test]
    fn test_member_attribute_list() {
        let config = Configuration::new().with("search.attr.member", "member, uniqueMember");
        let settings = LdapSettings::from_configuration(&config).unwrap();
        assert_eq!(settings.member_attributes, vec!["member", "uniqueMember"]);
    }

    #[test]
    fn test_search_time_limit_rounds_up() {
        let config = Configuration::new().with("directory.search.timeout", "1500");
        let settings = LdapSettings::from_configuration(&config).unwrap();
        assert_eq!(settings.search_time_limit_secs(), 2);
    }

    #[test]
    fn test_invalid_timeout_rejected() {
        let config = Configuration::new().with("directory.search.timeout", "soon");
        assert!(LdapSettings::from_configuration(&config).is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = Configuration::new()
            .with("bind.user", "cn=svc,dc=corp")
            .with("bind.password", "hunter2");
        let settings = LdapSettings::from_configuration(&config).unwrap();
        let debug = format!("{settings:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_target_settings() {
        let config = Configuration::new()
            .with("target.users.dn", "ou=users,ou=system")
            .with("target.groups.dn", "ou=groups,ou=system");
        let settings = TargetSettings::from_configuration(&config).unwrap();

        assert_eq!(settings.connection.url, DEFAULT_URL);
        assert_eq!(settings.connection.bind_dn, "uid=admin,ou=system");
        assert_eq!(settings.placeholder_member, "uid=admin,ou=system");
    }

    #[test]
    fn test_target_settings_require_containers() {
        let config = Configuration::new().with("target.users.dn", "ou=users,ou=system");
        assert!(TargetSettings::from_configuration(&config).is_err());
    }

    #[test]
    fn test_target_ignores_provider_keys() {
        let config = Configuration::new()
            .with("url", "ldap://dc1:389")
            .with("target.users.dn", "ou=users")
            .with("target.groups.dn", "ou=groups")
            .with("target.group.placeholder.member", "cn=nobody");
        let settings = TargetSettings::from_configuration(&config).unwrap();
        assert_eq!(settings.connection.url, DEFAULT_URL);
        assert_eq!(settings.placeholder_member, "cn=nobody");
    }
}
