//! Directory sessions
//!
//! A [`DirectorySession`] is one bound connection. Sessions are produced by
//! a [`SessionFactory`] so the resolver and writer can be exercised without
//! a server.

use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{
    Ldap, LdapConnAsync, LdapConnSettings, LdapError, Mod, Scope, SearchEntry, SearchOptions,
    SearchResult,
};
use native_tls::{Identity, TlsConnector};
use tracing::{debug, info, warn};

use dirsync_connector::error::{ConnectorError, ConnectorResult};

use crate::config::ConnectionSettings;

/// LDAP result code: invalid credentials.
pub const RC_INVALID_CREDENTIALS: u32 = 49;
/// LDAP result code: no such object.
pub const RC_NO_SUCH_OBJECT: u32 = 32;
/// LDAP result code: entry already exists.
pub const RC_ALREADY_EXISTS: u32 = 68;
/// LDAP result code: attribute or value exists.
pub const RC_ATTRIBUTE_OR_VALUE_EXISTS: u32 = 20;

/// One bound connection to a directory server.
#[async_trait]
pub trait DirectorySession: Send {
    /// Search and return the matching entries.
    ///
    /// A zero `time_limit` means no limit.
    async fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[String],
        time_limit: Duration,
    ) -> ConnectorResult<Vec<SearchEntry>>;

    /// Add an entry.
    async fn add(&mut self, dn: &str, attrs: Vec<(String, Vec<String>)>) -> ConnectorResult<()>;

    /// Add one value to an attribute of an existing entry.
    async fn add_value(&mut self, dn: &str, attr: &str, value: &str) -> ConnectorResult<()>;

    /// Unbind and close.
    async fn unbind(&mut self) -> ConnectorResult<()>;
}

/// Opens bound sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: DirectorySession + 'static;

    /// Connect and bind.
    async fn connect(&self) -> ConnectorResult<Self::Session>;

    /// Endpoint description for logs.
    fn endpoint(&self) -> &str;
}

/// Map an `ldap3` error onto the transport/protocol split.
///
/// Transport failures (I/O, driver channel, end of stream, client timeout)
/// are transient; everything else is permanent.
pub fn classify_ldap_error(context: &str, err: LdapError) -> ConnectorError {
    match err {
        LdapError::Io { .. } => {
            ConnectorError::connection_failed_with_source(format!("{context}: I/O error"), err)
        }
        LdapError::Timeout { .. } => {
            ConnectorError::network_with_source(format!("{context}: operation timed out"), err)
        }
        LdapError::OpSend { .. } | LdapError::ResultRecv { .. } | LdapError::EndOfStream => {
            ConnectorError::network_with_source(format!("{context}: connection lost"), err)
        }
        LdapError::FilterParsing => ConnectorError::InvalidFilter {
            filter: context.to_string(),
        },
        LdapError::LdapResult { result } => {
            if result.rc == RC_INVALID_CREDENTIALS {
                ConnectorError::AuthenticationFailed
            } else {
                ConnectorError::SearchFailed {
                    rc: result.rc,
                    message: result.text,
                }
            }
        }
        other => ConnectorError::Internal {
            message: format!("{context}: {other}"),
            source: Some(Box::new(other)),
        },
    }
}

fn write_result(dn: &str, rc: u32, text: String) -> ConnectorResult<()> {
    match rc {
        0 => Ok(()),
        RC_ALREADY_EXISTS | RC_ATTRIBUTE_OR_VALUE_EXISTS => {
            Err(ConnectorError::ObjectAlreadyExists {
                identifier: dn.to_string(),
            })
        }
        RC_NO_SUCH_OBJECT => Err(ConnectorError::ObjectNotFound {
            identifier: dn.to_string(),
        }),
        _ => Err(ConnectorError::write_failed(format!(
            "write to {dn} failed with code {rc}: {text}"
        ))),
    }
}

fn str_set(values: &[String]) -> HashSet<&str> {
    values.iter().map(String::as_str).collect()
}

/// Session over an `ldap3` connection.
pub struct Ldap3Session {
    ldap: Ldap,
}

#[async_trait]
impl DirectorySession for Ldap3Session {
    async fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[String],
        time_limit: Duration,
    ) -> ConnectorResult<Vec<SearchEntry>> {
        let secs = i32::try_from(time_limit.as_millis().div_ceil(1000)).unwrap_or(i32::MAX);
        let ldap = self
            .ldap
            .with_search_options(SearchOptions::new().timelimit(secs));
        let ldap = if time_limit.is_zero() {
            ldap
        } else {
            ldap.with_timeout(time_limit)
        };

        let SearchResult(entries, result) = ldap
            .search(base, scope, filter, attrs)
            .await
            .map_err(|e| match e {
                LdapError::FilterParsing => ConnectorError::InvalidFilter {
                    filter: filter.to_string(),
                },
                other => classify_ldap_error("search", other),
            })?;

        if result.rc != 0 {
            return Err(ConnectorError::SearchFailed {
                rc: result.rc,
                message: result.text,
            });
        }

        Ok(entries.into_iter().map(SearchEntry::construct).collect())
    }

    async fn add(&mut self, dn: &str, attrs: Vec<(String, Vec<String>)>) -> ConnectorResult<()> {
        let attrs: Vec<(&str, HashSet<&str>)> = attrs
            .iter()
            .map(|(name, values)| (name.as_str(), str_set(values)))
            .collect();

        let result = self
            .ldap
            .add(dn, attrs)
            .await
            .map_err(|e| classify_ldap_error("add", e))?;
        write_result(dn, result.rc, result.text)
    }

    async fn add_value(&mut self, dn: &str, attr: &str, value: &str) -> ConnectorResult<()> {
        let values: HashSet<&str> = std::iter::once(value).collect();
        let result = self
            .ldap
            .modify(dn, vec![Mod::Add(attr, values)])
            .await
            .map_err(|e| classify_ldap_error("modify", e))?;
        write_result(dn, result.rc, result.text)
    }

    async fn unbind(&mut self) -> ConnectorResult<()> {
        self.ldap
            .unbind()
            .await
            .map_err(|e| classify_ldap_error("unbind", e))
    }
}

/// Opens [`Ldap3Session`]s: connect, optional TLS identity, simple bind.
#[derive(Clone)]
pub struct Ldap3SessionFactory {
    settings: ConnectionSettings,
    tls: Option<TlsConnector>,
}

impl std::fmt::Debug for Ldap3SessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ldap3SessionFactory")
            .field("settings", &self.settings)
            .field("client_identity", &self.tls.is_some())
            .finish()
    }
}

impl Ldap3SessionFactory {
    /// Build a factory. A configured keystore is loaded here, so a bad
    /// keystore is a configuration error rather than a runtime one.
    pub fn new(settings: ConnectionSettings) -> ConnectorResult<Self> {
        let tls = match &settings.keystore {
            Some(path) => {
                let bytes = fs::read(path).map_err(|e| {
                    ConnectorError::invalid_configuration(format!(
                        "cannot read keystore {}: {e}",
                        path.display()
                    ))
                })?;
                let password = &settings.keystore_password;
                let identity = Identity::from_pkcs12(&bytes, password).map_err(|e| {
                    ConnectorError::invalid_configuration(format!(
                        "cannot load PKCS#12 keystore {}: {e}",
                        path.display()
                    ))
                })?;
                let connector = TlsConnector::builder()
                    .identity(identity)
                    .build()
                    .map_err(|e| {
                        ConnectorError::invalid_configuration(format!("TLS setup failed: {e}"))
                    })?;
                if !settings.is_ldaps() {
                    warn!(url = %settings.url, "Keystore configured but connection is not ldaps");
                }
                Some(connector)
            }
            None => None,
        };

        Ok(Self { settings, tls })
    }

    #[must_use]
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }
}

#[async_trait]
impl SessionFactory for Ldap3SessionFactory {
    type Session = Ldap3Session;

    async fn connect(&self) -> ConnectorResult<Ldap3Session> {
        let url = &self.settings.url;
        debug!(url = %url, "Connecting to LDAP server");

        let mut conn_settings =
            LdapConnSettings::new().set_conn_timeout(self.settings.connect_timeout);
        if let Some(connector) = &self.tls {
            conn_settings = conn_settings.set_connector(connector.clone());
        }

        let (conn, mut ldap) = LdapConnAsync::with_settings(conn_settings, url)
            .await
            .map_err(|e| classify_ldap_error(&format!("connect to {url}"), e))?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        let bind_dn = &self.settings.bind_dn;
        debug!(bind_dn = %bind_dn, "Performing LDAP bind");

        let result = ldap
            .simple_bind(bind_dn, &self.settings.bind_password)
            .await
            .map_err(|e| classify_ldap_error(&format!("bind as {bind_dn}"), e))?;

        match result.rc {
            0 => {}
            RC_INVALID_CREDENTIALS => return Err(ConnectorError::AuthenticationFailed),
            rc => {
                return Err(ConnectorError::BindFailed {
                    rc,
                    message: result.text,
                })
            }
        }

        info!(url = %url, "LDAP connection established");
        Ok(Ldap3Session { ldap })
    }

    fn endpoint(&self) -> &str {
        &self.settings.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldap3::LdapResult;
    use std::path::PathBuf;

    fn ldap_result(rc: u32, text: &str) -> LdapResult {
        LdapResult {
            rc,
            matched: String::new(),
            text: text.to_string(),
            refs: Vec::new(),
            ctrls: Vec::new(),
        }
    }

    #[test]
    fn test_transport_errors_are_transient() {
        let io = LdapError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(classify_ldap_error("connect", io).is_transient());
        let eof = classify_ldap_error("search", LdapError::EndOfStream);
        assert!(eof.is_transient());
    }

    #[test]
    fn test_protocol_errors_are_permanent() {
        let err = classify_ldap_error("search", LdapError::FilterParsing);
        assert_eq!(err.error_code(), "INVALID_FILTER");
        assert!(err.is_permanent());

        let err = classify_ldap_error(
            "bind",
            LdapError::LdapResult {
                result: ldap_result(49, "invalid credentials"),
            },
        );
        assert!(matches!(err, ConnectorError::AuthenticationFailed));

        let err = classify_ldap_error(
            "search",
            LdapError::LdapResult {
                result: ldap_result(32, "no such object"),
            },
        );
        assert!(matches!(err, ConnectorError::SearchFailed { rc: 32, .. }));
    }

    #[test]
    fn test_write_result_codes() {
        assert!(write_result("cn=a", 0, String::new()).is_ok());
        assert!(matches!(
            write_result("cn=a", 68, String::new()),
            Err(ConnectorError::ObjectAlreadyExists { .. })
        ));
        assert!(matches!(
            write_result("cn=a", 20, String::new()),
            Err(ConnectorError::ObjectAlreadyExists { .. })
        ));
        assert!(matches!(
            write_result("cn=a", 32, String::new()),
            Err(ConnectorError::ObjectNotFound { .. })
        ));
        assert_eq!(
            write_result("cn=a", 50, "denied".to_string())
                .unwrap_err()
                .error_code(),
            "WRITE_FAILED"
        );
    }

    #[test]
    fn test_missing_keystore_is_configuration_error() {
        let settings = ConnectionSettings {
            url: "ldaps://dc1:636".to_string(),
            bind_dn: String::new(),
            bind_password: String::new(),
            keystore: Some(PathBuf::from("/nonexistent/client.p12")),
            keystore_password: String::new(),
            connect_timeout: Duration::from_secs(1),
        };
        let err = Ldap3SessionFactory::new(settings).unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        // Port 9 on loopback is not expected to run an LDAP server.
        let settings = ConnectionSettings {
            url: "ldap://127.0.0.1:9".to_string(),
            bind_dn: String::new(),
            bind_password: String::new(),
            keystore: None,
            keystore_password: String::new(),
            connect_timeout: Duration::from_millis(500),
        };
        let factory = Ldap3SessionFactory::new(settings).unwrap();
        let err = factory.connect().await.err().unwrap();
        assert!(err.is_transient(), "unexpected {err:?}");
    }
}
