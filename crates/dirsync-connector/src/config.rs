//! Connector Framework configuration
//!
//! A flat map of dotted keys to string values, layered from a default
//! resource, override files and the environment. Providers read their
//! settings from a derived, scoped view of the same map.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use config::{Environment, File, Source, Value};
use tracing::debug;

use crate::error::{ConnectorError, ConnectorResult};

/// Prefix of environment variables that override file configuration.
///
/// `DIRSYNC_PROVIDERS__LDAP1__URL` maps to `providers.ldap1.url`.
pub const ENV_PREFIX: &str = "DIRSYNC";

/// Suffix appended to a password key to name a file holding the password.
pub const PASSWORD_FILE_SUFFIX: &str = ".file";

/// Flat key/value configuration.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    entries: BTreeMap<String, String>,
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.entries {
            if is_sensitive_key(key) {
                map.entry(key, &"***REDACTED***");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}

fn is_sensitive_key(key: &str) -> bool {
    key.contains("password") && !key.ends_with(PASSWORD_FILE_SUFFIX)
}

impl Configuration {
    /// Create an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Set a value, replacing any previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Builder-style [`Configuration::set`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Get a raw value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Get a value or a default when unset.
    #[must_use]
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Whether the key is present (even with an empty value).
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Parse a boolean value (`true`/`false`, case-insensitive).
    pub fn get_bool(&self, key: &str, default: bool) -> ConnectorResult<bool> {
        match self.get(key).map(str::trim) {
            None | Some("") => Ok(default),
            Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
            Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
            Some(v) => Err(ConnectorError::invalid_configuration(format!(
                "{key} must be true or false, got '{v}'"
            ))),
        }
    }

    /// Parse an unsigned integer value.
    pub fn get_u64(&self, key: &str, default: u64) -> ConnectorResult<u64> {
        match self.get(key).map(str::trim) {
            None | Some("") => Ok(default),
            Some(v) => v.parse::<u64>().map_err(|e| {
                ConnectorError::invalid_configuration(format!(
                    "{key} must be an unsigned integer, got '{v}': {e}"
                ))
            }),
        }
    }

    /// Comma-separated list, trimmed, empty items dropped, order kept.
    #[must_use]
    pub fn get_strings(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Comma and/or whitespace separated tokens, order kept.
    #[must_use]
    pub fn get_tokens(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resolve a password.
    ///
    /// A non-empty inline value under `key` wins. Otherwise, when
    /// `key.file` names a file, its contents with trailing whitespace
    /// removed are returned. With neither set the password is empty
    /// (anonymous bind).
    pub fn get_password(&self, key: &str) -> ConnectorResult<String> {
        if let Some(inline) = self.get(key) {
            if !inline.is_empty() {
                return Ok(inline.to_string());
            }
        }

        let file_key = format!("{key}{PASSWORD_FILE_SUFFIX}");
        match self.get(&file_key).map(str::trim) {
            None | Some("") => Ok(String::new()),
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    ConnectorError::invalid_configuration(format!(
                        "could not read password file {path} ({file_key}): {e}"
                    ))
                })?;
                Ok(contents.trim_end().to_string())
            }
        }
    }

    /// Iterate over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Layer `overrides` on top of this configuration.
    pub fn merge(&mut self, overrides: Configuration) {
        self.entries.extend(overrides.entries);
    }

    /// Derive the configuration scoped to `root.name`.
    ///
    /// Keys under `root.name.` appear with that prefix stripped. Keys that
    /// are neither `root` nor under `root.` stay visible as defaults and are
    /// shadowed by scoped keys of the same name. `root.name` itself and the
    /// keys of every other name under `root` are never visible.
    #[must_use]
    pub fn scoped(&self, root: &str, name: &str) -> Configuration {
        let namespace = format!("{root}.");
        let prefix = format!("{root}.{name}.");

        let mut derived = Configuration::new();
        for (key, value) in &self.entries {
            if key != root && !key.starts_with(&namespace) {
                derived.set(key.clone(), value.clone());
            }
        }
        for (key, value) in &self.entries {
            if let Some(stripped) = key.strip_prefix(&prefix) {
                if !stripped.is_empty() {
                    derived.set(stripped, value.clone());
                }
            }
        }
        derived
    }

    /// Collect and flatten a single `config` source.
    ///
    /// Nested tables become dotted keys and arrays become comma-separated
    /// values, so `[target] url = "..."` and `"target.url" = "..."` are
    /// equivalent.
    pub fn from_source(source: &dyn Source) -> ConnectorResult<Self> {
        let collected = source.collect().map_err(|e| {
            ConnectorError::invalid_configuration(format!("failed to read configuration: {e}"))
        })?;

        let mut configuration = Configuration::new();
        for (key, value) in collected {
            flatten_into(&mut configuration, key, value);
        }
        Ok(configuration)
    }

    /// Load the layered configuration.
    ///
    /// Order of precedence, lowest first: the default resource (optional
    /// when missing), each override file (required), then `DIRSYNC_*`
    /// environment variables.
    pub fn load(default_resource: Option<&Path>, overrides: &[PathBuf]) -> ConnectorResult<Self> {
        let mut configuration = Configuration::new();

        if let Some(path) = default_resource {
            let layer = Self::from_source(&File::from(path).required(false))?;
            debug!(path = %path.display(), keys = layer.len(), "Loaded default configuration");
            configuration.merge(layer);
        }

        for path in overrides {
            let layer = Self::from_source(&File::from(path.as_path()).required(true))?;
            debug!(path = %path.display(), keys = layer.len(), "Loaded configuration override");
            configuration.merge(layer);
        }

        let env_layer = Self::from_source(
            &Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )?;
        if !env_layer.is_empty() {
            debug!(keys = env_layer.len(), "Loaded environment overrides");
        }
        configuration.merge(env_layer);

        Ok(configuration)
    }
}

fn flatten_into(configuration: &mut Configuration, key: String, value: Value) {
    if let Ok(table) = value.clone().into_table() {
        for (child, child_value) in table {
            flatten_into(configuration, format!("{key}.{child}"), child_value);
        }
        return;
    }

    if let Ok(items) = value.clone().into_array() {
        let joined: Vec<String> = items
            .into_iter()
            .filter_map(|item| item.into_string().ok())
            .collect();
        configuration.set(key, joined.join(","));
        return;
    }

    if let Ok(scalar) = value.into_string() {
        configuration.set(key, scalar);
    }
}
