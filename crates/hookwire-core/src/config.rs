//! Reconciliation run configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fingerprint::Namespace;

const DEFAULT_MAX_IN_FLIGHT: usize = 8;

fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

fn default_prune_permissions() -> bool {
    true
}

/// Options for one convergence or teardown run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileConfig {
    /// Skip-and-warn on unresolvable targets and keep going after failures.
    ///
    /// When unset, an unresolvable target aborts the run before any remote
    /// mutation, and a permission failure aborts all notification writes.
    #[serde(default)]
    pub continue_on_error: bool,

    /// Alias or version qualifier for target addresses and permissions.
    #[serde(default)]
    pub qualifier: Option<String>,

    /// Namespace tag identifying entries and statements owned by hookwire.
    #[serde(default)]
    pub namespace: Namespace,

    /// Maximum concurrent bucket writes / target permission tasks.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Revoke superseded owned statements after a successful bucket write.
    #[serde(default = "default_prune_permissions")]
    pub prune_permissions: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            qualifier: None,
            namespace: Namespace::default(),
            max_in_flight: default_max_in_flight(),
            prune_permissions: default_prune_permissions(),
        }
    }
}

impl ReconcileConfig {
    /// Loads configuration from `HOOKWIRE_*` environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `HOOKWIRE_CONTINUE_ON_ERROR`: `true`/`false`
    /// - `HOOKWIRE_QUALIFIER`: alias or version qualifier
    /// - `HOOKWIRE_NAMESPACE`: ownership namespace tag
    /// - `HOOKWIRE_MAX_IN_FLIGHT`: concurrency bound (>= 1)
    /// - `HOOKWIRE_PRUNE_PERMISSIONS`: `true`/`false`
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if a variable is set to an unparseable
    /// value or the resulting configuration fails [`Self::validate`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = EnvSource { lookup };
        let mut config = Self::default();

        if let Some(value) = env.bool("HOOKWIRE_CONTINUE_ON_ERROR")? {
            config.continue_on_error = value;
        }
        config.qualifier = env.string("HOOKWIRE_QUALIFIER");
        if let Some(tag) = env.string("HOOKWIRE_NAMESPACE") {
            config.namespace = Namespace::new(tag)?;
        }
        if let Some(value) = env.usize("HOOKWIRE_MAX_IN_FLIGHT")? {
            config.max_in_flight = value;
        }
        if let Some(value) = env.bool("HOOKWIRE_PRUNE_PERMISSIONS")? {
            config.prune_permissions = value;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if `max_in_flight` is zero or the
    /// qualifier is blank or contains `:`.
    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == 0 {
            return Err(Error::InvalidInput(
                "HOOKWIRE_MAX_IN_FLIGHT must be greater than 0".to_string(),
            ));
        }
        if let Some(qualifier) = &self.qualifier {
            if qualifier.trim().is_empty() || qualifier.contains(':') {
                return Err(Error::InvalidInput(format!(
                    "qualifier must be a non-empty alias or version without ':' (got '{qualifier}')"
                )));
            }
        }
        Ok(())
    }

    /// Appends the configured qualifier to an unqualified target address.
    #[must_use]
    pub fn qualify(&self, address: &str) -> String {
        match &self.qualifier {
            Some(q) => format!("{address}:{q}"),
            None => address.to_string(),
        }
    }
}

struct EnvSource<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvSource<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn usize(&self, name: &str) -> Result<Option<usize>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<usize>()
            .map(Some)
            .map_err(|e| Error::InvalidInput(format!("{name} must be a usize: {e}")))
    }

    fn bool(&self, name: &str) -> Result<Option<bool>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        parse_bool(name, &v).map(Some)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::InvalidInput(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = ReconcileConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ReconcileConfig::default());
        assert!(!config.continue_on_error);
        assert!(config.prune_permissions);
        assert_eq!(config.max_in_flight, 8);
    }

    #[test]
    fn reads_all_variables() {
        let config = ReconcileConfig::from_lookup(lookup(&[
            ("HOOKWIRE_CONTINUE_ON_ERROR", "yes"),
            ("HOOKWIRE_QUALIFIER", " live "),
            ("HOOKWIRE_NAMESPACE", "ns-"),
            ("HOOKWIRE_MAX_IN_FLIGHT", "2"),
            ("HOOKWIRE_PRUNE_PERMISSIONS", "0"),
        ]))
        .unwrap();
        assert!(config.continue_on_error);
        assert_eq!(config.qualifier.as_deref(), Some("live"));
        assert_eq!(config.namespace.as_str(), "ns-");
        assert_eq!(config.max_in_flight, 2);
        assert!(!config.prune_permissions);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(ReconcileConfig::from_lookup(lookup(&[("HOOKWIRE_CONTINUE_ON_ERROR", "maybe")])).is_err());
        assert!(ReconcileConfig::from_lookup(lookup(&[("HOOKWIRE_MAX_IN_FLIGHT", "0")])).is_err());
        assert!(ReconcileConfig::from_lookup(lookup(&[("HOOKWIRE_NAMESPACE", "bad tag")])).is_err());
        assert!(ReconcileConfig::from_lookup(lookup(&[("HOOKWIRE_QUALIFIER", "a:b")])).is_err());
    }

    #[test]
    fn qualify_appends_alias() {
        let mut config = ReconcileConfig::default();
        assert_eq!(config.qualify("arn:fn"), "arn:fn");
        config.qualifier = Some("live".into());
        assert_eq!(config.qualify("arn:fn"), "arn:fn:live");
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: ReconcileConfig =
            serde_json::from_str(r#"{"continueOnError": true}"#).unwrap();
        assert!(config.continue_on_error);
        assert_eq!(config.max_in_flight, 8);
        assert!(config.prune_permissions);
        assert_eq!(config.namespace, Namespace::default());
    }
}
