//! Provisioning configuration and application settings.
//!
//! A [`ConfigSnapshot`] is an immutable key/value mapping, keys normalized to
//! upper case. It is loaded from YAML, overridden from the environment for
//! known keys, validated, persisted as `bloom.yaml` and finally published
//! through a [`ConfigStore`] for the steps to read.

pub mod settings;
pub mod store;
pub mod validator;

pub use settings::Settings;
pub use store::ConfigStore;
pub use validator::validate;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{BloomError, Result};
use crate::step::parse_step_list;

/// Keys that may be overridden by an environment variable of the same name.
pub const KNOWN_KEYS: &[&str] = &[
    "DOMAIN",
    "FIRST_NODE",
    "CONTROL_PLANE",
    "GPU_NODE",
    "SERVER_IP",
    "JOIN_TOKEN",
    "CLUSTER_DISKS",
    "CLUSTER_PREMOUNTED_DISKS",
    "NO_DISKS_FOR_CLUSTER",
    "SKIP_DISK_CHECK",
    "SELECTED_DISKS",
    "LONGHORN_DISKS",
    "RKE2_VERSION",
    "RKE2_INSTALLATION_URL",
    "ROCM_BASE_URL",
    "METALLB_IP_RANGE",
    "CERT_OPTION",
    "USE_CERT_MANAGER",
    "TLS_CERT",
    "TLS_KEY",
    "OIDC_URL",
    "CLUSTERFORGE_RELEASE",
    "PRELOAD_IMAGES",
    "DISABLED_STEPS",
    "ENABLED_STEPS",
    "SKIP_OS_CHECK",
    "DEMO_STEP_DELAY_MS",
    "DEMO_FAIL_STEP",
];

const REDACTED_KEYS: &[&str] = &["JOIN_TOKEN", "ONEPASS_CONNECT_TOKEN", "TLS_KEY"];
const REDACTED_VALUE: &str = "---redacted---";

fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_uppercase()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ConfigSnapshot {
    values: BTreeMap<String, Value>,
}

impl<'de> Deserialize<'de> for ConfigSnapshot {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let values = BTreeMap::<String, Value>::deserialize(deserializer)?;
        Ok(Self::from_map(values))
    }
}

impl ConfigSnapshot {
    pub fn from_map(values: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            values: values
                .into_iter()
                .map(|(k, v)| (normalize_key(&k), v))
                .collect(),
        }
    }

    pub fn from_pairs<K: AsRef<str>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::from_map(pairs.into_iter().map(|(k, v)| (k.as_ref().to_string(), v)))
    }

    /// Parse a YAML mapping. An empty document yields an empty snapshot.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load_yaml(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BloomError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    pub async fn save_yaml(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(&self.values)?;
        tokio::fs::write(path, content).await?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Copy of `self` with `key` set.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.values.insert(normalize_key(key), value.into());
        self
    }

    /// Replace values of known keys that are present in the process
    /// environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        for key in KNOWN_KEYS {
            if let Some(value) = lookup(key) {
                self.values.insert((*key).to_string(), Value::String(value));
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(&normalize_key(key))
    }

    /// String form of a value. Null and missing keys are `None`.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => Some(
                items
                    .iter()
                    .map(value_to_string)
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            other => Some(value_to_string(other)),
        }
    }

    /// True when the key holds a non-blank value.
    pub fn is_set(&self, key: &str) -> bool {
        self.get_str(key).is_some_and(|v| !v.trim().is_empty())
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => true,
                "false" | "no" | "0" => false,
                _ => default,
            },
            Some(Value::Number(n)) => n.as_i64().map(|n| n != 0).unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Comma-separated string or YAML sequence, blanks dropped.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::String(s)) => parse_step_list(s),
            Some(Value::Array(items)) => items
                .iter()
                .map(value_to_string)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Key/value pairs fit for logging, secrets replaced.
    pub fn redacted_entries(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .map(|(key, value)| {
                let shown = if REDACTED_KEYS.contains(&key.as_str()) {
                    REDACTED_VALUE.to_string()
                } else {
                    value_to_string(value)
                };
                (key.clone(), shown)
            })
            .collect()
    }

    /// Lower-case keyed view served to the wizard for pre-filling its form.
    pub fn to_prefill(&self) -> serde_json::Map<String, Value> {
        self.values
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect()
    }

    /// Writes the "Configuration values:" block to the run log.
    pub fn log_values(&self) {
        info!("Configuration values:");
        if self.values.is_empty() {
            warn!("No configuration values found");
            return;
        }
        for (key, value) in self.redacted_entries() {
            info!("{}: {}", key, value);
        }
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
