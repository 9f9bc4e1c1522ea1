//! Daemon configuration, loaded from a YAML file.
//!
//! ```yaml
//! call_timeout_ms: 5000
//! backends:
//!   - group: ipam.alloc.io
//!     host: 127.0.0.1
//!     port: 9991
//! network_instances:
//!   - name: vpc-1
//!     aggregates: ["10.0.0.0/16", "2001:db8::/48"]
//! vlan_databases:
//!   - name: dc1
//!     range: 100-199
//! ```

use alloc_common::IndexRef;
use alloc_proxy::ServiceTarget;
use alloc_types::{IpPrefix, ParseError, VlanRange};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ParseError> for ConfigError {
    fn from(err: ParseError) -> Self {
        ConfigError::Invalid(err.to_string())
    }
}

/// Address of the backend serving one resource group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub group: String,
    pub host: String,
    pub port: u16,
}

impl BackendConfig {
    pub fn target(&self) -> ServiceTarget {
        ServiceTarget::new(self.host.clone(), self.port)
    }
}

/// A network instance created at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInstanceConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub aggregates: Vec<IpPrefix>,
}

impl NetworkInstanceConfig {
    pub fn index(&self) -> IndexRef {
        IndexRef::new(alloc_ipam::GROUP, self.namespace.clone(), self.name.clone())
    }
}

/// A VLAN database created at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanDatabaseConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    /// `start-end`; the full 1-4094 range when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
}

impl VlanDatabaseConfig {
    pub fn index(&self) -> IndexRef {
        IndexRef::new(alloc_vlan::GROUP, self.namespace.clone(), self.name.clone())
    }

    pub fn range(&self) -> Result<VlanRange, ParseError> {
        match &self.range {
            Some(range) => range.parse(),
            None => Ok(VlanRange::FULL),
        }
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

/// allocd configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Deadline applied to lifecycle calls; 0 disables it.
    pub call_timeout_ms: u64,
    pub backends: Vec<BackendConfig>,
    pub network_instances: Vec<NetworkInstanceConfig>,
    pub vlan_databases: Vec<VlanDatabaseConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5000,
            backends: vec![
                BackendConfig {
                    group: alloc_ipam::GROUP.to_string(),
                    host: "127.0.0.1".to_string(),
                    port: 9991,
                },
                BackendConfig {
                    group: alloc_vlan::GROUP.to_string(),
                    host: "127.0.0.1".to_string(),
                    port: 9992,
                },
            ],
            network_instances: Vec::new(),
            vlan_databases: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Reads and validates a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: DaemonConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks for duplicate groups, duplicate indexes and bad VLAN ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut groups = HashSet::new();
        for backend in &self.backends {
            if !groups.insert(backend.group.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate backend for group {}",
                    backend.group
                )));
            }
        }

        let mut indexes = HashSet::new();
        let all = self
            .network_instances
            .iter()
            .map(NetworkInstanceConfig::index)
            .chain(self.vlan_databases.iter().map(VlanDatabaseConfig::index));
        for index in all {
            if !groups.contains(index.group.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "no backend configured for index {index}"
                )));
            }
            if !indexes.insert(index.clone()) {
                return Err(ConfigError::Invalid(format!("duplicate index {index}")));
            }
        }

        for db in &self.vlan_databases {
            db.range()?;
        }
        Ok(())
    }

    /// Backend target per resource group.
    pub fn targets(&self) -> HashMap<String, ServiceTarget> {
        self.backends
            .iter()
            .map(|b| (b.group.clone(), b.target()))
            .collect()
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_ms > 0).then(|| Duration::from_millis(self.call_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const SAMPLE: &str = r#"
call_timeout_ms: 250
backends:
  - group: ipam.alloc.io
    host: ipam
    port: 9999
  - group: vlan.alloc.io
    host: vlan
    port: 9998
network_instances:
  - name: vpc-1
    aggregates: ["10.0.0.0/16", "2001:db8::/48"]
vlan_databases:
  - name: dc1
    namespace: fabric
    range: 100-199
  - name: dc2
"#;

    #[test]
    fn test_parse_sample() {
        let config = DaemonConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.call_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(
            config.targets().get("ipam.alloc.io"),
            Some(&ServiceTarget::new("ipam", 9999))
        );

        let ni = &config.network_instances[0];
        assert_eq!(ni.index(), IndexRef::new("ipam.alloc.io", "default", "vpc-1"));
        assert_eq!(ni.aggregates.len(), 2);

        assert_eq!(config.vlan_databases[0].range().unwrap().to_string(), "100-199");
        assert_eq!(config.vlan_databases[0].index().nsn.namespace, "fabric");
        assert_eq!(config.vlan_databases[1].range().unwrap(), VlanRange::FULL);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = DaemonConfig::from_yaml("{}").unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.targets().len(), 2);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let dup = "backends:\n  - {group: a, host: x, port: 1}\n  - {group: a, host: y, port: 2}\n";
        assert!(matches!(DaemonConfig::from_yaml(dup), Err(ConfigError::Invalid(_))));

        let range = "vlan_databases:\n  - {name: dc1, range: 200-100}\n";
        assert!(matches!(DaemonConfig::from_yaml(range), Err(ConfigError::Invalid(_))));

        let orphan = "backends: []\nnetwork_instances:\n  - {name: vpc-1}\n";
        assert!(matches!(DaemonConfig::from_yaml(orphan), Err(ConfigError::Invalid(_))));

        let prefix = "network_instances:\n  - {name: vpc-1, aggregates: [10.0.0.0/33]}\n";
        assert!(matches!(DaemonConfig::from_yaml(prefix), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = DaemonConfig::load(file.path()).unwrap();
        assert_eq!(config.network_instances.len(), 1);

        let err = DaemonConfig::load("/nonexistent/allocd.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
