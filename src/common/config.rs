//! Configuration for a minireg node

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix (`MINIREG__REGISTRY__PORT=8181`)
pub const ENV_PREFIX: &str = "MINIREG";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Registry node config
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            log_level: default_log_level(),
        }
    }
}

/// Registry node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// HTTP listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Interface to bind
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// Instance name, used to derive the node address when `node_addr` is unset
    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    /// Address other nodes reach this node at (e.g. `http://registry-1:8180`)
    #[serde(default)]
    pub node_addr: Option<String>,

    /// Cluster candidates in priority order, identical on every node
    #[serde(default)]
    pub cluster: Vec<String>,

    /// Master to assume when no candidate answers at startup
    #[serde(default)]
    pub default_master: Option<String>,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

fn default_port() -> u16 {
    8180
}
fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}
fn default_instance_id() -> String {
    "registry-1".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_host: default_bind_host(),
            instance_id: default_instance_id(),
            node_addr: None,
            cluster: Vec::new(),
            default_master: None,
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

/// Instance expiry and cluster check timing (seconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Instances silent for longer than this are expired
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Expiry sweep interval
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,

    /// Master health check interval
    #[serde(default = "default_cluster_check_interval")]
    pub cluster_check_interval: u64,
}

fn default_timeout_seconds() -> u64 {
    60
}
fn default_cleanup_interval() -> u64 {
    10
}
fn default_cluster_check_interval() -> u64 {
    10
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            cleanup_interval: default_cleanup_interval(),
            cluster_check_interval: default_cluster_check_interval(),
        }
    }
}

impl Config {
    /// Load from an optional file (YAML or TOML, by extension), then `MINIREG__*` env vars.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("registry.cluster")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.registry.validate()?;
        Ok(config)
    }
}

impl RegistryConfig {
    /// Reject values the node cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.heartbeat.timeout_seconds == 0 {
            return Err(crate::Error::InvalidConfig(
                "heartbeat.timeout_seconds must be > 0".into(),
            ));
        }
        if self.heartbeat.cleanup_interval == 0 {
            return Err(crate::Error::InvalidConfig(
                "heartbeat.cleanup_interval must be > 0".into(),
            ));
        }
        if self.heartbeat.cluster_check_interval == 0 {
            return Err(crate::Error::InvalidConfig(
                "heartbeat.cluster_check_interval must be > 0".into(),
            ));
        }
        if let Some(addr) = &self.node_addr {
            if addr.trim().is_empty() {
                return Err(crate::Error::InvalidConfig("node_addr is empty".into()));
            }
        }
        Ok(())
    }

    /// This node's own address as it appears in the candidate list.
    pub fn self_addr(&self) -> String {
        match &self.node_addr {
            Some(addr) => normalize_addr(addr),
            None => format!("http://{}:{}", self.instance_id, self.port),
        }
    }

    /// Candidate list; a node without a configured cluster forms a cluster of one.
    pub fn candidates(&self) -> Vec<String> {
        if self.cluster.is_empty() {
            vec![self.self_addr()]
        } else {
            self.cluster.iter().map(|a| normalize_addr(a)).collect()
        }
    }

    /// Fallback master when nothing answers at startup.
    pub fn fallback_master(&self) -> String {
        match &self.default_master {
            Some(addr) => normalize_addr(addr),
            None => self
                .candidates()
                .into_iter()
                .next()
                .unwrap_or_else(|| self.self_addr()),
        }
    }

    pub fn bind_addr(&self) -> crate::Result<SocketAddr> {
        format!("{}:{}", self.bind_host, self.port)
            .parse()
            .map_err(|e| crate::Error::InvalidConfig(format!("bind address: {}", e)))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat.cleanup_interval)
    }

    pub fn cluster_check_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat.cluster_check_interval)
    }
}

/// Addresses are compared as strings, so strip trailing slashes.
pub fn normalize_addr(addr: &str) -> String {
    addr.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.heartbeat.timeout_seconds, 60);
        assert_eq!(config.heartbeat.cleanup_interval, 10);
        assert_eq!(config.heartbeat.cluster_check_interval, 10);
        assert_eq!(config.self_addr(), "http://registry-1:8180");
        assert_eq!(config.candidates(), vec!["http://registry-1:8180"]);
        assert_eq!(config.fallback_master(), "http://registry-1:8180");

        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.registry.port, 8180);
    }

    #[test]
    fn test_fallback_master_prefers_explicit_default() {
        let config = RegistryConfig {
            node_addr: Some("http://n2:8181/".into()),
            cluster: vec!["http://n1:8180".into(), "http://n2:8181".into()],
            default_master: Some("http://n2:8181".into()),
            ..Default::default()
        };
        assert_eq!(config.self_addr(), "http://n2:8181");
        assert_eq!(config.fallback_master(), "http://n2:8181");

        let config = RegistryConfig {
            default_master: None,
            ..config
        };
        assert_eq!(config.fallback_master(), "http://n1:8180");
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = RegistryConfig::default();
        config.heartbeat.cluster_check_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_yaml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("registry.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "registry:\n  port: 8181\n  instance_id: registry-2\n  cluster:\n    - http://registry-1:8180\n    - http://registry-2:8181\n  heartbeat:\n    timeout_seconds: 30\n"
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.registry.port, 8181);
        assert_eq!(config.registry.self_addr(), "http://registry-2:8181");
        assert_eq!(config.registry.candidates().len(), 2);
        assert_eq!(config.registry.heartbeat.timeout_seconds, 30);
        assert_eq!(config.registry.heartbeat.cleanup_interval, 10);
        assert_eq!(config.log_level, "info");
    }
}
