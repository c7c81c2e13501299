//! Service and daemon configuration.

use crate::error::{ClusterError, ClusterResult};
use crate::registration::WeightAssignment;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Port fleet members serve the remote-control protocol on.
pub const DEFAULT_CONTROL_PORT: u16 = 4444;

/// Port registered nodes serve data on.
pub const DEFAULT_NODE_PORT: u16 = 8001;

/// Role a ring service runs in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Accepts mutations, replicates them and pushes rings to the fleet.
    #[default]
    Master,
    /// Stores rings on behalf of a master.
    Replica,
}

/// Configuration for one ring service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Role this service runs in.
    pub role: Role,

    /// Service name. Ring files are named after it.
    pub service: String,

    /// Address the gRPC server listens on (e.g., "0.0.0.0:8443").
    pub listen_addr: String,

    /// Replica addresses the master replicates to.
    pub replicas: Vec<String>,

    /// Networks registering nodes may use addresses from.
    pub net_filter: Vec<IpNet>,

    /// Patterns tiers after tier0 must match at registration.
    pub tier_filter: Vec<String>,

    /// Directory holding ring and builder files.
    pub ring_dir: PathBuf,

    /// Serve and dial with TLS.
    pub use_tls: bool,

    /// Server certificate (PEM).
    pub cert_file: Option<PathBuf>,

    /// Server key (PEM).
    pub key_file: Option<PathBuf>,

    /// CA used to verify peers (PEM).
    pub ca_file: Option<PathBuf>,

    /// Weight strategy for registering nodes.
    pub weight_assignment: WeightAssignment,

    /// Port fleet members serve remote control on.
    pub control_port: u16,

    /// Port stamped on registered node addresses.
    pub node_port: u16,

    /// Seconds between reconnect attempts for unreachable replicas and
    /// members. Zero disables reconnecting.
    pub reconnect_interval_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            role: Role::Master,
            service: "ring".to_string(),
            listen_addr: "0.0.0.0:8443".to_string(),
            replicas: Vec::new(),
            net_filter: ["10.0.0.0/8", "192.168.0.0/16"]
                .iter()
                .filter_map(|net| net.parse().ok())
                .collect(),
            tier_filter: vec!["z.*".to_string()],
            ring_dir: PathBuf::from("/etc/ringkeeper/ring"),
            use_tls: false,
            cert_file: None,
            key_file: None,
            ca_file: None,
            weight_assignment: WeightAssignment::Default,
            control_port: DEFAULT_CONTROL_PORT,
            node_port: DEFAULT_NODE_PORT,
            reconnect_interval_secs: 30,
        }
    }
}

impl ClusterConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::default()
    }

    /// Reconnect interval, `None` when disabled.
    pub fn reconnect_interval(&self) -> Option<Duration> {
        (self.reconnect_interval_secs > 0).then(|| Duration::from_secs(self.reconnect_interval_secs))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ClusterResult<()> {
        if self.service.is_empty() {
            return Err(ClusterError::Config("service is required".to_string()));
        }

        if self.service.contains(['/', '\\']) {
            return Err(ClusterError::Config(format!(
                "service name '{}' must not contain path separators",
                self.service
            )));
        }

        if self.listen_addr.is_empty() {
            return Err(ClusterError::Config("listen_addr is required".to_string()));
        }

        if self.use_tls
            && (self.cert_file.is_none() || self.key_file.is_none() || self.ca_file.is_none())
        {
            return Err(ClusterError::Config(
                "use_tls requires cert_file, key_file and ca_file".to_string(),
            ));
        }

        if self.role == Role::Master && self.net_filter.is_empty() {
            return Err(ClusterError::Config(
                "net_filter must allow at least one network".to_string(),
            ));
        }

        for pattern in &self.tier_filter {
            regex::Regex::new(pattern).map_err(|e| {
                ClusterError::Config(format!("invalid tier_filter '{pattern}': {e}"))
            })?;
        }

        Ok(())
    }
}

/// Builder for ClusterConfig.
#[derive(Debug, Default)]
pub struct ClusterConfigBuilder {
    config: ClusterConfig,
}

impl ClusterConfigBuilder {
    /// Set the role.
    pub fn role(mut self, role: Role) -> Self {
        self.config.role = role;
        self
    }

    /// Set the service name.
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.config.service = service.into();
        self
    }

    /// Set the listen address.
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Add a replica.
    pub fn replica(mut self, addr: impl Into<String>) -> Self {
        self.config.replicas.push(addr.into());
        self
    }

    /// Set all replicas at once.
    pub fn replicas(mut self, replicas: impl IntoIterator<Item = String>) -> Self {
        self.config.replicas = replicas.into_iter().collect();
        self
    }

    /// Set the allowed registration networks.
    pub fn net_filter(mut self, networks: impl IntoIterator<Item = IpNet>) -> Self {
        self.config.net_filter = networks.into_iter().collect();
        self
    }

    /// Set the tier patterns.
    pub fn tier_filter(mut self, patterns: impl IntoIterator<Item = String>) -> Self {
        self.config.tier_filter = patterns.into_iter().collect();
        self
    }

    /// Set the ring directory.
    pub fn ring_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ring_dir = path.into();
        self
    }

    /// Enable TLS with the given certificate and key.
    pub fn tls(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.config.use_tls = true;
        self.config.cert_file = Some(cert.into());
        self.config.key_file = Some(key.into());
        self
    }

    /// Set the CA file.
    pub fn ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ca_file = Some(path.into());
        self
    }

    /// Set the weight strategy.
    pub fn weight_assignment(mut self, weights: WeightAssignment) -> Self {
        self.config.weight_assignment = weights;
        self
    }

    /// Set the remote-control port.
    pub fn control_port(mut self, port: u16) -> Self {
        self.config.control_port = port;
        self
    }

    /// Set the node port.
    pub fn node_port(mut self, port: u16) -> Self {
        self.config.node_port = port;
        self
    }

    /// Set the reconnect interval in seconds.
    pub fn reconnect_interval_secs(mut self, secs: u64) -> Self {
        self.config.reconnect_interval_secs = secs;
        self
    }

    /// Build the configuration, validating it first.
    pub fn build(self) -> ClusterResult<ClusterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Daemon configuration: one [`ClusterConfig`] per named service.
///
/// ```toml
/// log_filter = "ringkeeper_cluster=debug"
///
/// [services.objects]
/// role = "master"
/// listen_addr = "0.0.0.0:8443"
/// replicas = ["10.0.0.20:8444"]
/// ring_dir = "/var/lib/ringkeeper"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Extra tracing filter directives.
    pub log_filter: Option<String>,

    /// Services keyed by name.
    pub services: BTreeMap<String, ClusterConfig>,
}

impl DaemonConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> ClusterResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClusterError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// Each service takes its name from its table key.
    pub fn from_toml(content: &str) -> ClusterResult<Self> {
        let mut config: DaemonConfig =
            toml::from_str(content).map_err(|e| ClusterError::Config(e.to_string()))?;

        if config.services.is_empty() {
            return Err(ClusterError::Config("no services configured".to_string()));
        }
        for (name, service) in &mut config.services {
            service.service = name.clone();
            service.validate()?;
        }
        Ok(config)
    }
}
