//! Admission rules for nodes registering themselves with the ring.
//!
//! A registering node submits its hostname, its interface addresses in CIDR
//! form, its tiers and a hardware identifier. The [`RegistrationPolicy`]
//! decides which addresses are usable, whether the node is already known,
//! whether its tiers are acceptable and what weight it starts with.

use crate::config::ClusterConfig;
use crate::error::{ClusterError, ClusterResult};
use ipnet::IpNet;
use regex::Regex;
use ringkeeper_core::{Node, NodeFilter, NodeSet, NodeSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// Capacity given to nodes whose weight is set at registration.
pub const REGISTERED_CAPACITY: u32 = 1000;

/// How a newly registered node's capacity and active flag are chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightAssignment {
    /// Zero capacity, inactive. An operator brings the node into service.
    #[default]
    Default,
    /// Fixed capacity, active immediately.
    Fixed,
    /// The node's own reported weight, active immediately.
    #[serde(rename = "self")]
    SelfReported,
    /// Zero capacity, inactive. Weights are managed out of band.
    Manual,
}

impl WeightAssignment {
    /// Initial `(capacity, active)` for a registering node.
    pub fn initial_weight(self) -> (u32, bool) {
        match self {
            WeightAssignment::Default | WeightAssignment::Manual => (0, false),
            WeightAssignment::Fixed | WeightAssignment::SelfReported => {
                (REGISTERED_CAPACITY, true)
            }
        }
    }
}

impl fmt::Display for WeightAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WeightAssignment::Default => "default",
            WeightAssignment::Fixed => "fixed",
            WeightAssignment::SelfReported => "self",
            WeightAssignment::Manual => "manual",
        };
        f.write_str(name)
    }
}

impl FromStr for WeightAssignment {
    type Err = ClusterError;

    fn from_str(s: &str) -> ClusterResult<Self> {
        match s {
            "default" => Ok(WeightAssignment::Default),
            "fixed" => Ok(WeightAssignment::Fixed),
            "self" => Ok(WeightAssignment::SelfReported),
            "manual" => Ok(WeightAssignment::Manual),
            other => Err(ClusterError::Config(format!(
                "unknown weight assignment '{other}'"
            ))),
        }
    }
}

/// A self-registration request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    /// Node hostname.
    pub hostname: String,
    /// Interface addresses in CIDR form, e.g. `10.0.0.2/32`.
    pub addrs: Vec<String>,
    /// Tiers, most specific first.
    pub tiers: Vec<String>,
    /// Hardware identifier.
    pub hardware_id: String,
}

impl Registration {
    /// Meta string stored on the node.
    pub fn meta(&self) -> String {
        format!("{}|{}", self.hostname, self.hardware_id)
    }
}

/// Rules applied to [`Registration`]s.
#[derive(Debug, Clone)]
pub struct RegistrationPolicy {
    networks: Vec<IpNet>,
    tier_patterns: Vec<Regex>,
    node_port: u16,
    weights: WeightAssignment,
}

impl RegistrationPolicy {
    /// Create a policy. Tier patterns are anchored to the whole tier.
    pub fn new(
        networks: Vec<IpNet>,
        tier_patterns: &[String],
        node_port: u16,
        weights: WeightAssignment,
    ) -> ClusterResult<Self> {
        let tier_patterns = tier_patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("^(?:{p})$"))
                    .map_err(|e| ClusterError::Config(format!("bad tier pattern '{p}': {e}")))
            })
            .collect::<ClusterResult<Vec<_>>>()?;

        Ok(Self {
            networks,
            tier_patterns,
            node_port,
            weights,
        })
    }

    /// Build the policy a service is configured with.
    pub fn from_config(config: &ClusterConfig) -> ClusterResult<Self> {
        Self::new(
            config.net_filter.clone(),
            &config.tier_filter,
            config.node_port,
            config.weight_assignment,
        )
    }

    /// Weight strategy in use.
    pub fn weights(&self) -> WeightAssignment {
        self.weights
    }

    /// Turn submitted CIDR addresses into node addresses.
    ///
    /// Entries that do not parse are skipped. Loopback, multicast and
    /// unspecified addresses are dropped, as is anything outside the allowed
    /// networks.
    pub fn admit_addresses(&self, addrs: &[String]) -> ClusterResult<Vec<String>> {
        let mut admitted = Vec::new();
        for raw in addrs {
            let net: IpNet = match raw.parse() {
                Ok(net) => net,
                Err(e) => {
                    tracing::debug!(addr = %raw, error = %e, "skipping unparseable address");
                    continue;
                }
            };
            let ip = net.addr();
            if ip.is_loopback() || ip.is_multicast() || ip.is_unspecified() {
                continue;
            }
            if !self.networks.iter().any(|allowed| allowed.contains(&ip)) {
                continue;
            }
            admitted.push(SocketAddr::new(ip, self.node_port).to_string());
        }

        if admitted.is_empty() {
            return Err(ClusterError::Validation(
                "no address within the allowed networks".into(),
            ));
        }
        Ok(admitted)
    }

    /// Find a node already registered under `hostname` at one of `addresses`.
    ///
    /// Ambiguous matches are an error.
    pub fn find_existing<'a, S>(
        &self,
        nodes: &'a S,
        hostname: &str,
        addresses: &[String],
    ) -> ClusterResult<Option<&'a Node>>
    where
        S: NodeSet + ?Sized,
    {
        let mut matches: Vec<&Node> = Vec::new();
        for addr in addresses {
            for node in nodes.filter(&[NodeFilter::address_eq(addr.as_str())]) {
                let node_host = node.meta().split('|').next().unwrap_or_default();
                if node_host == hostname && !matches.iter().any(|m| m.id() == node.id()) {
                    matches.push(node);
                }
            }
        }

        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches[0])),
            n => Err(ClusterError::Validation(format!(
                "{n} nodes match hostname {hostname}"
            ))),
        }
    }

    /// Check tiers for a new node.
    pub fn validate_tiers<S>(&self, nodes: &S, tiers: &[String]) -> ClusterResult<()>
    where
        S: NodeSet + ?Sized,
    {
        let tier0 = match tiers.first() {
            Some(t) if !t.is_empty() => t,
            _ => return Err(ClusterError::Validation("no tier0 given".into())),
        };
        if !nodes.filter(&[NodeFilter::tier_eq(0, tier0.as_str())]).is_empty() {
            return Err(ClusterError::Validation(format!(
                "tier0 '{tier0}' is already in use"
            )));
        }
        if self.tier_patterns.is_empty() {
            return Ok(());
        }
        for tier in &tiers[1..] {
            if !self.tier_patterns.iter().any(|p| p.is_match(tier)) {
                return Err(ClusterError::Validation(format!(
                    "tier '{tier}' does not match any allowed pattern"
                )));
            }
        }
        Ok(())
    }

    /// The node to add for a registration with already admitted addresses.
    pub fn node_spec(&self, registration: &Registration, addresses: Vec<String>) -> NodeSpec {
        let (capacity, active) = self.weights.initial_weight();
        NodeSpec {
            active,
            capacity,
            tiers: registration.tiers.clone(),
            addresses,
            meta: registration.meta(),
            conf: Vec::new(),
        }
    }
}
