//! Remote-control client for one fleet member.

use crate::error::{ClusterError, ClusterResult};
use crate::proto::remote_control_client::RemoteControlClient;
use crate::proto::{Empty, RingUpdateRequest, StatusMsg, UpgradeRequest};
use crate::transport::{self, Transport, DIAL_TIMEOUT};
use ringkeeper_core::{NodeId, RingVersion};
use std::time::Duration;
use tokio::sync::RwLock;
use tonic::transport::Channel;

/// Deadline for health checks.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Deadline for lifecycle commands and ring pushes.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Whether a member has an open channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel.
    Disconnected,
    /// Channel open.
    Connected,
}

/// A member's reply to a lifecycle command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlReply {
    /// Whether the member reports success.
    pub status: bool,
    /// Free-form message from the member.
    pub msg: String,
}

impl From<StatusMsg> for ControlReply {
    fn from(msg: StatusMsg) -> Self {
        Self {
            status: msg.status,
            msg: msg.msg,
        }
    }
}

#[derive(Debug, Default)]
struct MemberState {
    client: Option<RemoteControlClient<Channel>>,
    ring_version: RingVersion,
    active: bool,
    fail_count: u32,
}

impl MemberState {
    fn client(&self, addr: &str) -> ClusterResult<RemoteControlClient<Channel>> {
        self.client
            .clone()
            .ok_or_else(|| ClusterError::NotConnected(addr.to_string()))
    }
}

/// Client for a fleet member's remote-control service.
///
/// Health checks share the member's lock; every other call holds it
/// exclusively, so commands to one member never interleave.
#[derive(Debug)]
pub struct FleetMember {
    id: NodeId,
    addr: String,
    transport: Transport,
    state: RwLock<MemberState>,
}

impl FleetMember {
    /// Create a disconnected member.
    pub fn new(id: NodeId, addr: impl Into<String>, transport: Transport) -> Self {
        Self {
            id,
            addr: addr.into(),
            transport,
            state: RwLock::new(MemberState::default()),
        }
    }

    /// Ring node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Remote-control address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Open a channel to the member.
    pub async fn connect(&self) -> ClusterResult<()> {
        let mut state = self.state.write().await;
        let channel = self.transport.connect(&self.addr, DIAL_TIMEOUT).await?;
        state.client = Some(RemoteControlClient::new(channel));
        tracing::debug!(member = %self.addr, "fleet member connected");
        Ok(())
    }

    /// Drop the channel.
    pub async fn disconnect(&self) {
        self.state.write().await.client = None;
    }

    /// Whether a channel is open.
    pub async fn connection_state(&self) -> ConnectionState {
        if self.state.read().await.client.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Last ring version the member confirmed.
    pub async fn ring_version(&self) -> RingVersion {
        self.state.read().await.ring_version
    }

    /// Whether the member last reported itself running.
    pub async fn active(&self) -> bool {
        self.state.read().await.active
    }

    /// Consecutive failed ring pushes.
    pub async fn fail_count(&self) -> u32 {
        self.state.read().await.fail_count
    }

    /// Ask the member whether it is healthy.
    pub async fn health_check(&self) -> ClusterResult<ControlReply> {
        let state = self.state.read().await;
        let mut client = state.client(&self.addr)?;
        let reply = transport::call("health check", HEALTH_TIMEOUT, client.health_check(Empty {}))
            .await?;
        Ok(reply.into())
    }

    /// Start the member's service.
    pub async fn start(&self) -> ClusterResult<ControlReply> {
        let mut state = self.state.write().await;
        let mut client = state.client(&self.addr)?;
        let reply: ControlReply =
            transport::call("start", COMMAND_TIMEOUT, client.start(Empty {})).await?.into();
        if reply.status {
            state.active = true;
        }
        Ok(reply)
    }

    /// Stop the member's service.
    pub async fn stop(&self) -> ClusterResult<ControlReply> {
        let mut state = self.state.write().await;
        let mut client = state.client(&self.addr)?;
        let reply: ControlReply =
            transport::call("stop", COMMAND_TIMEOUT, client.stop(Empty {})).await?.into();
        if reply.status {
            state.active = false;
        }
        tracing::info!(member = %self.addr, stopped = reply.status, msg = %reply.msg, "stop requested");
        Ok(reply)
    }

    /// Restart the member's service.
    pub async fn restart(&self) -> ClusterResult<ControlReply> {
        let mut state = self.state.write().await;
        let mut client = state.client(&self.addr)?;
        let reply: ControlReply =
            transport::call("restart", COMMAND_TIMEOUT, client.restart(Empty {})).await?.into();
        state.active = reply.status;
        Ok(reply)
    }

    /// Ask the member to reload its configuration.
    pub async fn reload(&self) -> ClusterResult<ControlReply> {
        let state = self.state.write().await;
        let mut client = state.client(&self.addr)?;
        let reply =
            transport::call("reload", COMMAND_TIMEOUT, client.reload(Empty {})).await?;
        Ok(reply.into())
    }

    /// Push a ring to the member.
    ///
    /// Returns `Ok(false)` without any RPC when the member already confirmed
    /// `version` or something newer. The member must answer with the version
    /// it was sent.
    pub async fn push_ring_update(&self, ring: &[u8], version: RingVersion) -> ClusterResult<bool> {
        let mut state = self.state.write().await;
        if version <= state.ring_version {
            if version < state.ring_version {
                tracing::debug!(
                    member = %self.addr,
                    version,
                    confirmed = state.ring_version,
                    "skipping stale ring push"
                );
            }
            return Ok(false);
        }
        let mut client = state.client(&self.addr)?;

        let update = RingUpdateRequest {
            version,
            ring: ring.to_vec(),
        };
        let outcome = transport::call("ring update", COMMAND_TIMEOUT, client.ring_update(update))
            .await
            .and_then(|result| {
                if result.new_version == version {
                    Ok(result)
                } else {
                    Err(ClusterError::VersionMismatch {
                        expected: version,
                        actual: result.new_version,
                    })
                }
            });

        match outcome {
            Ok(result) => {
                state.ring_version = state.ring_version.max(result.new_version);
                state.fail_count = 0;
                tracing::debug!(
                    member = %self.addr,
                    old_version = result.old_version,
                    new_version = result.new_version,
                    "member confirmed ring"
                );
                Ok(true)
            }
            Err(e) => {
                state.fail_count += 1;
                Err(e)
            }
        }
    }

    /// Raw stats reported by the member.
    pub async fn stats(&self) -> ClusterResult<Vec<u8>> {
        let state = self.state.write().await;
        let mut client = state.client(&self.addr)?;
        let reply = transport::call("stats", COMMAND_TIMEOUT, client.stats(Empty {})).await?;
        Ok(reply.stats)
    }

    /// Software version the member runs.
    pub async fn software_version(&self) -> ClusterResult<String> {
        let state = self.state.write().await;
        let mut client = state.client(&self.addr)?;
        let reply = transport::call(
            "software version",
            COMMAND_TIMEOUT,
            client.get_software_version(Empty {}),
        )
        .await?;
        Ok(reply.version)
    }

    /// Ask the member to upgrade itself to `target`.
    pub async fn upgrade_software_version(&self, target: &str) -> ClusterResult<ControlReply> {
        let state = self.state.write().await;
        let mut client = state.client(&self.addr)?;
        let request = UpgradeRequest {
            version: target.to_string(),
        };
        let reply = transport::call(
            "software upgrade",
            COMMAND_TIMEOUT,
            client.upgrade_software_version(request),
        )
        .await?;
        tracing::info!(member = %self.addr, version = %target, status = reply.status, "upgrade requested");
        Ok(reply.into())
    }
}
