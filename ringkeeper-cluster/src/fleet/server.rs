//! Member-side remote-control service.
//!
//! A fleet member implements [`CommandHandler`] and serves it through
//! [`RemoteControlService`], which speaks the `RemoteControl` protocol the
//! master's [`FleetMember`](super::FleetMember) client uses.

use crate::error::ClusterResult;
use crate::fleet::member::ControlReply;
use crate::proto::remote_control_server::RemoteControl;
use crate::proto::{
    Empty, RingUpdateRequest, RingUpdateResult, SoftwareVersion, StatsMsg, StatusMsg,
    UpgradeRequest,
};
use ringkeeper_core::RingVersion;
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// Lifecycle operations a fleet member exposes.
#[tonic::async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    /// Start the member's service.
    async fn start(&self) -> ClusterResult<ControlReply>;

    /// Stop the member's service.
    async fn stop(&self) -> ClusterResult<ControlReply>;

    /// Restart the member's service.
    async fn restart(&self) -> ClusterResult<ControlReply>;

    /// Reload configuration.
    async fn reload(&self) -> ClusterResult<ControlReply>;

    /// Report health.
    async fn health_check(&self) -> ClusterResult<ControlReply>;

    /// Install a ring. Returns the version held before and after.
    async fn ring_update(
        &self,
        ring: Vec<u8>,
        version: RingVersion,
    ) -> ClusterResult<(RingVersion, RingVersion)>;

    /// Opaque stats.
    async fn stats(&self) -> ClusterResult<Vec<u8>>;

    /// Running software version.
    async fn software_version(&self) -> ClusterResult<String>;

    /// Upgrade to `version`.
    async fn upgrade(&self, version: String) -> ClusterResult<ControlReply>;
}

/// gRPC adapter exposing a [`CommandHandler`].
pub struct RemoteControlService<H> {
    handler: Arc<H>,
}

impl<H: CommandHandler> RemoteControlService<H> {
    /// Wrap a handler.
    pub fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }
}

fn status_msg(reply: ControlReply) -> Response<StatusMsg> {
    Response::new(StatusMsg {
        status: reply.status,
        msg: reply.msg,
    })
}

#[tonic::async_trait]
impl<H: CommandHandler> RemoteControl for RemoteControlService<H> {
    async fn start(&self, _request: Request<Empty>) -> Result<Response<StatusMsg>, Status> {
        Ok(status_msg(self.handler.start().await?))
    }

    async fn stop(&self, _request: Request<Empty>) -> Result<Response<StatusMsg>, Status> {
        Ok(status_msg(self.handler.stop().await?))
    }

    async fn restart(&self, _request: Request<Empty>) -> Result<Response<StatusMsg>, Status> {
        Ok(status_msg(self.handler.restart().await?))
    }

    async fn reload(&self, _request: Request<Empty>) -> Result<Response<StatusMsg>, Status> {
        Ok(status_msg(self.handler.reload().await?))
    }

    async fn ring_update(
        &self,
        request: Request<RingUpdateRequest>,
    ) -> Result<Response<RingUpdateResult>, Status> {
        let update = request.into_inner();
        let (old_version, new_version) =
            self.handler.ring_update(update.ring, update.version).await?;
        tracing::debug!(old_version, new_version, "ring update applied");
        Ok(Response::new(RingUpdateResult {
            old_version,
            new_version,
        }))
    }

    async fn stats(&self, _request: Request<Empty>) -> Result<Response<StatsMsg>, Status> {
        let stats = self.handler.stats().await?;
        Ok(Response::new(StatsMsg { stats }))
    }

    async fn health_check(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<StatusMsg>, Status> {
        Ok(status_msg(self.handler.health_check().await?))
    }

    async fn get_software_version(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<SoftwareVersion>, Status> {
        let version = self.handler.software_version().await?;
        Ok(Response::new(SoftwareVersion { version }))
    }

    async fn upgrade_software_version(
        &self,
        request: Request<UpgradeRequest>,
    ) -> Result<Response<StatusMsg>, Status> {
        let version = request.into_inner().version;
        Ok(status_msg(self.handler.upgrade(version).await?))
    }
}
