//! ringkeeper daemon.
//!
//! Runs every ring service named in the configuration file, each as a master
//! or a replica. The file path is the first argument or `RINGKEEPER_CONFIG`.

use anyhow::Context;
use ringkeeper_cluster::{DaemonConfig, ServiceNode};
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = "/etc/ringkeeper/ringkeeper.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("RINGKEEPER_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = DaemonConfig::from_file(&path)
        .with_context(|| format!("loading {}", path.display()))?;

    let mut filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("ringkeeper_cluster=info".parse()?);
    if let Some(directives) = &config.log_filter {
        for directive in directives.split(',').filter(|d| !d.trim().is_empty()) {
            filter = filter.add_directive(directive.trim().parse()?);
        }
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(config = %path.display(), services = config.services.len(), "starting ringkeeper");

    let mut nodes = Vec::with_capacity(config.services.len());
    for (name, service) in config.services {
        let node = ServiceNode::start(service)
            .await
            .with_context(|| format!("starting service {name}"))?;
        nodes.push(node);
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    for node in &mut nodes {
        node.shutdown().await;
    }
    Ok(())
}
