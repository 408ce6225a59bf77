use anyhow::Context;
use farm_core::config::{Config, HostConfig, HostType};
use farm_core::executor::{Executor, HostExecutor};
use farm_core::host::BootTime;
use farm_core::transport::Transport;
use std::sync::Arc;
use tracing::info;

/// Create a transport for a configured host.
pub fn create_transport(host: &HostConfig) -> anyhow::Result<Arc<dyn Transport>> {
    match host.host_type {
        HostType::Ssh => Ok(Arc::new(farm_ssh::SshTransport::new(host)?)),
        HostType::Local => Ok(Arc::new(farm_local::LocalTransport::new())),
    }
}

/// Executor for a host by name. With a known boot time recovery is skipped.
pub async fn create_executor(
    config: &Config,
    host_name: &str,
    boot_time: Option<u64>,
) -> anyhow::Result<Box<dyn Executor>> {
    let host = config
        .find_host(host_name)
        .with_context(|| format!("No host named '{}' in config", host_name))?;
    let transport = create_transport(host)?;
    let settings = config.defaults.clone();

    let executor = match boot_time {
        Some(secs) => HostExecutor::resume(transport, BootTime(secs), settings),
        None => HostExecutor::connect(transport, settings)
            .await
            .with_context(|| format!("Recovery on '{}' failed", host_name))?,
    };
    info!("Using {} ({}) at boot {}", host.name, host.host_type, executor.boot_time());
    Ok(Box::new(executor))
}
