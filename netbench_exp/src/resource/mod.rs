// This module contains the definition of `VirtualSwitchBridge`.
pub mod bridge;

// This module contains the definition of `Container`.
pub mod container;

// This module contains the definition of `TunnelInterface`.
pub mod tunnel;

// This module contains the definition of `VirtualMachine`.
pub mod vm;

// Re-exports.
pub use bridge::VirtualSwitchBridge;
pub use container::Container;
pub use tunnel::TunnelInterface;
pub use vm::{VirtualMachine, VmProfile, VmStep};

use crate::channel::RemoteChannel;
use crate::error::{ChannelError, ProvisionError, TeardownError};
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Nothing was issued yet.
    Created,
    /// Provisioning started but did not complete.
    Partial,
    Provisioned,
    TornDown,
}

impl ResourceState {
    /// Whether some command creating this resource may have reached the
    /// machine.
    pub fn needs_teardown(&self) -> bool {
        matches!(self, Self::Partial | Self::Provisioned)
    }
}

/// What a provisioned resource looks like from the outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub name: String,
    pub addresses: Vec<String>,
}

#[async_trait]
pub trait Resource: Send {
    fn name(&self) -> &str;

    /// Name of the node this resource belongs to.
    fn owner(&self) -> &str;

    fn state(&self) -> ResourceState;

    async fn provision(&mut self) -> Result<ResourceInfo, ProvisionError>;

    /// Best-effort and idempotent: a second call issues nothing.
    async fn teardown(&mut self) -> Result<(), TeardownError>;
}

/// Provisions `resources` one after the other, stopping at the first
/// failure.
pub async fn provision_in_order<R: Resource>(
    resources: &mut [R],
) -> Result<Vec<ResourceInfo>, ProvisionError> {
    let mut infos = Vec::with_capacity(resources.len());
    for resource in resources.iter_mut() {
        infos.push(resource.provision().await?);
    }
    Ok(infos)
}

/// Tears down `resources` last to first. Failures are collected, never
/// propagated.
pub async fn teardown_in_reverse<R: Resource>(
    resources: &mut [R],
) -> Vec<TeardownError> {
    let mut errors = Vec::new();
    for resource in resources.iter_mut().rev() {
        if let Err(e) = resource.teardown().await {
            tracing::warn!("teardown of {} failed: {}", resource.name(), e);
            errors.push(e);
        }
    }
    errors
}

/// Sends `commands` in order on `channel`, attributing a failure to `step`
/// of `resource`.
pub(crate) async fn run_step(
    channel: &mut RemoteChannel,
    resource: &str,
    step: &'static str,
    commands: Vec<(String, Duration)>,
) -> Result<(), ProvisionError> {
    tracing::debug!("{}: {}", resource, step);
    for (command, wait_after) in commands {
        channel.send(command, wait_after).await.map_err(|source| {
            ProvisionError::Step {
                resource: resource.to_string(),
                step,
                source,
            }
        })?;
    }
    Ok(())
}

/// Sends every teardown command even if an earlier one failed, returning
/// the first failure.
pub(crate) async fn run_teardown(
    channel: &mut RemoteChannel,
    resource: &str,
    commands: Vec<(String, Duration)>,
) -> Result<(), TeardownError> {
    let mut first: Option<ChannelError> = None;
    for (command, wait_after) in commands {
        if let Err(e) = channel.send(command, wait_after).await {
            tracing::warn!("{}: {}", resource, e);
            first.get_or_insert(e);
        }
    }
    match first {
        Some(source) => Err(TeardownError::Channel {
            resource: resource.to_string(),
            source,
        }),
        None => Ok(()),
    }
}
