use super::{run_step, run_teardown, Resource, ResourceInfo, ResourceState};
use crate::channel::{PaneFactory, RemoteChannel};
use crate::config::{Delays, MachineTarget, Settings, TunnelConfig};
use crate::error::{ProvisionError, TeardownError};
use crate::util;
use async_trait::async_trait;

/// A vxlan/gre port on an OVS bridge towards the other machine.
pub struct TunnelInterface {
    owner: String,
    name: String,
    bridge: String,
    config: TunnelConfig,
    delays: Delays,
    channel: RemoteChannel,
    state: ResourceState,
}

impl TunnelInterface {
    pub fn new(
        owner: &str,
        machine: &MachineTarget,
        bridge: &str,
        config: TunnelConfig,
        settings: &Settings,
        panes: &dyn PaneFactory,
    ) -> Self {
        let name = util::pane_name(format!("{}-{}", owner, config.name));
        let channel =
            RemoteChannel::open(panes, &name, machine, &settings.delays);
        Self {
            owner: owner.to_string(),
            name,
            bridge: bridge.to_string(),
            config,
            delays: settings.delays,
            channel,
            state: ResourceState::Created,
        }
    }

    fn add_command(&self) -> String {
        let mut command = format!(
            "sudo ovs-vsctl --may-exist add-port {} {} -- set interface {} type={} options:remote_ip={}",
            self.bridge,
            self.config.name,
            self.config.name,
            self.config.kind,
            self.config.remote_ip,
        );
        if let Some(key) = self.config.key {
            command.push_str(&format!(" options:key={}", key));
        }
        command
    }
}

#[async_trait]
impl Resource for TunnelInterface {
    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> &str {
        &self.owner
    }

    fn state(&self) -> ResourceState {
        self.state
    }

    async fn provision(&mut self) -> Result<ResourceInfo, ProvisionError> {
        if self.state != ResourceState::Provisioned {
            self.state = ResourceState::Partial;
            let commands = vec![(self.add_command(), self.delays.short())];
            run_step(&mut self.channel, &self.name, "add-port", commands)
                .await?;
            self.state = ResourceState::Provisioned;
        }
        Ok(ResourceInfo {
            name: self.name.clone(),
            addresses: vec![self.config.remote_ip.clone()],
        })
    }

    async fn teardown(&mut self) -> Result<(), TeardownError> {
        if !self.state.needs_teardown() {
            tracing::debug!("{}: nothing to remove", self.name);
            self.state = ResourceState::TornDown;
            return Ok(());
        }
        self.state = ResourceState::TornDown;
        let command = format!(
            "sudo ovs-vsctl --if-exists del-port {} {}",
            self.bridge, self.config.name
        );
        run_teardown(
            &mut self.channel,
            &self.name,
            vec![(command, self.delays.short())],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RecordingPanes;
    use crate::config::{Topology, TunnelKind};

    #[tokio::test(start_paused = true)]
    async fn tunnel_test() {
        let panes = RecordingPanes::new();
        let machine = MachineTarget {
            address: String::from("10.0.0.1"),
            interface: String::from("enp1s0"),
            pci_id: None,
            topology: Topology::Switched,
            is_remote: false,
            is_server: true,
            ssh_user: None,
        };
        let config = TunnelConfig {
            name: String::from("vx0"),
            kind: TunnelKind::Vxlan,
            remote_ip: String::from("10.0.0.2"),
            key: Some(42),
        };
        let mut tunnel = TunnelInterface::new(
            "server",
            &machine,
            "br0",
            config,
            &Settings::default(),
            &panes,
        );
        tunnel.provision().await.unwrap();
        tunnel.teardown().await.unwrap();
        assert_eq!(
            panes.commands(),
            vec![
                "sudo ovs-vsctl --may-exist add-port br0 vx0 -- set interface vx0 type=vxlan options:remote_ip=10.0.0.2 options:key=42",
                "sudo ovs-vsctl --if-exists del-port br0 vx0",
            ]
        );

        // a second teardown sends nothing
        tunnel.teardown().await.unwrap();
        assert_eq!(panes.sent().len(), 2);
        assert_eq!(tunnel.state(), ResourceState::TornDown);
    }
}
