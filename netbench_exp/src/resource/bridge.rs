use super::{run_step, run_teardown, Resource, ResourceInfo, ResourceState};
use crate::channel::{PaneFactory, RemoteChannel};
use crate::config::{BridgeConfig, Delays, MachineTarget, Settings};
use crate::error::{ProvisionError, TeardownError};
use crate::util;
use async_trait::async_trait;
use std::time::Duration;

/// An Open vSwitch bridge that takes over the host address of the physical
/// interface, plus the tap devices attached to it.
pub struct VirtualSwitchBridge {
    owner: String,
    name: String,
    config: BridgeConfig,
    host_address: String,
    host_interface: String,
    delays: Delays,
    channel: RemoteChannel,
    // in insertion order
    taps: Vec<String>,
    state: ResourceState,
}

impl VirtualSwitchBridge {
    pub fn new(
        owner: &str,
        machine: &MachineTarget,
        config: BridgeConfig,
        settings: &Settings,
        panes: &dyn PaneFactory,
    ) -> Self {
        let name = util::pane_name(format!("{}-{}", owner, config.name));
        let channel =
            RemoteChannel::open(panes, &name, machine, &settings.delays);
        Self {
            owner: owner.to_string(),
            name,
            config,
            host_address: machine.address.clone(),
            host_interface: machine.interface.clone(),
            delays: settings.delays,
            channel,
            taps: Vec::new(),
            state: ResourceState::Created,
        }
    }

    pub fn bridge(&self) -> &str {
        &self.config.name
    }

    pub fn taps(&self) -> &[String] {
        &self.taps
    }

    /// Creates tap `tap` and attaches it to the bridge. Adding a tap twice
    /// is a no-op.
    pub async fn add_tap(&mut self, tap: &str) -> Result<(), ProvisionError> {
        if self.state != ResourceState::Provisioned {
            return Err(ProvisionError::Prerequisite {
                resource: tap.to_string(),
                missing: self.name.clone(),
            });
        }
        if self.taps.iter().any(|existing| existing == tap) {
            tracing::debug!("{}: {} already attached", self.name, tap);
            return Ok(());
        }
        // tracked before anything is sent so that teardown removes a tap
        // that was only half created
        self.taps.push(tap.to_string());
        let short = self.delays.short();
        let commands = vec![
            (format!("sudo ip tuntap add mode tap {}", tap), short),
            (format!("sudo ip link set {} up", tap), short),
            (
                format!(
                    "sudo ovs-vsctl --may-exist add-port {} {}",
                    self.config.name, tap
                ),
                short,
            ),
        ];
        run_step(&mut self.channel, &self.name, "add-tap", commands).await
    }

    /// Detaches and deletes tap `tap`. Unknown taps are ignored.
    pub async fn delete_tap(&mut self, tap: &str) -> Result<(), TeardownError> {
        let position = match self.taps.iter().position(|t| t == tap) {
            Some(position) => position,
            None => {
                tracing::debug!("{}: no tap {} to remove", self.name, tap);
                return Ok(());
            }
        };
        self.taps.remove(position);
        let commands = self.delete_tap_commands(tap);
        run_teardown(&mut self.channel, &self.name, commands).await
    }

    fn delete_tap_commands(&self, tap: &str) -> Vec<(String, Duration)> {
        let short = self.delays.short();
        vec![
            (
                format!(
                    "sudo ovs-vsctl --if-exists del-port {} {}",
                    self.config.name, tap
                ),
                short,
            ),
            (format!("sudo ip link del {}", tap), short),
        ]
    }
}

#[async_trait]
impl Resource for VirtualSwitchBridge {
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
            tracing::info!("creating bridge {}", self.config.name);
            self.state = ResourceState::Partial;
            let short = self.delays.short();
            let bridge = &self.config.name;

            let start = vec![(
                format!("sudo {} start", self.config.ovs_ctl.display()),
                self.delays.ovs(),
            )];
            let add = vec![(
                format!("sudo ovs-vsctl --may-exist add-br {}", bridge),
                short,
            )];
            // move the host address from the interface onto the bridge
            let address = vec![
                (
                    format!(
                        "sudo ovs-vsctl --may-exist add-port {} {}",
                        bridge, self.host_interface
                    ),
                    short,
                ),
                (format!("sudo ip addr flush dev {}", self.host_interface), short),
                (
                    format!(
                        "sudo ip addr add {}/24 dev {}",
                        self.host_address, bridge
                    ),
                    short,
                ),
                (format!("sudo ip link set dev {} up", bridge), short),
            ];

            run_step(&mut self.channel, &self.name, "ovs-start", start).await?;
            run_step(&mut self.channel, &self.name, "add-br", add).await?;
            run_step(&mut self.channel, &self.name, "address", address).await?;
            self.state = ResourceState::Provisioned;
        }
        Ok(ResourceInfo {
            name: self.name.clone(),
            addresses: vec![self.host_address.clone()],
        })
    }

    async fn teardown(&mut self) -> Result<(), TeardownError> {
        if !self.state.needs_teardown() {
            tracing::debug!("{}: nothing to remove", self.name);
            self.state = ResourceState::TornDown;
            return Ok(());
        }
        self.state = ResourceState::TornDown;
        tracing::info!("removing bridge {}", self.config.name);

        let short = self.delays.short();
        let mut commands = Vec::new();
        for tap in self.taps.iter().rev() {
            commands.extend(self.delete_tap_commands(tap));
        }
        self.taps.clear();
        commands.extend(vec![
            (
                format!("sudo ovs-vsctl --if-exists del-br {}", self.config.name),
                short,
            ),
            (
                format!("sudo {} stop", self.config.ovs_ctl.display()),
                self.delays.ovs(),
            ),
            // give the host address back to the physical interface
            (
                format!(
                    "sudo ip addr add {}/24 dev {}",
                    self.host_address, self.host_interface
                ),
                short,
            ),
            (format!("sudo ip link set dev {} up", self.host_interface), short),
        ]);
        run_teardown(&mut self.channel, &self.name, commands).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RecordingPanes;
    use crate::config::Topology;
    use std::path::PathBuf;

    fn bridge(panes: &RecordingPanes) -> VirtualSwitchBridge {
        let machine = MachineTarget {
            address: String::from("10.0.0.1"),
            interface: String::from("enp1s0"),
            pci_id: None,
            topology: Topology::Switched,
            is_remote: false,
            is_server: true,
            ssh_user: None,
        };
        let config = BridgeConfig {
            name: String::from("br0"),
            ovs_ctl: PathBuf::from("ovs-ctl"),
        };
        VirtualSwitchBridge::new(
            "server",
            &machine,
            config,
            &Settings::default(),
            panes,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn tap_before_bridge_test() {
        let panes = RecordingPanes::new();
        let mut bridge = bridge(&panes);
        let error = bridge.add_tap("tap0").await.unwrap_err();
        assert!(matches!(error, ProvisionError::Prerequisite { .. }));
        assert!(panes.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn taps_test() {
        let panes = RecordingPanes::new();
        let mut bridge = bridge(&panes);
        bridge.provision().await.unwrap();

        bridge.add_tap("tap0").await.unwrap();
        bridge.add_tap("ovstap0").await.unwrap();
        bridge.add_tap("tap0").await.unwrap();
        assert_eq!(bridge.taps(), &["tap0", "ovstap0"]);
        assert_eq!(panes.count("tuntap add"), 2);

        bridge.delete_tap("tap0").await.unwrap();
        bridge.delete_tap("tap0").await.unwrap();
        assert_eq!(bridge.taps(), &["ovstap0"]);
        assert_eq!(panes.count("ip link del tap0"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_test() {
        let panes = RecordingPanes::new();
        let mut bridge = bridge(&panes);
        bridge.provision().await.unwrap();
        bridge.add_tap("tap0").await.unwrap();
        bridge.add_tap("tap1").await.unwrap();

        let before = panes.sent().len();
        bridge.teardown().await.unwrap();
        let teardown: Vec<_> = panes.commands().split_off(before);
        assert_eq!(
            teardown,
            vec![
                "sudo ovs-vsctl --if-exists del-port br0 tap1",
                "sudo ip link del tap1",
                "sudo ovs-vsctl --if-exists del-port br0 tap0",
                "sudo ip link del tap0",
                "sudo ovs-vsctl --if-exists del-br br0",
                "sudo ovs-ctl stop",
                "sudo ip addr add 10.0.0.1/24 dev enp1s0",
                "sudo ip link set dev enp1s0 up",
            ]
        );

        let before = panes.sent().len();
        bridge.teardown().await.unwrap();
        assert_eq!(panes.sent().len(), before);
    }
}
