use super::virtualized::{guest_stacks, launch_each, vm_inventory};
use super::{Layout, NodeCore};
use crate::channel::PaneFactory;
use crate::component::{ComponentProcess, GuestAccess};
use crate::config::{
    BridgeConfig, MachineTarget, ProcessConfig, Settings, TunnelConfig,
    VmConfig,
};
use crate::error::{LaunchError, ProvisionError, TeardownError};
use crate::resource::{
    provision_in_order, teardown_in_reverse, Resource, ResourceState,
    TunnelInterface, VirtualMachine, VirtualSwitchBridge,
};
use async_trait::async_trait;

/// The OVS bridge, its optional tunnel and the VMs plugged into it.
struct Fabric {
    bridge: VirtualSwitchBridge,
    tunnel: Option<TunnelInterface>,
    vms: Vec<VirtualMachine>,
}

impl Fabric {
    fn new(
        name: &str,
        machine: &MachineTarget,
        bridge: BridgeConfig,
        vms: Vec<VmConfig>,
        tunnel: Option<TunnelConfig>,
        settings: &Settings,
        panes: &dyn PaneFactory,
    ) -> (Self, Vec<GuestAccess>) {
        let bridge =
            VirtualSwitchBridge::new(name, machine, bridge, settings, panes);
        let tunnel = tunnel.map(|config| {
            TunnelInterface::new(
                name,
                machine,
                bridge.bridge(),
                config,
                settings,
                panes,
            )
        });
        let vms: Vec<_> = vms
            .into_iter()
            .map(|config| {
                VirtualMachine::new(name, machine, config, settings, panes)
            })
            .collect();
        let guests = vms.iter().map(|vm| vm.guest_access(machine)).collect();
        let fabric = Self { bridge, tunnel, vms };
        (fabric, guests)
    }

    /// Bridge first, then two taps per VM, the tunnel and finally the VMs.
    async fn provision(&mut self) -> Result<(), ProvisionError> {
        self.bridge.provision().await?;
        let ids: Vec<_> = self.vms.iter().map(|vm| vm.id()).collect();
        for id in ids {
            self.bridge.add_tap(&format!("tap{}", id)).await?;
            self.bridge.add_tap(&format!("ovstap{}", id)).await?;
        }
        if let Some(tunnel) = &mut self.tunnel {
            tunnel.provision().await?;
        }
        provision_in_order(&mut self.vms).await?;
        Ok(())
    }

    fn inventory(&self) -> Vec<(String, ResourceState)> {
        let mut inventory =
            vec![(self.bridge.name().to_string(), self.bridge.state())];
        inventory.extend(
            self.tunnel
                .iter()
                .map(|tunnel| (tunnel.name().to_string(), tunnel.state())),
        );
        inventory.extend(vm_inventory(&self.vms));
        inventory
    }

    /// Reverse of `provision`; the bridge removes its taps itself.
    async fn teardown(&mut self) -> Vec<TeardownError> {
        let mut errors = teardown_in_reverse(&mut self.vms).await;
        if let Some(tunnel) = &mut self.tunnel {
            if let Err(e) = tunnel.teardown().await {
                tracing::warn!("{}", e);
                errors.push(e);
            }
        }
        if let Err(e) = self.bridge.teardown().await {
            tracing::warn!("{}", e);
            errors.push(e);
        }
        errors
    }
}

/// VMs attached to an OVS bridge, workloads on the guest kernel's stack.
pub struct SwitchedLinuxNode {
    core: NodeCore,
    fabric: Fabric,
}

impl SwitchedLinuxNode {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: &str,
        machine: MachineTarget,
        bridge: BridgeConfig,
        vms: Vec<VmConfig>,
        tunnel: Option<TunnelConfig>,
        processes: Vec<ProcessConfig>,
        settings: &Settings,
        panes: &dyn PaneFactory,
    ) -> Self {
        let (fabric, guests) =
            Fabric::new(name, &machine, bridge, vms, tunnel, settings, panes);
        let core =
            NodeCore::new(name, machine, settings, processes, &guests, panes);
        Self { core, fabric }
    }
}

#[async_trait]
impl Layout for SwitchedLinuxNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    async fn provision(&mut self) -> Result<(), ProvisionError> {
        self.fabric.provision().await
    }

    async fn launch(&mut self) -> Result<(), LaunchError> {
        self.core.launch_workloads(false).await
    }

    fn processes_mut(&mut self) -> Vec<&mut ComponentProcess> {
        self.core.workloads.iter_mut().collect()
    }

    fn inventory(&self) -> Vec<(String, ResourceState)> {
        self.fabric.inventory()
    }

    async fn teardown_resources(&mut self) -> Vec<TeardownError> {
        self.fabric.teardown().await
    }
}

/// VMs attached to an OVS bridge, each running its own data-plane stack.
pub struct SwitchedStackNode {
    core: NodeCore,
    fabric: Fabric,
    stacks: Vec<ComponentProcess>,
}

impl SwitchedStackNode {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: &str,
        machine: MachineTarget,
        bridge: BridgeConfig,
        vms: Vec<VmConfig>,
        stacks: Vec<ProcessConfig>,
        tunnel: Option<TunnelConfig>,
        processes: Vec<ProcessConfig>,
        settings: &Settings,
        panes: &dyn PaneFactory,
    ) -> Self {
        let (fabric, guests) =
            Fabric::new(name, &machine, bridge, vms, tunnel, settings, panes);
        let stacks =
            guest_stacks(name, &machine, stacks, &guests, settings, panes);
        let core =
            NodeCore::new(name, machine, settings, processes, &guests, panes);
        Self {
            core,
            fabric,
            stacks,
        }
    }
}

#[async_trait]
impl Layout for SwitchedStackNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    async fn provision(&mut self) -> Result<(), ProvisionError> {
        self.fabric.provision().await
    }

    async fn launch(&mut self) -> Result<(), LaunchError> {
        let stacks = self.stacks.iter_mut().collect();
        launch_each(&self.core.settings, stacks).await?;
        self.core.launch_workloads(true).await
    }

    fn processes_mut(&mut self) -> Vec<&mut ComponentProcess> {
        self.stacks
            .iter_mut()
            .chain(self.core.workloads.iter_mut())
            .collect()
    }

    fn inventory(&self) -> Vec<(String, ResourceState)> {
        self.fabric.inventory()
    }

    async fn teardown_resources(&mut self) -> Vec<TeardownError> {
        self.fabric.teardown().await
    }
}
