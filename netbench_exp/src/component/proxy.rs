use super::{ComponentProcess, Placement, Role};
use crate::channel::PaneFactory;
use crate::config::{MachineTarget, ProcessConfig, Settings};

/// Shared-memory proxy on the host, bridging the host stack to the guests.
pub fn host_proxy(
    owner: &str,
    machine: &MachineTarget,
    config: ProcessConfig,
    settings: &Settings,
    panes: &dyn PaneFactory,
) -> ComponentProcess {
    let placement = Placement::host(machine);
    ComponentProcess::open(
        Role::Proxy,
        owner,
        machine,
        config,
        placement,
        settings,
        panes,
    )
}

/// Guest side of the proxy, one per VM. The pane name carries the VM id so
/// the per-VM instances don't share a window.
pub fn guest_proxy(
    owner: &str,
    machine: &MachineTarget,
    mut config: ProcessConfig,
    vm: usize,
    placement: Placement,
    settings: &Settings,
    panes: &dyn PaneFactory,
) -> ComponentProcess {
    config.name = format!("{}{}", config.name, vm);
    config.guest = Some(vm);
    ComponentProcess::open(
        Role::Proxy,
        owner,
        machine,
        config,
        placement,
        settings,
        panes,
    )
}
