use super::{launch_options, Layout, NodeCore};
use crate::channel::PaneFactory;
use crate::component::proxy::{guest_proxy, host_proxy};
use crate::component::stack::data_plane_stack;
use crate::component::{ComponentProcess, GuestAccess, Placement};
use crate::config::{
    MachineTarget, ProcessConfig, ProxyConfig, Settings, VmConfig,
};
use crate::error::{LaunchError, ProvisionError, TeardownError};
use crate::resource::{
    provision_in_order, teardown_in_reverse, Resource, ResourceState,
    VirtualMachine,
};
use async_trait::async_trait;

fn build_vms(
    name: &str,
    machine: &MachineTarget,
    vms: Vec<VmConfig>,
    settings: &Settings,
    panes: &dyn PaneFactory,
) -> (Vec<VirtualMachine>, Vec<GuestAccess>) {
    let vms: Vec<_> = vms
        .into_iter()
        .map(|config| {
            VirtualMachine::new(name, machine, config, settings, panes)
        })
        .collect();
    let guests = vms.iter().map(|vm| vm.guest_access(machine)).collect();
    (vms, guests)
}

pub(super) fn vm_inventory(
    vms: &[VirtualMachine],
) -> Vec<(String, ResourceState)> {
    vms.iter()
        .map(|vm| (vm.name().to_string(), vm.state()))
        .collect()
}

/// Workloads inside VMs using the guest kernel's network stack.
pub struct VirtualizedLinuxNode {
    core: NodeCore,
    vms: Vec<VirtualMachine>,
}

impl VirtualizedLinuxNode {
    pub(crate) fn new(
        name: &str,
        machine: MachineTarget,
        vms: Vec<VmConfig>,
        processes: Vec<ProcessConfig>,
        settings: &Settings,
        panes: &dyn PaneFactory,
    ) -> Self {
        let (vms, guests) = build_vms(name, &machine, vms, settings, panes);
        let core =
            NodeCore::new(name, machine, settings, processes, &guests, panes);
        Self { core, vms }
    }
}

#[async_trait]
impl Layout for VirtualizedLinuxNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    async fn provision(&mut self) -> Result<(), ProvisionError> {
        provision_in_order(&mut self.vms).await?;
        Ok(())
    }

    async fn launch(&mut self) -> Result<(), LaunchError> {
        self.core.launch_workloads(false).await
    }

    fn processes_mut(&mut self) -> Vec<&mut ComponentProcess> {
        self.core.workloads.iter_mut().collect()
    }

    fn inventory(&self) -> Vec<(String, ResourceState)> {
        vm_inventory(&self.vms)
    }

    async fn teardown_resources(&mut self) -> Vec<TeardownError> {
        teardown_in_reverse(&mut self.vms).await
    }
}

/// Workloads inside VMs, each VM running its own data-plane stack. An
/// optional proxy pair connects the guests to the host.
pub struct VirtualizedStackNode {
    core: NodeCore,
    vms: Vec<VirtualMachine>,
    stacks: Vec<ComponentProcess>,
    host_proxy: Option<ComponentProcess>,
    guest_proxies: Vec<ComponentProcess>,
}

impl VirtualizedStackNode {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: &str,
        machine: MachineTarget,
        vms: Vec<VmConfig>,
        stacks: Vec<ProcessConfig>,
        proxy: Option<ProxyConfig>,
        processes: Vec<ProcessConfig>,
        settings: &Settings,
        panes: &dyn PaneFactory,
    ) -> Self {
        let (vms, guests) = build_vms(name, &machine, vms, settings, panes);
        let stacks =
            guest_stacks(name, &machine, stacks, &guests, settings, panes);
        let (host_proxy, guest_proxies) = match proxy {
            Some(ProxyConfig { host, guest }) => {
                let host = host_proxy(name, &machine, host, settings, panes);
                let guests = guests
                    .iter()
                    .enumerate()
                    .map(|(index, access)| {
                        guest_proxy(
                            name,
                            &machine,
                            guest.clone(),
                            index,
                            Placement::Guest(access.clone()),
                            settings,
                            panes,
                        )
                    })
                    .collect();
                (Some(host), guests)
            }
            None => (None, Vec::new()),
        };
        let core =
            NodeCore::new(name, machine, settings, processes, &guests, panes);
        Self {
            core,
            vms,
            stacks,
            host_proxy,
            guest_proxies,
        }
    }

}

/// Host proxy first, then per VM its guest proxy and its stack.
fn infrastructure_mut<'a>(
    host_proxy: &'a mut Option<ComponentProcess>,
    guest_proxies: &'a mut [ComponentProcess],
    stacks: &'a mut [ComponentProcess],
) -> Vec<&'a mut ComponentProcess> {
    let mut processes: Vec<&mut ComponentProcess> =
        host_proxy.iter_mut().collect();
    let mut guest_proxies = guest_proxies.iter_mut();
    for stack in stacks.iter_mut() {
        processes.extend(guest_proxies.next());
        processes.push(stack);
    }
    processes
}

/// One stack per VM, placed in VM order.
pub(super) fn guest_stacks(
    name: &str,
    machine: &MachineTarget,
    stacks: Vec<ProcessConfig>,
    guests: &[GuestAccess],
    settings: &Settings,
    panes: &dyn PaneFactory,
) -> Vec<ComponentProcess> {
    stacks
        .into_iter()
        .zip(guests)
        .enumerate()
        .map(|(index, (mut config, access))| {
            // one pane per stack
            config.name = format!("{}{}", config.name, index);
            config.guest = Some(index);
            let placement = Placement::Guest(access.clone());
            data_plane_stack(name, machine, config, placement, settings, panes)
        })
        .collect()
}

/// Launches one process per entry, in order, with the options a stack or
/// proxy gets.
pub(super) async fn launch_each(
    settings: &Settings,
    processes: Vec<&mut ComponentProcess>,
) -> Result<(), LaunchError> {
    for process in processes {
        let options = launch_options(settings, process, true);
        process.launch(&options).await?;
    }
    Ok(())
}

#[async_trait]
impl Layout for VirtualizedStackNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    async fn provision(&mut self) -> Result<(), ProvisionError> {
        provision_in_order(&mut self.vms).await?;
        Ok(())
    }

    async fn launch(&mut self) -> Result<(), LaunchError> {
        let infrastructure = infrastructure_mut(
            &mut self.host_proxy,
            &mut self.guest_proxies,
            &mut self.stacks,
        );
        launch_each(&self.core.settings, infrastructure).await?;
        self.core.launch_workloads(true).await
    }

    fn processes_mut(&mut self) -> Vec<&mut ComponentProcess> {
        let mut processes = infrastructure_mut(
            &mut self.host_proxy,
            &mut self.guest_proxies,
            &mut self.stacks,
        );
        processes.extend(self.core.workloads.iter_mut());
        processes
    }

    fn inventory(&self) -> Vec<(String, ResourceState)> {
        vm_inventory(&self.vms)
    }

    async fn teardown_resources(&mut self) -> Vec<TeardownError> {
        teardown_in_reverse(&mut self.vms).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RecordingPanes;
    use crate::config::Topology;
    use crate::node::Node;
    use std::path::PathBuf;

    fn machine(topology: Topology) -> MachineTarget {
        MachineTarget {
            address: String::from("10.0.0.1"),
            interface: String::from("enp1s0"),
            pci_id: None,
            topology,
            is_remote: false,
            is_server: true,
            ssh_user: None,
        }
    }

    fn vm(id: usize) -> VmConfig {
        VmConfig {
            id,
            cores: "2-3".parse().unwrap(),
            memory_gb: 4,
            n_queues: None,
            manager_dir: PathBuf::from("/home/tas/manager"),
            manager_dir_virt: Some(PathBuf::from("/home/tas/manager")),
            vm_ip: format!("10.0.0.{}", 20 + id),
            stack_ip: Some(format!("10.0.0.{}", 30 + id)),
        }
    }

    fn process(name: &str, guest: Option<usize>) -> ProcessConfig {
        ProcessConfig {
            name: name.to_string(),
            build: None,
            work_dir: PathBuf::from("/home/tas/bench"),
            exec_file: format!("./{}", name),
            args: String::new(),
            workload: None,
            cores: None,
            preload_library: None,
            capture_output: false,
            cleanup_cmd: None,
            artifacts: Default::default(),
            guest,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn proxies_and_stacks_test() {
        let panes = RecordingPanes::new();
        let proxy = ProxyConfig {
            host: process("proxy_host", None),
            guest: process("proxy_guest", None),
        };
        let node = VirtualizedStackNode::new(
            "server",
            machine(Topology::VirtualizedAccelerated),
            vec![vm(0), vm(1)],
            vec![process("tas", None), process("tas", None)],
            Some(proxy),
            vec![process("server", Some(1))],
            &Settings::default(),
            &panes,
        );
        let mut node = Node::VirtualizedStack(node);
        node.setup().await.unwrap();
        assert_eq!(panes.count("start-vm.sh virt-tas"), 2);

        let before = panes.sent().len();
        node.run().await.unwrap();
        let launches: Vec<_> = panes.commands()[before..]
            .iter()
            .filter(|command| command.contains("./"))
            .cloned()
            .collect();
        assert_eq!(
            launches,
            vec![
                "sudo ./proxy_host",
                "sudo ./proxy_guest",
                "sudo ./tas",
                "sudo ./proxy_guest",
                "sudo ./tas",
                "sudo ./server",
            ]
        );
        // the workload runs in the second VM
        assert_eq!(
            panes.sent_to("server-server")[0],
            "ssh -p 2221 tas@localhost"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_stops_in_reverse_test() {
        let panes = RecordingPanes::new();
        panes.respond("whoami", &["tas"]);
        let proxy = ProxyConfig {
            host: process("proxy_host", None),
            guest: process("proxy_guest", None),
        };
        let node = VirtualizedStackNode::new(
            "server",
            machine(Topology::VirtualizedAccelerated),
            vec![vm(0), vm(1)],
            vec![process("tas", None), process("tas", None)],
            Some(proxy),
            vec![process("server", Some(0))],
            &Settings::default(),
            &panes,
        );
        let mut node = Node::VirtualizedStack(node);
        node.setup().await.unwrap();
        node.run().await.unwrap();

        let errors = node.cleanup().await;
        assert!(errors.is_empty());
        let interrupted: Vec<_> = panes
            .sent()
            .into_iter()
            .filter(|sent| sent.keys == "C-c")
            .map(|sent| sent.pane)
            .collect();
        assert_eq!(
            interrupted,
            vec![
                "server-server",
                "server-tas1",
                "server-proxy_guest1",
                "server-tas0",
                "server-proxy_guest0",
                "server-proxy_host",
            ]
        );
        // both guests are shut down after every process was stopped
        let sent = panes.sent();
        let last_interrupt =
            sent.iter().rposition(|sent| sent.keys == "C-c").unwrap();
        let first_shutdown = panes.position("shutdown -h now").unwrap();
        assert!(last_interrupt < first_shutdown);
        assert_eq!(panes.count("shutdown -h now"), 2);
    }
}
