use super::{run_step, Resource, ResourceInfo, ResourceState};
use crate::channel::{PaneFactory, RemoteChannel};
use crate::component::GuestAccess;
use crate::config::{
    forwarded_ssh_port, Delays, GuestLogin, GuestNetwork, MachineTarget,
    Settings, Topology, VmConfig,
};
use crate::error::{ProvisionError, TeardownError};
use crate::util;
use async_trait::async_trait;
use std::time::Duration;

const START_SCRIPT: &str = "start-vm.sh";
const DPDK_BIND_SCRIPT: &str = "dpdk-bind.sh";
const HUGEPAGES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmProfile {
    /// Plain Linux networking inside the guest.
    Linux,
    /// The guest hands a virtio device to the data-plane stack.
    Accelerated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VmStep {
    Boot,
    Login,
    Hugepages,
    NoIommu,
    Interfaces,
    DpdkBind,
}

impl VmStep {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Boot => "boot",
            Self::Login => "login",
            Self::Hugepages => "hugepages",
            Self::NoIommu => "no-iommu",
            Self::Interfaces => "interfaces",
            Self::DpdkBind => "dpdk-bind",
        }
    }
}

pub struct VirtualMachine {
    owner: String,
    name: String,
    topology: Topology,
    host_interface: String,
    config: VmConfig,
    profile: VmProfile,
    login: GuestLogin,
    network: GuestNetwork,
    delays: Delays,
    channel: RemoteChannel,
    completed: Vec<VmStep>,
    state: ResourceState,
}

impl VirtualMachine {
    pub fn new(
        owner: &str,
        machine: &MachineTarget,
        config: VmConfig,
        settings: &Settings,
        panes: &dyn PaneFactory,
    ) -> Self {
        let name = util::pane_name(format!("{}-vm{}", owner, config.id));
        let channel =
            RemoteChannel::open(panes, &name, machine, &settings.delays);
        let profile = if machine.topology.is_accelerated() {
            VmProfile::Accelerated
        } else {
            VmProfile::Linux
        };
        Self {
            owner: owner.to_string(),
            name,
            topology: machine.topology,
            host_interface: machine.interface.clone(),
            config,
            profile,
            login: settings.login.clone(),
            network: settings.network.clone(),
            delays: settings.delays,
            channel,
            completed: Vec::new(),
            state: ResourceState::Created,
        }
    }

    pub fn id(&self) -> usize {
        self.config.id
    }

    pub fn profile(&self) -> VmProfile {
        self.profile
    }

    /// Provisioning steps that completed, in order.
    pub fn completed(&self) -> &[VmStep] {
        &self.completed
    }

    /// How processes reach this guest from a pane on the host.
    pub fn guest_access(&self, machine: &MachineTarget) -> GuestAccess {
        let (host, port) = if self.topology.forwards_guest_ssh() {
            (String::from("localhost"), Some(forwarded_ssh_port(self.id())))
        } else {
            (self.config.vm_ip.clone(), None)
        };
        GuestAccess {
            name: self.name.clone(),
            user: self.login.user.clone(),
            password: self.login.password.clone(),
            host,
            port,
            jump: machine.hop().map(|_| machine.ssh_destination()),
        }
    }

    /// Brings up each `(ip, interface)` pair inside the guest.
    pub async fn configure_network(
        &mut self,
        bindings: &[(String, String)],
    ) -> Result<(), ProvisionError> {
        let short = self.delays.short();
        let commands = bindings
            .iter()
            .flat_map(|(ip, interface)| {
                vec![
                    (format!("sudo ip addr add {}/24 dev {}", ip, interface), short),
                    (format!("sudo ip link set {} up", interface), short),
                ]
            })
            .collect();
        self.step(VmStep::Interfaces, commands).await
    }

    fn start_command(&self) -> String {
        let mut command = format!(
            "sudo bash {} {} {} {} {} {} vm{} {}",
            START_SCRIPT,
            self.topology.name(),
            self.config.id,
            self.host_interface,
            self.config.cores.len(),
            self.config.memory_gb,
            self.config.id,
            self.config.cores,
        );
        if let Some(queues) = self.config.n_queues {
            command.push_str(&format!(" {}", queues));
        }
        command
    }

    fn bindings(&self) -> Vec<(String, String)> {
        let mut bindings = vec![(
            self.config.vm_ip.clone(),
            self.network.vm_interface.clone(),
        )];
        if self.profile == VmProfile::Accelerated {
            if let Some(stack_ip) = &self.config.stack_ip {
                bindings.push((
                    stack_ip.clone(),
                    self.network.stack_interface.clone(),
                ));
            }
        }
        bindings
    }

    fn steps(&self, step: VmStep) -> Vec<(String, Duration)> {
        let short = self.delays.short();
        match step {
            VmStep::Boot => vec![
                (format!("cd {}", self.config.manager_dir.display()), short),
                (self.start_command(), self.delays.vm_boot()),
            ],
            VmStep::Login => vec![
                (self.login.user.clone(), self.delays.password()),
                (self.login.password.clone(), self.delays.vm_login()),
            ],
            VmStep::Hugepages => vec![
                (
                    String::from("sudo mount -t hugetlbfs nodev /dev/hugepages"),
                    short,
                ),
                (
                    format!(
                        "echo {} | sudo tee /sys/devices/system/node/node*/hugepages/hugepages-2048kB/nr_hugepages",
                        HUGEPAGES
                    ),
                    self.delays.hugepages(),
                ),
            ],
            VmStep::NoIommu => vec![
                (String::from("sudo su -"), short),
                (
                    String::from(
                        "echo 1 > /sys/module/vfio/parameters/enable_unsafe_noiommu_mode",
                    ),
                    short,
                ),
                (
                    format!(
                        "echo \"{}\" > /sys/bus/pci/drivers/vfio-pci/new_id",
                        self.network.vendor_id
                    ),
                    short,
                ),
                (String::from("exit"), short),
            ],
            VmStep::DpdkBind => {
                let dir = self
                    .config
                    .manager_dir_virt
                    .as_ref()
                    .unwrap_or(&self.config.manager_dir);
                let stack_ip = self.config.stack_ip.as_deref().unwrap_or("");
                vec![
                    (format!("cd {}", dir.display()), short),
                    (
                        format!(
                            "bash {} {} {} {}",
                            DPDK_BIND_SCRIPT,
                            stack_ip,
                            self.network.stack_interface,
                            self.network.stack_pci_id
                        ),
                        self.delays.dpdk_bind(),
                    ),
                ]
            }
            // built from the bindings, see `configure_network`
            VmStep::Interfaces => Vec::new(),
        }
    }

    async fn step(
        &mut self,
        step: VmStep,
        commands: Vec<(String, Duration)>,
    ) -> Result<(), ProvisionError> {
        run_step(&mut self.channel, &self.name, step.name(), commands).await?;
        self.completed.push(step);
        Ok(())
    }

    fn info(&self) -> ResourceInfo {
        let mut addresses = vec![self.config.vm_ip.clone()];
        if self.profile == VmProfile::Accelerated {
            addresses.extend(self.config.stack_ip.clone());
        }
        ResourceInfo {
            name: self.name.clone(),
            addresses,
        }
    }
}

#[async_trait]
impl Resource for VirtualMachine {
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
        if self.state == ResourceState::Provisioned {
            return Ok(self.info());
        }
        tracing::info!("booting {} ({:?})", self.name, self.profile);
        self.state = ResourceState::Partial;

        for step in [VmStep::Boot, VmStep::Login] {
            let commands = self.steps(step);
            self.step(step, commands).await?;
        }
        if self.profile == VmProfile::Accelerated {
            for step in [VmStep::Hugepages, VmStep::NoIommu] {
                let commands = self.steps(step);
                self.step(step, commands).await?;
            }
        }
        let bindings = self.bindings();
        self.configure_network(&bindings).await?;
        if self.profile == VmProfile::Accelerated {
            let commands = self.steps(VmStep::DpdkBind);
            self.step(VmStep::DpdkBind, commands).await?;
        }

        self.state = ResourceState::Provisioned;
        Ok(self.info())
    }

    async fn teardown(&mut self) -> Result<(), TeardownError> {
        if !self.state.needs_teardown() {
            tracing::debug!("{}: nothing to remove", self.name);
            self.state = ResourceState::TornDown;
            return Ok(());
        }
        self.state = ResourceState::TornDown;

        // only shut down if the pane is really inside the guest; otherwise
        // the shutdown would hit the host
        let marker = format!("__{}_whoami__", self.name);
        let user = self
            .channel
            .send_and_confirm("whoami", &marker, self.delays.short())
            .await
            .map_err(|source| TeardownError::Channel {
                resource: self.name.clone(),
                source,
            })?;
        if user.trim() != self.login.user {
            tracing::warn!(
                "{}: pane is logged in as {:?}, not shutting down",
                self.name,
                user
            );
            return Err(TeardownError::NotInGuest {
                resource: self.name.clone(),
                user: Some(user).filter(|user| !user.is_empty()),
            });
        }

        tracing::info!("shutting down {}", self.name);
        self.channel
            .send("sudo shutdown -h now", self.delays.password())
            .await
            .map_err(|source| TeardownError::Channel {
                resource: self.name.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RecordingPanes;
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

    fn vm_config(id: usize) -> VmConfig {
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

    #[tokio::test(start_paused = true)]
    async fn linux_provision_test() {
        let panes = RecordingPanes::new();
        let settings = Settings::default();
        let machine = machine(Topology::Virtualized);
        let mut vm = VirtualMachine::new(
            "server",
            &machine,
            vm_config(0),
            &settings,
            &panes,
        );
        assert_eq!(vm.profile(), VmProfile::Linux);

        let info = vm.provision().await.unwrap();
        assert_eq!(info.addresses, vec!["10.0.0.20"]);
        assert_eq!(vm.state(), ResourceState::Provisioned);
        assert_eq!(
            vm.completed(),
            &[VmStep::Boot, VmStep::Login, VmStep::Interfaces]
        );
        assert_eq!(
            panes.sent_to("server-vm0"),
            vec![
                "cd /home/tas/manager",
                "sudo bash start-vm.sh virt-linux 0 enp1s0 2 4 vm0 2-3",
                "tas",
                "tas",
                "sudo ip addr add 10.0.0.20/24 dev enp0s3",
                "sudo ip link set enp0s3 up",
            ]
        );
        // the guest is reached through its own address
        let access = vm.guest_access(&machine);
        assert_eq!(access.ssh_command(), "ssh tas@10.0.0.20");
    }

    #[tokio::test(start_paused = true)]
    async fn accelerated_provision_test() {
        let panes = RecordingPanes::new();
        let settings = Settings::default();
        let machine = machine(Topology::SwitchedAccelerated);
        let mut config = vm_config(1);
        config.n_queues = Some(4);
        let mut vm =
            VirtualMachine::new("client", &machine, config, &settings, &panes);

        let info = vm.provision().await.unwrap();
        assert_eq!(info.addresses, vec!["10.0.0.21", "10.0.0.31"]);
        assert_eq!(
            vm.completed(),
            &[
                VmStep::Boot,
                VmStep::Login,
                VmStep::Hugepages,
                VmStep::NoIommu,
                VmStep::Interfaces,
                VmStep::DpdkBind
            ]
        );
        let sent = panes.sent_to("client-vm1");
        assert_eq!(
            sent[1],
            "sudo bash start-vm.sh ovs-tas 1 enp1s0 2 4 vm1 2-3 4"
        );
        assert_eq!(
            sent.last().map(String::as_str),
            Some("bash dpdk-bind.sh 10.0.0.31 enp0s4 0000:00:04.0")
        );
        let access = vm.guest_access(&machine);
        assert_eq!(access.ssh_command(), "ssh -p 2221 tas@localhost");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_step_test() {
        let panes = RecordingPanes::new();
        panes.fail_on("sudo su -");
        let settings = Settings::default();
        let machine = machine(Topology::VirtualizedAccelerated);
        let mut vm = VirtualMachine::new(
            "server",
            &machine,
            vm_config(0),
            &settings,
            &panes,
        );

        let error = vm.provision().await.unwrap_err();
        assert!(matches!(
            error,
            ProvisionError::Step {
                step: "no-iommu",
                ..
            }
        ));
        assert_eq!(vm.state(), ResourceState::Partial);
        assert_eq!(
            vm.completed(),
            &[VmStep::Boot, VmStep::Login, VmStep::Hugepages]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_test() {
        let panes = RecordingPanes::new();
        panes.respond("whoami", &["tas"]);
        let settings = Settings::default();
        let machine = machine(Topology::Virtualized);
        let mut vm = VirtualMachine::new(
            "server",
            &machine,
            vm_config(0),
            &settings,
            &panes,
        );

        // nothing was booted: nothing to shut down
        vm.teardown().await.unwrap();
        assert!(panes.sent().is_empty());

        let mut vm = VirtualMachine::new(
            "server",
            &machine,
            vm_config(0),
            &settings,
            &panes,
        );
        vm.provision().await.unwrap();
        vm.teardown().await.unwrap();
        assert_eq!(panes.count("sudo shutdown -h now"), 1);

        // second teardown issues nothing
        let before = panes.sent().len();
        vm.teardown().await.unwrap();
        assert_eq!(panes.sent().len(), before);
        assert_eq!(vm.state(), ResourceState::TornDown);
    }

    #[tokio::test(start_paused = true)]
    async fn host_shutdown_guard_test() {
        let panes = RecordingPanes::new();
        // the VM never came up: the pane is still a host shell
        panes.respond("whoami", &["root"]);
        let settings = Settings::default();
        let machine = machine(Topology::Virtualized);
        let mut vm = VirtualMachine::new(
            "server",
            &machine,
            vm_config(0),
            &settings,
            &panes,
        );
        vm.provision().await.unwrap();

        let error = vm.teardown().await.unwrap_err();
        assert!(matches!(
            error,
            TeardownError::NotInGuest { user: Some(ref user), .. } if user == "root"
        ));
        assert_eq!(panes.count("shutdown"), 0);
    }
}
