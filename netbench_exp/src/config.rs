use crate::error::ConfigError;
use crate::node::Side;
use color_eyre::eyre::WrapErr;
use color_eyre::Report;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

// guest credentials used by the VM/container images
const GUEST_USER: &str = "tas";
const GUEST_PASSWORD: &str = "tas";

// guest network defaults of the VM image
const VM_INTERFACE: &str = "enp0s3";
const STACK_INTERFACE: &str = "enp0s4";
const STACK_PCI_ID: &str = "0000:00:04.0";
// virtio-net device id that vfio-pci has to claim in no-IOMMU mode
const STACK_VENDOR_ID: &str = "1af4 1110";

const DEFAULT_SESSION: &str = "netbench";
const DEFAULT_BRIDGE: &str = "br0";
const DEFAULT_OUTPUT_DIR: &str = "out";

// VM ssh ports are forwarded as 222<id>
const FORWARDED_PORT_BASE: u16 = 2220;
const MAX_FORWARDED_VM_ID: usize = 9;

// highest core id a core list may name
const MAX_CORE: usize = 4095;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    BareMetal,
    Virtualized,
    VirtualizedAccelerated,
    Switched,
    SwitchedAccelerated,
    Containerized,
}

impl Topology {
    /// Name under which the start scripts know this topology.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BareMetal => "bare",
            Self::Virtualized => "virt-linux",
            Self::VirtualizedAccelerated => "virt-tas",
            Self::Switched => "ovs-linux",
            Self::SwitchedAccelerated => "ovs-tas",
            Self::Containerized => "container-tas",
        }
    }

    /// Whether guests of this topology are reached through a forwarded ssh
    /// port on the host instead of their own address.
    pub fn forwards_guest_ssh(&self) -> bool {
        matches!(
            self,
            Self::VirtualizedAccelerated
                | Self::Switched
                | Self::SwitchedAccelerated
        )
    }

    /// Whether workloads run on top of the accelerated data-plane stack.
    pub fn is_accelerated(&self) -> bool {
        matches!(
            self,
            Self::VirtualizedAccelerated
                | Self::SwitchedAccelerated
                | Self::Containerized
        )
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Where a node runs. Built once per experiment and never changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineTarget {
    pub address: String,
    pub interface: String,
    pub pci_id: Option<String>,
    pub topology: Topology,
    pub is_remote: bool,
    pub is_server: bool,
    pub ssh_user: Option<String>,
}

impl MachineTarget {
    pub fn side(&self) -> Side {
        if self.is_server {
            Side::Server
        } else {
            Side::Client
        }
    }

    /// `user@address`, or just the address when no user is configured.
    pub fn ssh_destination(&self) -> String {
        match &self.ssh_user {
            Some(user) => format!("{}@{}", user, self.address),
            None => self.address.clone(),
        }
    }

    /// Command that moves a fresh pane onto this machine, if it is remote.
    pub fn hop(&self) -> Option<String> {
        if self.is_remote {
            Some(format!("ssh {}", self.ssh_destination()))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    pub address: String,
    pub interface: String,
    #[serde(default)]
    pub pci_id: Option<String>,
    #[serde(default)]
    pub is_remote: bool,
    #[serde(default)]
    pub ssh_user: Option<String>,
}

/// Sorted list of CPU cores, written as `0-3,8,10-11`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CoreSet(Vec<usize>);

impl CoreSet {
    pub fn cores(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for CoreSet {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::CoreSet(s.to_string());
        let parse = |core: &str| core.trim().parse::<usize>().ok();
        let mut cores = Vec::new();
        for part in s.split(',') {
            match part.split_once('-') {
                Some((start, end)) => {
                    let start = parse(start).ok_or_else(invalid)?;
                    let end = parse(end).ok_or_else(invalid)?;
                    if start > end || end > MAX_CORE {
                        return Err(invalid());
                    }
                    cores.extend(start..=end);
                }
                None => {
                    let core = parse(part).ok_or_else(invalid)?;
                    if core > MAX_CORE {
                        return Err(invalid());
                    }
                    cores.push(core);
                }
            }
        }
        cores.sort_unstable();
        cores.dedup();
        Ok(Self(cores))
    }
}

impl fmt::Display for CoreSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ranges: Vec<(usize, usize)> = Vec::new();
        for &core in &self.0 {
            match ranges.last_mut() {
                Some((_, end)) if *end + 1 == core => *end = core,
                _ => ranges.push((core, core)),
            }
        }
        let ranges: Vec<_> = ranges
            .into_iter()
            .map(|(start, end)| {
                if start == end {
                    start.to_string()
                } else {
                    format!("{}-{}", start, end)
                }
            })
            .collect();
        write!(f, "{}", ranges.join(","))
    }
}

impl TryFrom<String> for CoreSet {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<CoreSet> for String {
    fn from(cores: CoreSet) -> Self {
        cores.to_string()
    }
}

/// Every fixed wait of the harness, in milliseconds. Commands are not
/// acknowledged by the remote side: completion is assumed once the delay
/// following a send has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Delays {
    pub short_ms: u64,
    pub ssh_login_ms: u64,
    pub password_ms: u64,
    pub vm_boot_ms: u64,
    pub vm_login_ms: u64,
    pub hugepages_ms: u64,
    pub dpdk_bind_ms: u64,
    pub ovs_ms: u64,
    pub container_boot_ms: u64,
    pub compile_ms: u64,
    pub work_dir_ms: u64,
    pub stack_start_ms: u64,
    pub launch_ms: u64,
    pub client_launch_ms: u64,
    pub scp_ms: u64,
    /// Upper bound for any single backend call.
    pub op_timeout_ms: u64,
}

impl Default for Delays {
    fn default() -> Self {
        Self {
            short_ms: 1_000,
            ssh_login_ms: 3_000,
            password_ms: 2_000,
            vm_boot_ms: 30_000,
            vm_login_ms: 5_000,
            hugepages_ms: 5_000,
            dpdk_bind_ms: 3_000,
            ovs_ms: 3_000,
            container_boot_ms: 10_000,
            compile_ms: 1_000,
            work_dir_ms: 3_000,
            stack_start_ms: 5_000,
            launch_ms: 3_000,
            client_launch_ms: 5_000,
            scp_ms: 3_000,
            op_timeout_ms: 60_000,
        }
    }
}

macro_rules! delay {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            pub fn $name(&self) -> Duration {
                Duration::from_millis(self.$field)
            }
        )*
    };
}

impl Delays {
    /// No waiting at all (dry runs). The operation timeout is kept.
    pub fn none() -> Self {
        Self {
            short_ms: 0,
            ssh_login_ms: 0,
            password_ms: 0,
            vm_boot_ms: 0,
            vm_login_ms: 0,
            hugepages_ms: 0,
            dpdk_bind_ms: 0,
            ovs_ms: 0,
            container_boot_ms: 0,
            compile_ms: 0,
            work_dir_ms: 0,
            stack_start_ms: 0,
            launch_ms: 0,
            client_launch_ms: 0,
            scp_ms: 0,
            op_timeout_ms: Self::default().op_timeout_ms,
        }
    }

    delay!(
        short => short_ms,
        ssh_login => ssh_login_ms,
        password => password_ms,
        vm_boot => vm_boot_ms,
        vm_login => vm_login_ms,
        hugepages => hugepages_ms,
        dpdk_bind => dpdk_bind_ms,
        ovs => ovs_ms,
        container_boot => container_boot_ms,
        compile => compile_ms,
        work_dir => work_dir_ms,
        stack_start => stack_start_ms,
        launch => launch_ms,
        client_launch => client_launch_ms,
        scp => scp_ms,
        op_timeout => op_timeout_ms,
    );
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestLogin {
    pub user: String,
    pub password: String,
}

impl Default for GuestLogin {
    fn default() -> Self {
        Self {
            user: GUEST_USER.to_string(),
            password: GUEST_PASSWORD.to_string(),
        }
    }
}

/// Interface layout inside the VM image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestNetwork {
    pub vm_interface: String,
    pub stack_interface: String,
    pub stack_pci_id: String,
    pub vendor_id: String,
}

impl Default for GuestNetwork {
    fn default() -> Self {
        Self {
            vm_interface: VM_INTERFACE.to_string(),
            stack_interface: STACK_INTERFACE.to_string(),
            stack_pci_id: STACK_PCI_ID.to_string(),
            vendor_id: STACK_VENDOR_ID.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmConfig {
    pub id: usize,
    pub cores: CoreSet,
    pub memory_gb: usize,
    #[serde(default)]
    pub n_queues: Option<usize>,
    /// Host directory holding `start-vm.sh`.
    pub manager_dir: PathBuf,
    /// Guest directory holding `dpdk-bind.sh`.
    #[serde(default)]
    pub manager_dir_virt: Option<PathBuf>,
    pub vm_ip: String,
    /// Address of the interface handed to the stack (accelerated only).
    #[serde(default)]
    pub stack_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub id: usize,
    pub name: String,
    pub cores: CoreSet,
    pub memory_gb: usize,
    #[serde(default)]
    pub tunnel: bool,
    /// Host directory holding `start-container.sh`.
    pub manager_dir: PathBuf,
    pub ip: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge")]
    pub name: String,
    pub ovs_ctl: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelKind {
    Vxlan,
    Gre,
}

impl fmt::Display for TunnelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vxlan => write!(f, "vxlan"),
            Self::Gre => write!(f, "gre"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub name: String,
    pub kind: TunnelKind,
    pub remote_ip: String,
    #[serde(default)]
    pub key: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    pub dir: PathBuf,
    pub compile_cmd: String,
    #[serde(default)]
    pub clean_cmd: Option<String>,
}

/// A file produced by a process, relative to its working directory unless
/// absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub remote: PathBuf,
    pub file_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Artifacts {
    /// Primary log; also the `tee` target when output is captured.
    pub out: Option<Artifact>,
    pub hist: Option<Artifact>,
    pub hist_msgs: Option<Artifact>,
    pub hist_open: Option<Artifact>,
}

impl Artifacts {
    /// Every configured artifact, primary log first.
    pub fn configured(&self) -> impl Iterator<Item = &Artifact> {
        [&self.out, &self.hist, &self.hist_msgs, &self.hist_open]
            .into_iter()
            .flatten()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bursty {
    pub rate_normal: u64,
    pub rate_burst: u64,
    pub burst_length: u64,
    pub burst_interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcWorkload {
    pub server_ip: String,
    pub port: u16,
    pub ncores: usize,
    pub msize: usize,
    pub mpending: usize,
    pub nconns: usize,
    #[serde(default)]
    pub open_delay: u64,
    #[serde(default)]
    pub max_msgs_conn: u64,
    #[serde(default)]
    pub max_pend_conns: u64,
    #[serde(default)]
    pub bursty: Option<Bursty>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Workload {
    Echo {
        port: u16,
        ncores: usize,
        max_flows: usize,
        max_bytes: usize,
    },
    Rpc(RpcWorkload),
}

fn default_true() -> bool {
    true
}

fn default_bridge() -> String {
    DEFAULT_BRIDGE.to_string()
}

fn default_session() -> String {
    DEFAULT_SESSION.to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub name: String,
    #[serde(default)]
    pub build: Option<BuildConfig>,
    pub work_dir: PathBuf,
    pub exec_file: String,
    #[serde(default)]
    pub args: String,
    #[serde(default)]
    pub workload: Option<Workload>,
    /// Cores the process is pinned to when it runs on the host.
    #[serde(default)]
    pub cores: Option<CoreSet>,
    #[serde(default)]
    pub preload_library: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub capture_output: bool,
    #[serde(default)]
    pub cleanup_cmd: Option<String>,
    #[serde(default)]
    pub artifacts: Artifacts,
    /// Index of the VM or container the process runs in.
    #[serde(default)]
    pub guest: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: ProcessConfig,
    /// Launched once per VM.
    pub guest: ProcessConfig,
}

/// Per-topology layout of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "topology", rename_all = "kebab-case")]
pub enum NodeConfig {
    BareMetal {
        #[serde(default)]
        stack: Option<ProcessConfig>,
        processes: Vec<ProcessConfig>,
    },
    Virtualized {
        vms: Vec<VmConfig>,
        processes: Vec<ProcessConfig>,
    },
    VirtualizedAccelerated {
        vms: Vec<VmConfig>,
        /// One stack per VM, in VM order.
        stacks: Vec<ProcessConfig>,
        #[serde(default)]
        proxy: Option<ProxyConfig>,
        processes: Vec<ProcessConfig>,
    },
    Switched {
        bridge: BridgeConfig,
        vms: Vec<VmConfig>,
        #[serde(default)]
        tunnel: Option<TunnelConfig>,
        processes: Vec<ProcessConfig>,
    },
    SwitchedAccelerated {
        bridge: BridgeConfig,
        vms: Vec<VmConfig>,
        stacks: Vec<ProcessConfig>,
        #[serde(default)]
        tunnel: Option<TunnelConfig>,
        processes: Vec<ProcessConfig>,
    },
    Containerized {
        containers: Vec<ContainerConfig>,
        stack: ProcessConfig,
        processes: Vec<ProcessConfig>,
    },
}

impl NodeConfig {
    pub fn topology(&self) -> Topology {
        match self {
            Self::BareMetal { .. } => Topology::BareMetal,
            Self::Virtualized { .. } => Topology::Virtualized,
            Self::VirtualizedAccelerated { .. } => {
                Topology::VirtualizedAccelerated
            }
            Self::Switched { .. } => Topology::Switched,
            Self::SwitchedAccelerated { .. } => Topology::SwitchedAccelerated,
            Self::Containerized { .. } => Topology::Containerized,
        }
    }

    pub fn processes(&self) -> &[ProcessConfig] {
        match self {
            Self::BareMetal { processes, .. }
            | Self::Virtualized { processes, .. }
            | Self::VirtualizedAccelerated { processes, .. }
            | Self::Switched { processes, .. }
            | Self::SwitchedAccelerated { processes, .. }
            | Self::Containerized { processes, .. } => processes,
        }
    }

    fn vms(&self) -> &[VmConfig] {
        match self {
            Self::Virtualized { vms, .. }
            | Self::VirtualizedAccelerated { vms, .. }
            | Self::Switched { vms, .. }
            | Self::SwitchedAccelerated { vms, .. } => vms,
            Self::BareMetal { .. } | Self::Containerized { .. } => &[],
        }
    }

    /// Name of every unit that gets its own pane. Each process also gets a
    /// `-savelogs` pane.
    fn pane_units(&self) -> Vec<String> {
        let indexed = |configs: &[ProcessConfig]| -> Vec<String> {
            configs
                .iter()
                .enumerate()
                .map(|(index, config)| format!("{}{}", config.name, index))
                .collect()
        };
        let mut processes: Vec<String> = self
            .processes()
            .iter()
            .map(|process| process.name.clone())
            .collect();
        let mut resources: Vec<String> =
            self.vms().iter().map(|vm| format!("vm{}", vm.id)).collect();
        match self {
            Self::BareMetal { stack, .. } => {
                processes.extend(stack.iter().map(|stack| stack.name.clone()));
            }
            Self::Virtualized { .. } => {}
            Self::VirtualizedAccelerated {
                vms, stacks, proxy, ..
            } => {
                processes.extend(indexed(stacks));
                if let Some(ProxyConfig { host, guest }) = proxy {
                    processes.push(host.name.clone());
                    processes.extend(
                        (0..vms.len())
                            .map(|index| format!("{}{}", guest.name, index)),
                    );
                }
            }
            Self::Switched { bridge, tunnel, .. } => {
                resources.push(bridge.name.clone());
                resources.extend(tunnel.iter().map(|t| t.name.clone()));
            }
            Self::SwitchedAccelerated {
                bridge,
                tunnel,
                stacks,
                ..
            } => {
                processes.extend(indexed(stacks));
                resources.push(bridge.name.clone());
                resources.extend(tunnel.iter().map(|t| t.name.clone()));
            }
            Self::Containerized {
                containers, stack, ..
            } => {
                processes.push(stack.name.clone());
                resources.extend(containers.iter().map(|c| c.name.clone()));
            }
        }
        processes
            .into_iter()
            .flat_map(|name| {
                let logs = format!("{}-savelogs", name);
                vec![name, logs]
            })
            .chain(resources)
            .collect()
    }

    /// Number of guests processes can be placed in.
    fn guests(&self) -> usize {
        match self {
            Self::Containerized { containers, .. } => containers.len(),
            _ => self.vms().len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub machine: MachineConfig,
    pub layout: NodeConfig,
}

impl NodeSpec {
    pub fn target(&self, is_server: bool) -> MachineTarget {
        MachineTarget {
            address: self.machine.address.clone(),
            interface: self.machine.interface.clone(),
            pci_id: self.machine.pci_id.clone(),
            topology: self.layout.topology(),
            is_remote: self.machine.is_remote,
            is_server,
            ssh_user: self.machine.ssh_user.clone(),
        }
    }

    /// Checks everything that can be checked before touching any machine.
    pub fn validate(&self, node: &str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            node: node.to_string(),
            reason,
        };
        let layout = &self.layout;
        let topology = layout.topology();

        if layout.processes().is_empty() {
            return Err(invalid("no workload processes".to_string()));
        }

        // guest placement
        let guests = layout.guests();
        for process in layout.processes() {
            match (topology, process.guest) {
                (Topology::BareMetal, None) => {}
                (Topology::BareMetal, Some(_)) => {
                    return Err(invalid(format!(
                        "process {} names a guest on a bare-metal node",
                        process.name
                    )));
                }
                (_, None) => {
                    return Err(invalid(format!(
                        "process {} must name the guest it runs in",
                        process.name
                    )));
                }
                (_, Some(guest)) if guest >= guests => {
                    return Err(invalid(format!(
                        "process {} placed in guest {} but only {} exist",
                        process.name, guest, guests
                    )));
                }
                _ => {}
            }
        }

        // VMs
        let vms = layout.vms();
        if topology != Topology::BareMetal
            && topology != Topology::Containerized
            && vms.is_empty()
        {
            return Err(invalid("no VMs configured".to_string()));
        }
        let mut ids = HashSet::new();
        for vm in vms {
            if !ids.insert(vm.id) {
                return Err(invalid(format!("duplicate VM id {}", vm.id)));
            }
            if vm.cores.is_empty() {
                return Err(invalid(format!("VM {} has no cores", vm.id)));
            }
            if topology.forwards_guest_ssh() && vm.id > MAX_FORWARDED_VM_ID
            {
                return Err(invalid(format!(
                    "VM {} has no forwarded ssh port (ids 0-{} only)",
                    vm.id, MAX_FORWARDED_VM_ID
                )));
            }
        }

        match layout {
            NodeConfig::VirtualizedAccelerated { vms, stacks, .. }
            | NodeConfig::SwitchedAccelerated { vms, stacks, .. } => {
                if stacks.len() != vms.len() {
                    return Err(invalid(format!(
                        "{} stacks for {} VMs",
                        stacks.len(),
                        vms.len()
                    )));
                }
                if let Some(vm) = vms.iter().find(|vm| vm.stack_ip.is_none())
                {
                    return Err(invalid(format!(
                        "VM {} needs a stack_ip",
                        vm.id
                    )));
                }
                if let Some(vm) =
                    vms.iter().find(|vm| vm.manager_dir_virt.is_none())
                {
                    return Err(invalid(format!(
                        "VM {} needs a manager_dir_virt",
                        vm.id
                    )));
                }
            }
            NodeConfig::Containerized { containers, .. } => {
                if containers.is_empty() {
                    return Err(invalid("no containers configured".into()));
                }
                let mut names = HashSet::new();
                for container in containers {
                    if !names.insert(&container.name) {
                        return Err(invalid(format!(
                            "duplicate container {}",
                            container.name
                        )));
                    }
                }
            }
            _ => {}
        }

        // every unit types into its own pane
        let mut panes = HashSet::new();
        for unit in layout.pane_units() {
            if !panes.insert(crate::util::pane_name(&unit)) {
                return Err(invalid(format!(
                    "more than one unit uses the pane {}",
                    unit
                )));
            }
        }
        Ok(())
    }
}

/// Settings shared by both nodes of an experiment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub delays: Delays,
    pub login: GuestLogin,
    pub network: GuestNetwork,
    pub clean_build: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,
    /// Sweep parameters that produced this experiment.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    pub duration_secs: u64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub clean_build: bool,
    #[serde(default)]
    pub delays: Delays,
    #[serde(default)]
    pub guest_login: GuestLogin,
    #[serde(default)]
    pub guest_network: GuestNetwork,
    pub server: NodeSpec,
    pub client: NodeSpec,
}

impl ExperimentConfig {
    /// Directory the experiment's artifacts land in.
    pub fn exp_path(&self) -> PathBuf {
        self.output_dir.join(&self.name)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            delays: self.delays,
            login: self.guest_login.clone(),
            network: self.guest_network.clone(),
            clean_build: self.clean_build,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteConfig {
    /// tmux session the panes are opened in.
    #[serde(default = "default_session")]
    pub session: String,
    #[serde(rename = "experiment", default)]
    pub experiments: Vec<ExperimentConfig>,
}

impl SuiteConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Report> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("read suite {}", path.display()))?;
        Self::from_toml(&contents)
            .wrap_err_with(|| format!("parse suite {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self, Report> {
        let suite = toml::from_str(contents).wrap_err("toml")?;
        Ok(suite)
    }
}

/// Port the host forwards to the ssh daemon of VM `id`.
pub fn forwarded_ssh_port(id: usize) -> u16 {
    FORWARDED_PORT_BASE + id as u16
}
