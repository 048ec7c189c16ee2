// This module contains the definition of `BareMetalNode`.
mod bare;

// This module contains the definition of `ContainerizedStackNode`.
mod containerized;

// This module contains the definition of `SwitchedLinuxNode` and
// `SwitchedStackNode`.
mod switched;

// This module contains the definition of `VirtualizedLinuxNode` and
// `VirtualizedStackNode`.
mod virtualized;

// Re-exports.
pub use bare::BareMetalNode;
pub use containerized::ContainerizedStackNode;
pub use switched::{SwitchedLinuxNode, SwitchedStackNode};
pub use virtualized::{VirtualizedLinuxNode, VirtualizedStackNode};

use crate::channel::PaneFactory;
use crate::component::{
    client, server, ComponentProcess, GuestAccess, LaunchOptions, Placement,
    Role,
};
use crate::config::{
    MachineTarget, NodeConfig, NodeSpec, ProcessConfig, Settings, Topology,
};
use crate::error::{
    ConfigError, LaunchError, NodeError, PartialRetrievalError,
    ProvisionError, TeardownError,
};
use crate::resource::ResourceState;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing_futures::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Server,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Uninitialized,
    Ready,
    Running,
    LogsSaved,
    TornDown,
}

/// What every node variant shares: its machine, its settings and the
/// workload processes (servers or clients).
pub struct NodeCore {
    name: String,
    machine: MachineTarget,
    settings: Settings,
    state: NodeState,
    workloads: Vec<ComponentProcess>,
}

impl NodeCore {
    fn new(
        name: &str,
        machine: MachineTarget,
        settings: &Settings,
        processes: Vec<ProcessConfig>,
        guests: &[GuestAccess],
        panes: &dyn PaneFactory,
    ) -> Self {
        let workloads = processes
            .into_iter()
            .map(|config| {
                let placement = match config.guest.and_then(|g| guests.get(g))
                {
                    Some(guest) => Placement::Guest(guest.clone()),
                    None => Placement::host(&machine),
                };
                if machine.is_server {
                    server::benchmark_server(
                        name, &machine, config, placement, settings, panes,
                    )
                } else {
                    client::benchmark_client(
                        name, &machine, config, placement, settings, panes,
                    )
                }
            })
            .collect();
        Self {
            name: name.to_string(),
            machine,
            settings: settings.clone(),
            state: NodeState::Uninitialized,
            workloads,
        }
    }

    /// Servers start one after the other; clients start together and are
    /// all waited for before the first failure (if any) is returned.
    async fn launch_workloads(
        &mut self,
        accelerated: bool,
    ) -> Result<(), LaunchError> {
        let options: Vec<_> = self
            .workloads
            .iter()
            .map(|process| launch_options(&self.settings, process, accelerated))
            .collect();
        if self.machine.is_server {
            for (process, options) in self.workloads.iter_mut().zip(&options)
            {
                process.launch(options).await?;
            }
            Ok(())
        } else {
            launch_concurrently(&mut self.workloads, &options).await
        }
    }
}

/// Decides the command prefixes of a process: accelerated workloads run
/// elevated with the stack's library preloaded, stacks and proxies always
/// run elevated, and only processes on the host are pinned.
pub fn launch_options(
    settings: &Settings,
    process: &ComponentProcess,
    accelerated: bool,
) -> LaunchOptions {
    let role = process.role();
    let workload = matches!(role, Role::Server | Role::Client);
    let preload_library = if accelerated && workload {
        process.config().preload_library.clone()
    } else {
        None
    };
    let pin_cores = if process.placement().is_host() {
        process.config().cores.clone()
    } else {
        None
    };
    LaunchOptions {
        sudo: accelerated || !workload,
        preload_library,
        pin_cores,
        clean_build: settings.clean_build,
    }
}

async fn launch_concurrently(
    processes: &mut [ComponentProcess],
    options: &[LaunchOptions],
) -> Result<(), LaunchError> {
    let launches =
        processes
            .iter_mut()
            .zip(options)
            .map(|(process, options)| {
                let span = tracing::info_span!("launch", process = process.name());
                async move { process.launch(options).await }.instrument(span)
            });
    for result in join_all(launches).await {
        let () = result?;
    }
    Ok(())
}

/// Stops `processes` last to first.
async fn stop_in_reverse(
    processes: Vec<&mut ComponentProcess>,
) -> Vec<TeardownError> {
    let mut errors = Vec::new();
    for process in processes.into_iter().rev() {
        if let Err(e) = process.stop().await {
            tracing::warn!("stopping {} failed: {}", process.name(), e);
            errors.push(e);
        }
    }
    errors
}

/// The part of a node that differs per topology.
#[async_trait]
trait Layout: Send {
    fn core(&self) -> &NodeCore;

    fn core_mut(&mut self) -> &mut NodeCore;

    async fn provision(&mut self) -> Result<(), ProvisionError>;

    async fn launch(&mut self) -> Result<(), LaunchError>;

    /// Every process, in launch order.
    fn processes_mut(&mut self) -> Vec<&mut ComponentProcess>;

    /// Every resource with its current state.
    fn inventory(&self) -> Vec<(String, ResourceState)>;

    /// Teardown of the resources only; processes are stopped before.
    async fn teardown_resources(&mut self) -> Vec<TeardownError>;
}

pub enum Node {
    BareMetal(BareMetalNode),
    VirtualizedLinux(VirtualizedLinuxNode),
    VirtualizedStack(VirtualizedStackNode),
    SwitchedLinux(SwitchedLinuxNode),
    SwitchedStack(SwitchedStackNode),
    ContainerizedStack(ContainerizedStackNode),
}

impl Node {
    /// Validates `spec` and builds the node. Nothing is sent to any machine.
    pub fn new(
        name: &str,
        spec: NodeSpec,
        is_server: bool,
        settings: &Settings,
        panes: &dyn PaneFactory,
    ) -> Result<Self, ConfigError> {
        spec.validate(name)?;
        let machine = spec.target(is_server);
        let node = match spec.layout {
            NodeConfig::BareMetal { stack, processes } => {
                Self::BareMetal(BareMetalNode::new(
                    name, machine, stack, processes, settings, panes,
                ))
            }
            NodeConfig::Virtualized { vms, processes } => {
                Self::VirtualizedLinux(VirtualizedLinuxNode::new(
                    name, machine, vms, processes, settings, panes,
                ))
            }
            NodeConfig::VirtualizedAccelerated {
                vms,
                stacks,
                proxy,
                processes,
            } => Self::VirtualizedStack(VirtualizedStackNode::new(
                name, machine, vms, stacks, proxy, processes, settings, panes,
            )),
            NodeConfig::Switched {
                bridge,
                vms,
                tunnel,
                processes,
            } => Self::SwitchedLinux(SwitchedLinuxNode::new(
                name, machine, bridge, vms, tunnel, processes, settings, panes,
            )),
            NodeConfig::SwitchedAccelerated {
                bridge,
                vms,
                stacks,
                tunnel,
                processes,
            } => Self::SwitchedStack(SwitchedStackNode::new(
                name, machine, bridge, vms, stacks, tunnel, processes,
                settings, panes,
            )),
            NodeConfig::Containerized {
                containers,
                stack,
                processes,
            } => Self::ContainerizedStack(ContainerizedStackNode::new(
                name, machine, containers, stack, processes, settings, panes,
            )),
        };
        Ok(node)
    }

    fn layout(&self) -> &dyn Layout {
        match self {
            Self::BareMetal(node) => node,
            Self::VirtualizedLinux(node) => node,
            Self::VirtualizedStack(node) => node,
            Self::SwitchedLinux(node) => node,
            Self::SwitchedStack(node) => node,
            Self::ContainerizedStack(node) => node,
        }
    }

    fn layout_mut(&mut self) -> &mut dyn Layout {
        match self {
            Self::BareMetal(node) => node,
            Self::VirtualizedLinux(node) => node,
            Self::VirtualizedStack(node) => node,
            Self::SwitchedLinux(node) => node,
            Self::SwitchedStack(node) => node,
            Self::ContainerizedStack(node) => node,
        }
    }

    pub fn name(&self) -> &str {
        &self.layout().core().name
    }

    pub fn machine(&self) -> &MachineTarget {
        &self.layout().core().machine
    }

    pub fn topology(&self) -> Topology {
        self.machine().topology
    }

    pub fn side(&self) -> Side {
        self.machine().side()
    }

    pub fn state(&self) -> NodeState {
        self.layout().core().state
    }

    fn set_state(&mut self, state: NodeState) {
        self.layout_mut().core_mut().state = state;
    }

    fn invalid(&self, operation: &'static str) -> NodeError {
        NodeError::InvalidState {
            node: self.name().to_string(),
            operation,
            state: self.state(),
        }
    }

    /// Every resource of the node with its current state.
    pub fn inventory(&self) -> Vec<(String, ResourceState)> {
        self.layout().inventory()
    }

    /// Resources that may exist on the machine right now.
    pub fn leftovers(&self) -> Vec<String> {
        self.inventory()
            .into_iter()
            .filter(|(_, state)| state.needs_teardown())
            .map(|(name, state)| format!("{} ({:?})", name, state))
            .collect()
    }

    /// Provisions every resource. On failure the node stays uninitialized;
    /// whatever was created is left for `cleanup()`.
    pub async fn setup(&mut self) -> Result<(), NodeError> {
        match self.state() {
            NodeState::Uninitialized => {}
            NodeState::TornDown => return Err(self.invalid("setup")),
            _ => {
                tracing::debug!("{} already set up", self.name());
                return Ok(());
            }
        }
        tracing::info!("setting up {} ({})", self.name(), self.topology());
        self.layout_mut().provision().await?;
        self.set_state(NodeState::Ready);
        Ok(())
    }

    pub async fn run(&mut self) -> Result<(), NodeError> {
        if self.state() != NodeState::Ready {
            return Err(self.invalid("run"));
        }
        tracing::info!("running {}", self.name());
        self.layout_mut().launch().await?;
        self.set_state(NodeState::Running);
        Ok(())
    }

    /// Moves the artifacts of every process into `<exp_path>/out/`. Missing
    /// artifacts are returned as warnings.
    pub async fn save_logs(
        &mut self,
        exp_path: &Path,
    ) -> Result<Vec<PartialRetrievalError>, NodeError> {
        if self.state() != NodeState::Running {
            return Err(self.invalid("save logs"));
        }
        let out_dir = exp_path.join("out");
        let mut warnings = Vec::new();
        for process in self.layout_mut().processes_mut() {
            if let Err(e) = process.retrieve_artifacts(&out_dir).await {
                tracing::warn!("{}", e);
                warnings.push(e);
            }
        }
        self.set_state(NodeState::LogsSaved);
        Ok(warnings)
    }

    /// Stops every process and tears down every resource, in reverse order.
    /// Valid from any state and never fails: problems are returned so they
    /// can be reported.
    pub async fn cleanup(&mut self) -> Vec<TeardownError> {
        if self.state() == NodeState::TornDown {
            tracing::debug!("{}: nothing to remove", self.name());
            return Vec::new();
        }
        tracing::info!("cleaning up {}", self.name());
        let layout = self.layout_mut();
        let mut errors = stop_in_reverse(layout.processes_mut()).await;
        errors.extend(layout.teardown_resources().await);
        self.set_state(NodeState::TornDown);
        errors
    }
}

/// Provisions `resources` concurrently; every unit is waited for before the
/// first failure is returned.
async fn provision_concurrently<R: crate::resource::Resource>(
    resources: &mut [R],
) -> Result<(), ProvisionError> {
    let provisions = resources.iter_mut().map(|resource| {
        let span = tracing::info_span!("provision", resource = resource.name());
        async move { resource.provision().await.map(|_| ()) }.instrument(span)
    });
    for result in join_all(provisions).await {
        let () = result?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RecordingPanes;
    use std::path::PathBuf;

    fn spec(layout: &str) -> NodeSpec {
        let spec = format!(
            r#"
            [machine]
            address = "10.0.0.1"
            interface = "enp1s0"

            {}
            "#,
            layout
        );
        toml::from_str(&spec).unwrap()
    }

    const PROCESS: &str = r#"
        [[layout.processes]]
        name = "bench"
        work_dir = "/srv/bench"
        exec_file = "./bench"
        guest = 0
        preload_library = "/lib/libtas_interpose.so"
    "#;

    const VM: &str = r#"
        [[layout.vms]]
        id = 0
        cores = "2-3"
        memory_gb = 4
        manager_dir = "/home/tas/manager"
        manager_dir_virt = "/home/tas/manager"
        vm_ip = "10.0.0.20"
        stack_ip = "10.0.0.21"
    "#;

    const STACK: &str = r#"
        name = "tas"
        work_dir = "/home/tas/tas"
        exec_file = "code/tas/tas"
        cores = "0-1"
    "#;

    /// One spec per topology.
    fn all_topologies() -> Vec<NodeSpec> {
        vec![
            spec(&format!(
                "[layout]\ntopology = \"bare-metal\"\n{}",
                PROCESS.replace("guest = 0", "")
            )),
            spec(&format!(
                "[layout]\ntopology = \"virtualized\"\n{}{}",
                VM, PROCESS
            )),
            spec(&format!(
                "[layout]\ntopology = \"virtualized-accelerated\"\n{}[[layout.stacks]]\n{}{}",
                VM, STACK, PROCESS
            )),
            spec(&format!(
                "[layout]\ntopology = \"switched\"\nbridge = {{ ovs_ctl = \"ovs-ctl\" }}\n{}{}",
                VM, PROCESS
            )),
            spec(&format!(
                "[layout]\ntopology = \"switched-accelerated\"\nbridge = {{ ovs_ctl = \"ovs-ctl\" }}\n{}[[layout.stacks]]\n{}{}",
                VM, STACK, PROCESS
            )),
            spec(&format!(
                r#"[layout]
                topology = "containerized"
                [[layout.containers]]
                id = 0
                name = "c0"
                cores = "4-5"
                memory_gb = 2
                manager_dir = "/home/tas/manager"
                ip = "172.17.0.2"
                [layout.stack]
                {}
                {}"#,
                STACK, PROCESS
            )),
        ]
    }

    #[test]
    fn topologies_test() {
        let panes = RecordingPanes::new();
        let settings = Settings::default();
        let topologies: Vec<_> = all_topologies()
            .into_iter()
            .map(|spec| {
                Node::new("server", spec, true, &settings, &panes)
                    .unwrap()
                    .topology()
            })
            .collect();
        assert_eq!(
            topologies,
            vec![
                Topology::BareMetal,
                Topology::Virtualized,
                Topology::VirtualizedAccelerated,
                Topology::Switched,
                Topology::SwitchedAccelerated,
                Topology::Containerized,
            ]
        );
        // building a node sends nothing
        assert!(panes.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_before_setup_test() {
        let settings = Settings::default();
        for spec in all_topologies() {
            let panes = RecordingPanes::new();
            let mut node =
                Node::new("server", spec, true, &settings, &panes).unwrap();
            let errors = node.cleanup().await;
            assert!(errors.is_empty());
            assert!(panes.sent().is_empty(), "{:?}", node.topology());
            assert_eq!(node.state(), NodeState::TornDown);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn state_machine_test() {
        let panes = RecordingPanes::new();
        let settings = Settings::default();
        let spec = all_topologies().remove(0);
        let mut node = Node::new("server", spec, true, &settings, &panes).unwrap();

        // run before setup
        assert!(matches!(
            node.run().await,
            Err(NodeError::InvalidState { operation: "run", .. })
        ));

        node.setup().await.unwrap();
        node.setup().await.unwrap();
        assert_eq!(node.state(), NodeState::Ready);
        node.run().await.unwrap();
        assert_eq!(node.state(), NodeState::Running);

        let exp_path = PathBuf::from("/nonexistent");
        // no artifacts configured: nothing to save, nothing to warn about
        let warnings = node.save_logs(&exp_path).await.unwrap();
        assert!(warnings.is_empty());
        assert_eq!(node.state(), NodeState::LogsSaved);

        node.cleanup().await;
        assert!(node.setup().await.is_err());
    }

    #[test]
    fn launch_options_test() {
        let panes = RecordingPanes::new();
        let settings = Settings::default();
        let specs = all_topologies();

        // plain bare-metal workload: pinned only if configured, no sudo
        let node =
            Node::new("server", specs[0].clone(), true, &settings, &panes)
                .unwrap();
        if let Node::BareMetal(bare) = &node {
            let options =
                launch_options(&settings, &bare.core().workloads[0], false);
            assert_eq!(options, LaunchOptions::default());
        }

        // accelerated guest workload: elevated, preloaded, never pinned
        let node =
            Node::new("server", specs[4].clone(), true, &settings, &panes)
                .unwrap();
        if let Node::SwitchedStack(switched) = &node {
            let options =
                launch_options(&settings, &switched.core().workloads[0], true);
            assert!(options.sudo);
            assert_eq!(
                options.preload_library,
                Some(PathBuf::from("/lib/libtas_interpose.so"))
            );
            assert_eq!(options.pin_cores, None);
        }
    }
}
