use super::{launch_options, Layout, NodeCore};
use crate::channel::PaneFactory;
use crate::component::stack::data_plane_stack;
use crate::component::{ComponentProcess, Placement};
use crate::config::{MachineTarget, ProcessConfig, Settings};
use crate::error::{LaunchError, ProvisionError, TeardownError};
use crate::resource::ResourceState;
use async_trait::async_trait;

/// Workloads directly on the host, optionally on top of the data-plane
/// stack.
pub struct BareMetalNode {
    core: NodeCore,
    stack: Option<ComponentProcess>,
}

impl BareMetalNode {
    pub(crate) fn new(
        name: &str,
        machine: MachineTarget,
        stack: Option<ProcessConfig>,
        processes: Vec<ProcessConfig>,
        settings: &Settings,
        panes: &dyn PaneFactory,
    ) -> Self {
        let stack = stack.map(|config| {
            let placement = Placement::host(&machine);
            data_plane_stack(name, &machine, config, placement, settings, panes)
        });
        let core = NodeCore::new(name, machine, settings, processes, &[], panes);
        Self { core, stack }
    }
}

#[async_trait]
impl Layout for BareMetalNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    async fn provision(&mut self) -> Result<(), ProvisionError> {
        tracing::debug!("{}: nothing to provision", self.core.name);
        Ok(())
    }

    async fn launch(&mut self) -> Result<(), LaunchError> {
        let accelerated = self.stack.is_some();
        if let Some(stack) = &mut self.stack {
            let options = launch_options(&self.core.settings, stack, true);
            stack.launch(&options).await?;
        }
        self.core.launch_workloads(accelerated).await
    }

    fn processes_mut(&mut self) -> Vec<&mut ComponentProcess> {
        self.stack
            .iter_mut()
            .chain(self.core.workloads.iter_mut())
            .collect()
    }

    fn inventory(&self) -> Vec<(String, ResourceState)> {
        Vec::new()
    }

    async fn teardown_resources(&mut self) -> Vec<TeardownError> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RecordingPanes;
    use crate::config::Topology;
    use crate::node::{Node, NodeState};
    use std::path::PathBuf;

    fn machine(is_server: bool) -> MachineTarget {
        MachineTarget {
            address: String::from("10.0.0.1"),
            interface: String::from("enp1s0"),
            pci_id: None,
            topology: Topology::BareMetal,
            is_remote: false,
            is_server,
            ssh_user: None,
        }
    }

    fn process(name: &str, cores: &str) -> ProcessConfig {
        ProcessConfig {
            name: name.to_string(),
            build: None,
            work_dir: PathBuf::from("/srv/bench"),
            exec_file: String::from("./bench"),
            args: String::new(),
            workload: None,
            cores: Some(cores.parse().unwrap()),
            preload_library: Some(PathBuf::from("/lib/libtas_interpose.so")),
            capture_output: false,
            cleanup_cmd: None,
            artifacts: Default::default(),
            guest: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stack_then_workloads_test() {
        let panes = RecordingPanes::new();
        let mut stack = process("tas", "0-1");
        stack.exec_file = String::from("code/tas/tas");
        stack.preload_library = None;
        let node = BareMetalNode::new(
            "server",
            machine(true),
            Some(stack),
            vec![process("s0", "2"), process("s1", "3")],
            &Settings::default(),
            &panes,
        );
        let mut node = Node::BareMetal(node);
        node.setup().await.unwrap();
        node.run().await.unwrap();
        assert_eq!(node.state(), NodeState::Running);

        let launches: Vec<_> = panes
            .commands()
            .into_iter()
            .filter(|command| !command.starts_with("cd "))
            .collect();
        assert_eq!(
            launches,
            vec![
                "sudo taskset -c 0-1 code/tas/tas",
                "sudo LD_PRELOAD=/lib/libtas_interpose.so taskset -c 2 ./bench",
                "sudo LD_PRELOAD=/lib/libtas_interpose.so taskset -c 3 ./bench",
            ]
        );

        // workloads are stopped before the stack
        node.cleanup().await;
        let stops: Vec<_> = panes
            .sent()
            .into_iter()
            .filter(|sent| sent.keys == "C-c")
            .map(|sent| sent.pane)
            .collect();
        assert_eq!(stops, vec!["server-s1", "server-s0", "server-tas"]);
    }

    #[tokio::test(start_paused = true)]
    async fn linux_workloads_test() {
        let panes = RecordingPanes::new();
        let node = BareMetalNode::new(
            "client",
            machine(false),
            None,
            vec![process("c0", "4-5")],
            &Settings::default(),
            &panes,
        );
        let mut node = Node::BareMetal(node);
        node.setup().await.unwrap();
        node.run().await.unwrap();
        assert_eq!(panes.count("./bench"), 1);
        assert_eq!(panes.sent_to("client-c0")[1], "taskset -c 4-5 ./bench");
    }
}
