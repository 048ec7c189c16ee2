use super::{launch_options, provision_concurrently, Layout, NodeCore};
use crate::channel::PaneFactory;
use crate::component::stack::data_plane_stack;
use crate::component::{ComponentProcess, Placement};
use crate::config::{ContainerConfig, MachineTarget, ProcessConfig, Settings};
use crate::error::{LaunchError, ProvisionError, TeardownError};
use crate::resource::{teardown_in_reverse, Container, Resource, ResourceState};
use async_trait::async_trait;

/// Workloads inside containers, sharing one data-plane stack that runs on
/// the host.
pub struct ContainerizedStackNode {
    core: NodeCore,
    containers: Vec<Container>,
    stack: ComponentProcess,
}

impl ContainerizedStackNode {
    pub(crate) fn new(
        name: &str,
        machine: MachineTarget,
        containers: Vec<ContainerConfig>,
        stack: ProcessConfig,
        processes: Vec<ProcessConfig>,
        settings: &Settings,
        panes: &dyn PaneFactory,
    ) -> Self {
        let containers: Vec<_> = containers
            .into_iter()
            .map(|config| {
                Container::new(name, &machine, config, settings, panes)
            })
            .collect();
        let guests: Vec<_> = containers
            .iter()
            .map(|container| container.guest_access(&machine))
            .collect();
        let placement = Placement::host(&machine);
        let stack =
            data_plane_stack(name, &machine, stack, placement, settings, panes);
        let core =
            NodeCore::new(name, machine, settings, processes, &guests, panes);
        Self {
            core,
            containers,
            stack,
        }
    }
}

#[async_trait]
impl Layout for ContainerizedStackNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    async fn provision(&mut self) -> Result<(), ProvisionError> {
        provision_concurrently(&mut self.containers).await
    }

    async fn launch(&mut self) -> Result<(), LaunchError> {
        let options = launch_options(&self.core.settings, &self.stack, true);
        self.stack.launch(&options).await?;
        self.core.launch_workloads(true).await
    }

    fn processes_mut(&mut self) -> Vec<&mut ComponentProcess> {
        std::iter::once(&mut self.stack)
            .chain(self.core.workloads.iter_mut())
            .collect()
    }

    fn inventory(&self) -> Vec<(String, ResourceState)> {
        self.containers
            .iter()
            .map(|container| (container.name().to_string(), container.state()))
            .collect()
    }

    async fn teardown_resources(&mut self) -> Vec<TeardownError> {
        teardown_in_reverse(&mut self.containers).await
    }
}
