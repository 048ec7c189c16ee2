use super::{run_step, run_teardown, Resource, ResourceInfo, ResourceState};
use crate::channel::{PaneFactory, RemoteChannel};
use crate::component::GuestAccess;
use crate::config::{
    ContainerConfig, Delays, GuestLogin, MachineTarget, Settings, Topology,
};
use crate::error::{ProvisionError, TeardownError};
use crate::util;
use async_trait::async_trait;

const START_SCRIPT: &str = "start-container.sh";

pub struct Container {
    owner: String,
    name: String,
    topology: Topology,
    host_interface: String,
    config: ContainerConfig,
    login: GuestLogin,
    delays: Delays,
    channel: RemoteChannel,
    state: ResourceState,
}

impl Container {
    pub fn new(
        owner: &str,
        machine: &MachineTarget,
        config: ContainerConfig,
        settings: &Settings,
        panes: &dyn PaneFactory,
    ) -> Self {
        let name = util::pane_name(format!("{}-{}", owner, config.name));
        let channel =
            RemoteChannel::open(panes, &name, machine, &settings.delays);
        Self {
            owner: owner.to_string(),
            name,
            topology: machine.topology,
            host_interface: machine.interface.clone(),
            config,
            login: settings.login.clone(),
            delays: settings.delays,
            channel,
            state: ResourceState::Created,
        }
    }

    pub fn id(&self) -> usize {
        self.config.id
    }

    pub fn guest_access(&self, machine: &MachineTarget) -> GuestAccess {
        GuestAccess {
            name: self.name.clone(),
            user: self.login.user.clone(),
            password: self.login.password.clone(),
            host: self.config.ip.clone(),
            port: None,
            jump: machine.hop().map(|_| machine.ssh_destination()),
        }
    }

    fn start_command(&self) -> String {
        format!(
            "sudo bash {} {} {} {} {} {} {} {} {}",
            START_SCRIPT,
            self.topology.name(),
            self.config.id,
            self.config.name,
            self.host_interface,
            self.config.cores.len(),
            self.config.memory_gb,
            self.config.cores,
            u8::from(self.config.tunnel),
        )
    }
}

#[async_trait]
impl Resource for Container {
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
            tracing::info!("starting container {}", self.config.name);
            self.state = ResourceState::Partial;
            let commands = vec![
                (
                    format!("cd {}", self.config.manager_dir.display()),
                    self.delays.short(),
                ),
                (self.start_command(), self.delays.container_boot()),
            ];
            run_step(&mut self.channel, &self.name, "start", commands).await?;
            self.state = ResourceState::Provisioned;
        }
        Ok(ResourceInfo {
            name: self.name.clone(),
            addresses: vec![self.config.ip.clone()],
        })
    }

    async fn teardown(&mut self) -> Result<(), TeardownError> {
        if !self.state.needs_teardown() {
            tracing::debug!("{}: nothing to remove", self.name);
            self.state = ResourceState::TornDown;
            return Ok(());
        }
        self.state = ResourceState::TornDown;
        let command =
            format!("sudo docker container rm -f {}", self.config.name);
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
    use std::path::PathBuf;

    #[tokio::test(start_paused = true)]
    async fn container_test() {
        let panes = RecordingPanes::new();
        let machine = MachineTarget {
            address: String::from("10.0.0.1"),
            interface: String::from("enp1s0"),
            pci_id: None,
            topology: Topology::Containerized,
            is_remote: true,
            is_server: false,
            ssh_user: None,
        };
        let config = ContainerConfig {
            id: 0,
            name: String::from("client0"),
            cores: "4-7".parse().unwrap(),
            memory_gb: 8,
            tunnel: true,
            manager_dir: PathBuf::from("/home/tas/manager"),
            ip: String::from("172.17.0.2"),
        };
        let mut container = Container::new(
            "client",
            &machine,
            config,
            &Settings::default(),
            &panes,
        );

        let info = container.provision().await.unwrap();
        assert_eq!(info.addresses, vec!["172.17.0.2"]);
        container.teardown().await.unwrap();
        container.teardown().await.unwrap();
        assert_eq!(
            panes.sent_to("client-client0"),
            vec![
                "ssh 10.0.0.1",
                "cd /home/tas/manager",
                "sudo bash start-container.sh container-tas 0 client0 enp1s0 4 8 4-7 1",
                "sudo docker container rm -f client0",
            ]
        );

        // scp from the orchestrator jumps through the remote host
        let access = container.guest_access(&machine);
        assert_eq!(access.jump.as_deref(), Some("10.0.0.1"));
    }
}
