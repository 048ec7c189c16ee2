// This module contains the constructor of benchmark clients and the
// rendering of RPC client workloads.
pub mod client;

// This module contains the constructors of host and guest proxies.
pub mod proxy;

// This module contains the constructor of benchmark servers and the
// rendering of echo server workloads.
pub mod server;

// This module contains the constructor of data-plane stacks.
pub mod stack;

use crate::channel::{PaneFactory, RemoteChannel};
use crate::config::{
    Artifact, CoreSet, Delays, MachineTarget, ProcessConfig, Settings, Workload,
};
use crate::error::{LaunchError, PartialRetrievalError, TeardownError};
use crate::util;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Stack,
    Server,
    Client,
    Proxy,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stack => write!(f, "stack"),
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
            Self::Proxy => write!(f, "proxy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Configured,
    Launched,
    Retrieved,
    Abandoned,
}

/// How to log into a VM or container from a shell on its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestAccess {
    pub name: String,
    pub user: String,
    pub password: String,
    pub host: String,
    /// Forwarded ssh port, if the guest is not reached by address.
    pub port: Option<u16>,
    /// `ssh -J` hop used when the guest's host is not the local machine.
    pub jump: Option<String>,
}

impl GuestAccess {
    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Typed in a pane on the host.
    pub fn ssh_command(&self) -> String {
        match self.port {
            Some(port) => format!("ssh -p {} {}", port, self.destination()),
            None => format!("ssh {}", self.destination()),
        }
    }

    /// Typed in a pane on the orchestrating machine.
    pub fn scp_command(&self, source: &Path, destination: &Path) -> String {
        let mut command = String::from("scp");
        if let Some(jump) = &self.jump {
            command.push_str(&format!(" -J {}", jump));
        }
        if let Some(port) = self.port {
            command.push_str(&format!(" -P {}", port));
        }
        format!(
            "{} {}:{} {}",
            command,
            self.destination(),
            source.display(),
            destination.display()
        )
    }

    /// Typed in a pane on the orchestrating machine.
    pub fn remove_command(&self, paths: &[PathBuf]) -> String {
        let mut command = String::from("ssh");
        if let Some(jump) = &self.jump {
            command.push_str(&format!(" -J {}", jump));
        }
        if let Some(port) = self.port {
            command.push_str(&format!(" -p {}", port));
        }
        format!(
            "{} {} 'rm -f {}'",
            command,
            self.destination(),
            util::join_paths(paths)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// On the node's machine; `remote` is its ssh destination when that
    /// machine is not the local one.
    Host { remote: Option<String> },
    Guest(GuestAccess),
}

impl Placement {
    /// Directly on `machine`.
    pub fn host(machine: &MachineTarget) -> Self {
        Self::Host {
            remote: machine.hop().map(|_| machine.ssh_destination()),
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, Self::Host { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    pub sudo: bool,
    pub preload_library: Option<PathBuf>,
    pub pin_cores: Option<CoreSet>,
    pub clean_build: bool,
}

/// A process started by typing a command into its own channel.
pub struct ComponentProcess {
    role: Role,
    name: String,
    config: ProcessConfig,
    args: Vec<String>,
    placement: Placement,
    delays: Delays,
    channel: RemoteChannel,
    // local pane used to fetch artifacts
    logs_channel: RemoteChannel,
    state: ProcessState,
    stopped: bool,
}

impl ComponentProcess {
    pub fn open(
        role: Role,
        owner: &str,
        machine: &MachineTarget,
        config: ProcessConfig,
        placement: Placement,
        settings: &Settings,
        panes: &dyn PaneFactory,
    ) -> Self {
        let name = util::pane_name(format!("{}-{}", owner, config.name));
        let delays = &settings.delays;
        let channel = RemoteChannel::open(panes, &name, machine, delays);
        let logs_channel = RemoteChannel::local(
            panes,
            &util::pane_name(format!("{}-savelogs", name)),
            delays,
        );
        let args = render_args(&config);
        Self {
            role,
            name,
            config,
            args,
            placement,
            delays: *delays,
            channel,
            logs_channel,
            state: ProcessState::Configured,
            stopped: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The single command that starts the process:
    /// `[sudo ][LD_PRELOAD=<lib> ][taskset -c <cores> ]<exec> <args>[ | tee <out>]`.
    pub fn command_line(&self, options: &LaunchOptions) -> String {
        let mut command = String::new();
        if options.sudo {
            command.push_str("sudo ");
        }
        if let Some(library) = &options.preload_library {
            command.push_str(&format!("LD_PRELOAD={} ", library.display()));
        }
        if let Some(cores) = &options.pin_cores {
            command.push_str(&format!("taskset -c {} ", cores));
        }
        command.push_str(&self.config.exec_file);
        for arg in &self.args {
            command.push(' ');
            command.push_str(arg);
        }
        if self.config.capture_output {
            if let Some(out) = &self.config.artifacts.out {
                command.push_str(&format!(" | tee {}", out.remote.display()));
            }
        }
        command
    }

    /// Everything typed after reaching the right shell, in order.
    pub fn launch_commands(
        &self,
        options: &LaunchOptions,
    ) -> Vec<(String, Duration)> {
        let mut commands = Vec::new();
        if let Some(build) = &self.config.build {
            commands.push((
                format!("cd {}", build.dir.display()),
                self.delays.short(),
            ));
            if options.clean_build {
                if let Some(clean) = &build.clean_cmd {
                    commands.push((clean.clone(), self.delays.compile()));
                }
            }
            commands.push((build.compile_cmd.clone(), self.delays.compile()));
        }
        commands.push((
            format!("cd {}", self.config.work_dir.display()),
            self.delays.work_dir(),
        ));
        let settle = match self.role {
            Role::Stack => self.delays.stack_start(),
            Role::Client => self.delays.client_launch(),
            _ => self.delays.launch(),
        };
        commands.push((self.command_line(options), settle));
        commands
    }

    pub async fn launch(
        &mut self,
        options: &LaunchOptions,
    ) -> Result<(), LaunchError> {
        if self.state != ProcessState::Configured {
            return Err(LaunchError::AlreadyLaunched {
                process: self.name.clone(),
            });
        }
        tracing::info!("launching {} {}", self.role, self.name);

        let mut commands = Vec::new();
        if let Placement::Guest(guest) = &self.placement {
            commands.push((guest.ssh_command(), self.delays.ssh_login()));
            commands.push((guest.password.clone(), self.delays.password()));
        }
        commands.extend(self.launch_commands(options));

        let last = commands.len() - 1;
        for (index, (command, wait_after)) in commands.into_iter().enumerate()
        {
            if index == last {
                // from here on the process may be running
                self.state = ProcessState::Launched;
            }
            self.channel.send(command, wait_after).await.map_err(|source| {
                LaunchError::Channel {
                    process: self.name.clone(),
                    source,
                }
            })?;
        }
        Ok(())
    }

    /// Interrupts the process and runs its cleanup command. Does nothing if
    /// the process was never launched or was already stopped.
    pub async fn stop(&mut self) -> Result<(), TeardownError> {
        let running = matches!(
            self.state,
            ProcessState::Launched | ProcessState::Retrieved
        );
        if !running || self.stopped {
            tracing::debug!("{}: nothing to stop", self.name);
            return Ok(());
        }
        self.stopped = true;
        if self.state == ProcessState::Launched {
            self.state = ProcessState::Abandoned;
        }

        let to_teardown = |source| TeardownError::Channel {
            resource: self.name.clone(),
            source,
        };
        self.channel
            .interrupt(self.delays.short())
            .await
            .map_err(to_teardown)?;
        if let Some(cleanup) = self.config.cleanup_cmd.clone() {
            self.channel
                .send(cleanup, self.delays.short())
                .await
                .map_err(|source| TeardownError::Channel {
                    resource: self.name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Where artifact `artifact` lives on the machine running the process.
    fn remote_path(&self, artifact: &Artifact) -> PathBuf {
        self.config.work_dir.join(&artifact.remote)
    }

    /// Fetches every configured artifact into `destination_dir` and removes
    /// the fetched remote copies. Artifacts that are not configured are
    /// never touched.
    pub async fn retrieve_artifacts(
        &mut self,
        destination_dir: &Path,
    ) -> Result<(), PartialRetrievalError> {
        let artifacts: Vec<Artifact> =
            self.config.artifacts.configured().cloned().collect();
        if artifacts.is_empty() || self.state == ProcessState::Retrieved {
            return Ok(());
        }
        let all_missing = |process: &Self| PartialRetrievalError {
            process: process.name.clone(),
            missing: artifacts.iter().map(|a| process.remote_path(a)).collect(),
        };
        if self.state != ProcessState::Launched {
            tracing::warn!("{}: never launched, no artifacts", self.name);
            return Err(all_missing(self));
        }
        if let Err(e) = tokio::fs::create_dir_all(destination_dir).await {
            tracing::warn!(
                "could not create {}: {}",
                destination_dir.display(),
                e
            );
            return Err(all_missing(self));
        }

        let mut fetched = Vec::new();
        let mut missing = Vec::new();
        for artifact in &artifacts {
            let source = self.remote_path(artifact);
            let destination = destination_dir.join(&artifact.file_name);
            if self.fetch(&source, &destination).await {
                fetched.push(source);
            } else {
                missing.push(source);
            }
        }

        // renamed files are already gone
        if !fetched.is_empty() && !self.is_host_local() {
            self.remove(&fetched).await;
        }
        self.state = ProcessState::Retrieved;

        if missing.is_empty() {
            Ok(())
        } else {
            Err(PartialRetrievalError {
                process: self.name.clone(),
                missing,
            })
        }
    }

    /// Deletes every configured artifact from the machine running the
    /// process.
    pub async fn remove_remote_artifacts(&mut self) {
        let paths: Vec<PathBuf> = self
            .config
            .artifacts
            .configured()
            .map(|artifact| self.remote_path(artifact))
            .collect();
        if !paths.is_empty() {
            self.remove(&paths).await;
        }
    }

    fn is_host_local(&self) -> bool {
        matches!(self.placement, Placement::Host { remote: None })
    }

    async fn fetch(&mut self, source: &Path, destination: &Path) -> bool {
        let sent = match &self.placement {
            Placement::Host { remote: None } => {
                return match tokio::fs::rename(source, destination).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::debug!(
                            "{}: rename {}: {}",
                            self.name,
                            source.display(),
                            e
                        );
                        false
                    }
                };
            }
            Placement::Host {
                remote: Some(remote),
            } => {
                let command = format!(
                    "scp {}:{} {}",
                    remote,
                    source.display(),
                    destination.display()
                );
                self.logs_channel.send(command, self.delays.scp()).await
            }
            Placement::Guest(guest) => {
                let command = guest.scp_command(source, destination);
                let password = guest.password.clone();
                match self.logs_channel.send(command, self.delays.short()).await
                {
                    Ok(()) => {
                        self.logs_channel
                            .send(password, self.delays.scp())
                            .await
                    }
                    Err(e) => Err(e),
                }
            }
        };
        if let Err(e) = sent {
            tracing::warn!("{}: fetching {}: {}", self.name, source.display(), e);
            return false;
        }
        // whether the copy arrived is only visible locally
        tokio::fs::metadata(destination).await.is_ok()
    }

    async fn remove(&mut self, paths: &[PathBuf]) {
        let result = match &self.placement {
            Placement::Host { remote: None } => {
                for path in paths {
                    if let Err(e) = tokio::fs::remove_file(path).await {
                        tracing::debug!(
                            "{}: remove {}: {}",
                            self.name,
                            path.display(),
                            e
                        );
                    }
                }
                Ok(())
            }
            Placement::Host {
                remote: Some(remote),
            } => {
                let command = format!(
                    "ssh {} 'rm -f {}'",
                    remote,
                    util::join_paths(paths)
                );
                self.logs_channel.send(command, self.delays.short()).await
            }
            Placement::Guest(guest) => {
                let command = guest.remove_command(paths);
                let password = guest.password.clone();
                match self.logs_channel.send(command, self.delays.short()).await
                {
                    Ok(()) => {
                        self.logs_channel
                            .send(password, self.delays.short())
                            .await
                    }
                    Err(e) => Err(e),
                }
            }
        };
        if let Err(e) = result {
            tracing::warn!("{}: removing artifacts: {}", self.name, e);
        }
    }
}

/// Arguments of a process: the rendered workload, if any, followed by the
/// free-form ones.
fn render_args(config: &ProcessConfig) -> Vec<String> {
    let mut args = match &config.workload {
        Some(Workload::Echo {
            port,
            ncores,
            max_flows,
            max_bytes,
        }) => server::echo_args(*port, *ncores, *max_flows, *max_bytes),
        Some(Workload::Rpc(workload)) => client::rpc_args(workload),
        None => Vec::new(),
    };
    args.extend(config.args.split_whitespace().map(String::from));
    args
}
