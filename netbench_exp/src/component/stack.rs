use super::{ComponentProcess, Placement, Role};
use crate::channel::PaneFactory;
use crate::config::{MachineTarget, ProcessConfig, Settings};

/// Socket files the stack leaves behind when interrupted.
const SOCKET_PATTERN: &str = "*flexnic_os*";

/// The data-plane stack. Unless configured otherwise, stopping it also
/// removes its leftover shared-memory sockets.
pub fn data_plane_stack(
    owner: &str,
    machine: &MachineTarget,
    mut config: ProcessConfig,
    placement: Placement,
    settings: &Settings,
    panes: &dyn PaneFactory,
) -> ComponentProcess {
    if config.cleanup_cmd.is_none() {
        config.cleanup_cmd = Some(socket_cleanup(&config));
    }
    ComponentProcess::open(
        Role::Stack,
        owner,
        machine,
        config,
        placement,
        settings,
        panes,
    )
}

fn socket_cleanup(config: &ProcessConfig) -> String {
    format!(
        "find {} -name \"{}\" | xargs -r sudo rm -r",
        config.work_dir.display(),
        SOCKET_PATTERN
    )
}
