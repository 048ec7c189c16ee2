use super::{ComponentProcess, Placement, Role};
use crate::args;
use crate::channel::PaneFactory;
use crate::config::{MachineTarget, ProcessConfig, Settings};

// the echo server ignores its config file argument
const CONFIG_PLACEHOLDER: &str = "foo";

pub fn benchmark_server(
    owner: &str,
    machine: &MachineTarget,
    config: ProcessConfig,
    placement: Placement,
    settings: &Settings,
    panes: &dyn PaneFactory,
) -> ComponentProcess {
    ComponentProcess::open(
        Role::Server,
        owner,
        machine,
        config,
        placement,
        settings,
        panes,
    )
}

/// `<port> <cores> <config> <max flows> <max bytes>`
pub fn echo_args(
    port: u16,
    ncores: usize,
    max_flows: usize,
    max_bytes: usize,
) -> Vec<String> {
    args![port, ncores, CONFIG_PLACEHOLDER, max_flows, max_bytes]
}
