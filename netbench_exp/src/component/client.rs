use super::{ComponentProcess, Placement, Role};
use crate::args;
use crate::channel::PaneFactory;
use crate::config::{MachineTarget, ProcessConfig, RpcWorkload, Settings};

// the RPC client ignores its config file argument
const CONFIG_PLACEHOLDER: &str = "foo";

pub fn benchmark_client(
    owner: &str,
    machine: &MachineTarget,
    config: ProcessConfig,
    placement: Placement,
    settings: &Settings,
    panes: &dyn PaneFactory,
) -> ComponentProcess {
    ComponentProcess::open(
        Role::Client,
        owner,
        machine,
        config,
        placement,
        settings,
        panes,
    )
}

/// `<ip> <port> <cores> <config> <msg size> <pending> <conns> <open delay>
/// <max msgs per conn> <max pending conns>`, followed by the burst
/// parameters for bursty clients.
pub fn rpc_args(workload: &RpcWorkload) -> Vec<String> {
    let mut args = args![
        workload.server_ip,
        workload.port,
        workload.ncores,
        CONFIG_PLACEHOLDER,
        workload.msize,
        workload.mpending,
        workload.nconns,
        workload.open_delay,
        workload.max_msgs_conn,
        workload.max_pend_conns,
    ];
    if let Some(bursty) = &workload.bursty {
        args.extend(args![
            bursty.rate_normal,
            bursty.rate_burst,
            bursty.burst_length,
            bursty.burst_interval,
        ]);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Bursty;

    fn workload() -> RpcWorkload {
        RpcWorkload {
            server_ip: String::from("10.0.0.20"),
            port: 1234,
            ncores: 2,
            msize: 64,
            mpending: 1,
            nconns: 100,
            open_delay: 0,
            max_msgs_conn: 0,
            max_pend_conns: 8,
            bursty: None,
        }
    }

    #[test]
    fn rpc_args_test() {
        assert_eq!(
            rpc_args(&workload()).join(" "),
            "10.0.0.20 1234 2 foo 64 1 100 0 0 8"
        );
    }

    #[test]
    fn bursty_args_test() {
        let mut workload = workload();
        workload.bursty = Some(Bursty {
            rate_normal: 1000,
            rate_burst: 10000,
            burst_length: 5,
            burst_interval: 20,
        });
        assert_eq!(
            rpc_args(&workload).join(" "),
            "10.0.0.20 1234 2 foo 64 1 100 0 0 8 1000 10000 5 20"
        );
    }
}
