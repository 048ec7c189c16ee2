use crate::channel::PaneFactory;
use crate::config::{ExperimentConfig, Topology};
use crate::error::{
    ConfigError, NodeError, OrchestrationError, PartialRetrievalError,
    TeardownError,
};
use crate::node::{Node, Side};
use color_eyre::eyre::WrapErr;
use color_eyre::Report;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const RECORD_FILE: &str = "experiment.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Setup,
    Run,
    Dwell,
    SaveLogs,
    Cleanup,
}

/// What is written next to the artifacts of an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub name: String,
    pub params: BTreeMap<String, String>,
    pub server_topology: Topology,
    pub client_topology: Topology,
    /// Unix time in milliseconds at which both nodes were running.
    pub start_ms: u64,
    /// Unix time in milliseconds at which the dwell ended.
    pub end_ms: u64,
    /// Artifacts that could not be retrieved.
    pub missing: Vec<PathBuf>,
}

struct Failure {
    side: Side,
    phase: Phase,
    source: NodeError,
}

fn failed(side: Side, phase: Phase) -> impl FnOnce(NodeError) -> Failure {
    move |source| Failure {
        side,
        phase,
        source,
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

/// A server node and a client node built from one configuration, driven
/// through setup, run, dwell, log retrieval and cleanup.
pub struct Experiment {
    name: String,
    params: BTreeMap<String, String>,
    duration: Duration,
    exp_path: PathBuf,
    server: Node,
    client: Node,
    panes: Arc<dyn PaneFactory>,
    warnings: Vec<PartialRetrievalError>,
}

impl Experiment {
    /// Validates `config` and builds both nodes. Nothing is sent to any
    /// machine.
    pub fn new(
        config: ExperimentConfig,
        panes: Arc<dyn PaneFactory>,
    ) -> Result<Self, ConfigError> {
        let settings = config.settings();
        let exp_path = config.exp_path();
        let server = Node::new(
            &format!("{}-server", config.name),
            config.server,
            true,
            &settings,
            panes.as_ref(),
        )?;
        let client = Node::new(
            &format!("{}-client", config.name),
            config.client,
            false,
            &settings,
            panes.as_ref(),
        )?;
        Ok(Self {
            name: config.name,
            params: config.params,
            duration: Duration::from_secs(config.duration_secs),
            exp_path,
            server,
            client,
            panes,
            warnings: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn exp_path(&self) -> &Path {
        &self.exp_path
    }

    pub fn server(&self) -> &Node {
        &self.server
    }

    pub fn client(&self) -> &Node {
        &self.client
    }

    /// Partial retrievals of the last run.
    pub fn warnings(&self) -> &[PartialRetrievalError] {
        &self.warnings
    }

    /// Runs the whole life cycle. Both nodes are always cleaned up, also
    /// when a phase fails; the error then names the failing node, the phase
    /// and the resources that were up at that point.
    pub async fn run(&mut self) -> Result<(), OrchestrationError> {
        tracing::info!("experiment {} started", self.name);
        let result = self.drive().await;
        let leftovers = match &result {
            Ok(()) => Vec::new(),
            Err(_) => {
                let mut leftovers = self.server.leftovers();
                leftovers.extend(self.client.leftovers());
                leftovers
            }
        };
        self.cleanup().await;

        match result {
            Ok(()) => {
                tracing::info!("experiment {} ended", self.name);
                Ok(())
            }
            Err(Failure {
                side,
                phase,
                source,
            }) => {
                let error = OrchestrationError {
                    experiment: self.name.clone(),
                    side,
                    phase,
                    leftovers,
                    source,
                };
                tracing::warn!("{}", error);
                Err(error)
            }
        }
    }

    async fn drive(&mut self) -> Result<(), Failure> {
        self.server
            .setup()
            .await
            .map_err(failed(Side::Server, Phase::Setup))?;
        self.client
            .setup()
            .await
            .map_err(failed(Side::Client, Phase::Setup))?;

        self.server
            .run()
            .await
            .map_err(failed(Side::Server, Phase::Run))?;
        self.client
            .run()
            .await
            .map_err(failed(Side::Client, Phase::Run))?;

        let start_ms = unix_ms();
        tracing::info!("dwelling for {:?}", self.duration);
        tokio::time::sleep(self.duration).await;
        let end_ms = unix_ms();

        self.warnings = self
            .server
            .save_logs(&self.exp_path)
            .await
            .map_err(failed(Side::Server, Phase::SaveLogs))?;
        let client_warnings = self
            .client
            .save_logs(&self.exp_path)
            .await
            .map_err(failed(Side::Client, Phase::SaveLogs))?;
        self.warnings.extend(client_warnings);

        let record = self.record(start_ms, end_ms);
        if let Err(e) = write_record(&self.exp_path, &record).await {
            tracing::warn!("{:?}", e);
        }
        Ok(())
    }

    fn record(&self, start_ms: u64, end_ms: u64) -> ExperimentRecord {
        ExperimentRecord {
            name: self.name.clone(),
            params: self.params.clone(),
            server_topology: self.server.topology(),
            client_topology: self.client.topology(),
            start_ms,
            end_ms,
            missing: self
                .warnings
                .iter()
                .flat_map(|warning| warning.missing.iter().cloned())
                .collect(),
        }
    }

    /// Cleans up the client and then the server, and closes every pane.
    /// Safe to call at any point and more than once.
    pub async fn cleanup(&mut self) -> Vec<TeardownError> {
        let mut errors = self.client.cleanup().await;
        errors.extend(self.server.cleanup().await);
        for error in &errors {
            tracing::warn!("experiment {}: {}", self.name, error);
        }
        self.panes.close_all().await;
        errors
    }
}

async fn write_record(
    exp_path: &Path,
    record: &ExperimentRecord,
) -> Result<(), Report> {
    tokio::fs::create_dir_all(exp_path)
        .await
        .wrap_err_with(|| format!("create {}", exp_path.display()))?;
    let json = serde_json::to_vec_pretty(record).wrap_err("serialize")?;
    let path = exp_path.join(RECORD_FILE);
    tokio::fs::write(&path, json)
        .await
        .wrap_err_with(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RecordingPanes;
    use crate::config::{Delays, SuiteConfig};

    fn config(output_dir: &Path, client_layout: &str) -> ExperimentConfig {
        let suite = format!(
            r#"
            [[experiment]]
            name = "exp"
            duration_secs = 10
            output_dir = "{}"
            params = {{ msize = "64" }}

            [experiment.server.machine]
            address = "10.0.0.1"
            interface = "enp1s0"
            [experiment.server.layout]
            topology = "bare-metal"
            [[experiment.server.layout.processes]]
            name = "srv"
            work_dir = "/srv/bench"
            exec_file = "./echoserver"

            [experiment.client.machine]
            address = "10.0.0.2"
            interface = "enp1s0"
            {}
            "#,
            output_dir.display(),
            client_layout
        );
        let mut config =
            SuiteConfig::from_toml(&suite).unwrap().experiments.remove(0);
        config.delays = Delays::none();
        config
    }

    const BARE_CLIENT: &str = r#"
        [experiment.client.layout]
        topology = "bare-metal"
        [[experiment.client.layout.processes]]
        name = "cli"
        work_dir = "/srv/bench"
        exec_file = "./rpcclient"
    "#;

    const VM_CLIENT: &str = r#"
        [experiment.client.layout]
        topology = "virtualized"
        [[experiment.client.layout.vms]]
        id = 0
        cores = "2-3"
        memory_gb = 4
        manager_dir = "/home/tas/manager"
        vm_ip = "10.0.0.20"
        [[experiment.client.layout.processes]]
        name = "cli"
        work_dir = "/srv/bench"
        exec_file = "./rpcclient"
        guest = 0
    "#;

    fn output_dir(test: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("netbench-{}-{}", test, std::process::id()))
    }

    #[tokio::test(start_paused = true)]
    async fn run_test() {
        let output_dir = output_dir("run");
        let panes = RecordingPanes::new();
        let mut exp = Experiment::new(
            config(&output_dir, BARE_CLIENT),
            Arc::new(panes.clone()),
        )
        .unwrap();
        assert_eq!(exp.server().name(), "exp-server");
        assert_eq!(exp.client().side(), Side::Client);

        exp.run().await.unwrap();
        assert!(exp.warnings().is_empty());

        // the server launches before the client and both are stopped
        let server = panes.position("./echoserver").unwrap();
        let client = panes.position("./rpcclient").unwrap();
        assert!(server < client);
        assert_eq!(panes.count("C-c"), 2);

        let record = std::fs::read(output_dir.join("exp").join(RECORD_FILE))
            .unwrap();
        let record: ExperimentRecord = serde_json::from_slice(&record).unwrap();
        assert_eq!(record.params["msize"], "64");
        assert_eq!(record.client_topology, Topology::BareMetal);
        assert!(record.start_ms <= record.end_ms);

        // a second cleanup sends nothing
        let before = panes.sent().len();
        assert!(exp.cleanup().await.is_empty());
        assert_eq!(panes.sent().len(), before);
        let _ = std::fs::remove_dir_all(&output_dir);
    }

    #[tokio::test(start_paused = true)]
    async fn client_setup_failure_test() {
        let output_dir = output_dir("failure");
        let panes = RecordingPanes::new();
        panes.fail_on("start-vm.sh");
        panes.respond("whoami", &["tas"]);
        let mut exp = Experiment::new(
            config(&output_dir, VM_CLIENT),
            Arc::new(panes.clone()),
        )
        .unwrap();

        let error = exp.run().await.unwrap_err();
        assert_eq!(error.experiment, "exp");
        assert_eq!(error.side, Side::Client);
        assert_eq!(error.phase, Phase::Setup);
        assert_eq!(error.leftovers, vec!["exp-client-vm0 (Partial)"]);
        assert!(matches!(error.source, NodeError::Provision(_)));

        // the half-booted VM is shut down and nothing was launched
        assert_eq!(panes.count("shutdown -h now"), 1);
        assert_eq!(panes.count("./echoserver"), 0);
        assert!(!output_dir.join("exp").join(RECORD_FILE).exists());
    }
}
