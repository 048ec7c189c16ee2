// This module contains the definition of `RecordingPane` and `RecordingPanes`.
mod recording;

// This module contains the definition of `TmuxPane` and `TmuxPanes`.
mod tmux;

// Re-exports.
pub use recording::{RecordingPane, RecordingPanes, SentKeys};
pub use tmux::{TmuxPane, TmuxPanes};

use crate::config::{Delays, MachineTarget};
use crate::error::{ChannelError, TimeoutError};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

// number of lines captured when looking for a confirmation marker
const CONFIRM_LINES: usize = 50;

/// A terminal the harness types into. Nothing is acknowledged: a command is
/// assumed to be done once the caller's delay has elapsed.
#[async_trait]
pub trait Pane: Send {
    fn name(&self) -> &str;

    /// Types `keys` followed by Enter.
    async fn send_keys(&mut self, keys: &str) -> Result<(), ChannelError>;

    /// Delivers Ctrl-C to the foreground process.
    async fn interrupt(&mut self) -> Result<(), ChannelError>;

    /// Returns (at most) the last `lines` lines shown by the pane.
    async fn capture(&mut self, lines: usize)
        -> Result<Vec<String>, ChannelError>;
}

#[async_trait]
pub trait PaneFactory: Send + Sync {
    fn open(&self, name: &str) -> Box<dyn Pane>;

    /// Releases every pane opened so far.
    async fn close_all(&self) {}
}

pub struct RemoteChannel {
    pane: Box<dyn Pane>,
    hop: Option<String>,
    hopped: bool,
    hop_wait: Duration,
    op_timeout: Duration,
}

impl RemoteChannel {
    pub fn new(pane: Box<dyn Pane>, delays: &Delays) -> Self {
        Self {
            pane,
            hop: None,
            hopped: false,
            hop_wait: delays.ssh_login(),
            op_timeout: delays.op_timeout(),
        }
    }

    /// Opens a channel on `machine`: remote machines are reached with an ssh
    /// hop typed on first use.
    pub fn open(
        panes: &dyn PaneFactory,
        name: &str,
        machine: &MachineTarget,
        delays: &Delays,
    ) -> Self {
        let mut channel = Self::new(panes.open(name), delays);
        channel.hop = machine.hop();
        channel
    }

    /// Opens a channel on the orchestrating machine.
    pub fn local(panes: &dyn PaneFactory, name: &str, delays: &Delays) -> Self {
        Self::new(panes.open(name), delays)
    }

    pub fn name(&self) -> &str {
        self.pane.name()
    }

    pub async fn send(
        &mut self,
        command: impl AsRef<str>,
        wait_after: Duration,
    ) -> Result<(), ChannelError> {
        self.ensure_hop().await?;
        self.type_line(command.as_ref()).await?;
        tokio::time::sleep(wait_after).await;
        Ok(())
    }

    /// Sends `command` followed by `echo <marker>` and returns what was
    /// printed between the typed line and the marker.
    pub async fn send_and_confirm(
        &mut self,
        command: impl AsRef<str>,
        marker: &str,
        wait_after: Duration,
    ) -> Result<String, ChannelError> {
        self.ensure_hop().await?;
        let line = format!("{}; echo {}", command.as_ref(), marker);
        self.type_line(&line).await?;
        tokio::time::sleep(wait_after).await;

        let lines = self.capture_recent_output(CONFIRM_LINES).await?;
        confirmed_output(&lines, marker).ok_or_else(|| {
            ChannelError::Unconfirmed {
                pane: self.name().to_string(),
                marker: marker.to_string(),
            }
        })
    }

    pub async fn capture_recent_output(
        &mut self,
        lines: usize,
    ) -> Result<Vec<String>, ChannelError> {
        let pane = self.pane.name().to_string();
        let command = format!("capture {}", lines);
        let after = self.op_timeout;
        bounded(pane, command, after, self.pane.capture(lines)).await
    }

    pub async fn interrupt(
        &mut self,
        wait_after: Duration,
    ) -> Result<(), ChannelError> {
        tracing::debug!("{}: ^C", self.pane.name());
        let pane = self.pane.name().to_string();
        let after = self.op_timeout;
        bounded(pane, "^C".to_string(), after, self.pane.interrupt()).await?;
        tokio::time::sleep(wait_after).await;
        Ok(())
    }

    async fn ensure_hop(&mut self) -> Result<(), ChannelError> {
        if self.hopped {
            return Ok(());
        }
        if let Some(hop) = self.hop.clone() {
            self.type_line(&hop).await?;
            tokio::time::sleep(self.hop_wait).await;
        }
        self.hopped = true;
        Ok(())
    }

    async fn type_line(&mut self, line: &str) -> Result<(), ChannelError> {
        tracing::debug!("{}: {}", self.pane.name(), line);
        let pane = self.pane.name().to_string();
        let after = self.op_timeout;
        bounded(pane, line.to_string(), after, self.pane.send_keys(line)).await
    }
}

async fn bounded<T>(
    pane: String,
    command: String,
    after: Duration,
    operation: impl Future<Output = Result<T, ChannelError>>,
) -> Result<T, ChannelError> {
    match tokio::time::timeout(after, operation).await {
        Ok(result) => result,
        Err(_) => Err(TimeoutError {
            pane,
            command,
            after,
        }
        .into()),
    }
}

/// Extracts the output of a confirmed command: the lines after the last
/// typed line mentioning `marker` and before the line that is exactly
/// `marker`.
fn confirmed_output(lines: &[String], marker: &str) -> Option<String> {
    let end = lines.iter().rposition(|line| line.trim() == marker)?;
    let start = lines[..end]
        .iter()
        .rposition(|line| line.contains(marker))
        .map(|typed| typed + 1)
        .unwrap_or(0);
    let output: Vec<_> = lines[start..end]
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect();
    Some(output.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|line| line.to_string()).collect()
    }

    #[test]
    fn confirmed_output_test() {
        let marker = "__done_vm0__";
        let screen = lines(&[
            "tas@vm0:~$ ls",
            "bench",
            "tas@vm0:~$ whoami; echo __done_vm0__",
            "tas",
            "__done_vm0__",
            "tas@vm0:~$",
        ]);
        assert_eq!(confirmed_output(&screen, marker), Some("tas".into()));

        // the marker was typed but never echoed back
        let screen = lines(&["$ whoami; echo __done_vm0__"]);
        assert_eq!(confirmed_output(&screen, marker), None);
    }

    #[tokio::test(start_paused = true)]
    async fn hop_once_test() {
        let panes = RecordingPanes::new();
        let machine = MachineTarget {
            address: String::from("10.0.0.2"),
            interface: String::from("enp1s0"),
            pci_id: None,
            topology: crate::config::Topology::BareMetal,
            is_remote: true,
            is_server: true,
            ssh_user: Some(String::from("bench")),
        };
        let delays = Delays::default();
        let mut channel = RemoteChannel::open(&panes, "srv", &machine, &delays);

        channel.send("ls", delays.short()).await.unwrap();
        channel.send("pwd", delays.short()).await.unwrap();
        assert_eq!(
            panes.sent_to("srv"),
            vec!["ssh bench@10.0.0.2", "ls", "pwd"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn send_and_confirm_test() {
        let panes = RecordingPanes::new();
        panes.respond("whoami", &["tas"]);
        let delays = Delays::default();
        let mut channel = RemoteChannel::local(&panes, "vm0", &delays);

        let user = channel
            .send_and_confirm("whoami", "__whoami__", delays.short())
            .await
            .unwrap();
        assert_eq!(user, "tas");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_test() {
        let panes = RecordingPanes::new();
        panes.hang_on("sleep forever");
        let delays = Delays::default();
        let mut channel = RemoteChannel::local(&panes, "stuck", &delays);

        let error = channel
            .send("sleep forever", delays.short())
            .await
            .unwrap_err();
        assert!(error.is_timeout());
    }
}
