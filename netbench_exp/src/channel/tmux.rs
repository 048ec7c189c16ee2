use super::{Pane, PaneFactory};
use crate::error::ChannelError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::process::Command;

/// Opens one tmux window per pane in `session`.
#[derive(Debug, Clone)]
pub struct TmuxPanes {
    session: String,
    // targets of the windows created so far
    created: Arc<Mutex<Vec<String>>>,
}

impl TmuxPanes {
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            created: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl PaneFactory for TmuxPanes {
    fn open(&self, name: &str) -> Box<dyn Pane> {
        Box::new(TmuxPane {
            session: self.session.clone(),
            window: name.to_string(),
            target: format!("{}:{}", self.session, name),
            created: false,
            registry: self.created.clone(),
        })
    }

    async fn close_all(&self) {
        let targets = std::mem::take(&mut *self.created.lock());
        for target in targets {
            if let Err(e) = tmux(&target, &["kill-window", "-t", &target]).await
            {
                tracing::warn!("could not close {}: {}", target, e);
            }
        }
    }
}

pub struct TmuxPane {
    session: String,
    window: String,
    target: String,
    created: bool,
    registry: Arc<Mutex<Vec<String>>>,
}

impl TmuxPane {
    // the window is only created once something is typed into it
    async fn ensure_window(&mut self) -> Result<(), ChannelError> {
        if self.created {
            return Ok(());
        }
        let has_session = Command::new("tmux")
            .args(["has-session", "-t", self.session.as_str()])
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false);
        if has_session {
            tmux(
                &self.target,
                &["new-window", "-d", "-t", &self.session, "-n", &self.window],
            )
            .await?;
        } else {
            tmux(
                &self.target,
                &["new-session", "-d", "-s", &self.session, "-n", &self.window],
            )
            .await?;
        }
        self.created = true;
        self.registry.lock().push(self.target.clone());
        Ok(())
    }
}

#[async_trait]
impl Pane for TmuxPane {
    fn name(&self) -> &str {
        &self.window
    }

    async fn send_keys(&mut self, keys: &str) -> Result<(), ChannelError> {
        self.ensure_window().await?;
        tmux(&self.target, &["send-keys", "-t", &self.target, "-l", keys])
            .await?;
        tmux(&self.target, &["send-keys", "-t", &self.target, "Enter"]).await?;
        Ok(())
    }

    async fn interrupt(&mut self) -> Result<(), ChannelError> {
        self.ensure_window().await?;
        tmux(&self.target, &["send-keys", "-t", &self.target, "C-c"]).await?;
        Ok(())
    }

    async fn capture(
        &mut self,
        lines: usize,
    ) -> Result<Vec<String>, ChannelError> {
        self.ensure_window().await?;
        let start = format!("-{}", lines);
        let stdout = tmux(
            &self.target,
            &["capture-pane", "-p", "-J", "-t", &self.target, "-S", &start],
        )
        .await?;
        let mut screen: Vec<String> =
            stdout.lines().map(|line| line.to_string()).collect();
        // the visible area is padded with empty lines
        while screen.last().map_or(false, |line| line.trim().is_empty()) {
            screen.pop();
        }
        let skip = screen.len().saturating_sub(lines);
        Ok(screen.split_off(skip))
    }
}

async fn tmux(target: &str, args: &[&str]) -> Result<String, ChannelError> {
    let output = Command::new("tmux").args(args).output().await.map_err(
        |source| ChannelError::Io {
            pane: target.to_string(),
            source,
        },
    )?;
    if !output.status.success() {
        return Err(ChannelError::Backend {
            pane: target.to_string(),
            command: format!("tmux {}", args.join(" ")),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
