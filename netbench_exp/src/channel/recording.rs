use super::{Pane, PaneFactory};
use crate::error::ChannelError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// A line typed into a pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentKeys {
    pub pane: String,
    pub keys: String,
}

#[derive(Debug, Default)]
struct Script {
    // (pattern, lines printed when a command containing pattern is typed)
    responses: Vec<(String, Vec<String>)>,
    failures: Vec<String>,
    hangs: Vec<String>,
}

/// In-memory panes: every typed line is recorded in a log shared by all the
/// panes of the factory. Used for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingPanes {
    log: Arc<Mutex<Vec<SentKeys>>>,
    script: Arc<Mutex<Script>>,
}

impl RecordingPanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands containing `pattern` print `lines`.
    pub fn respond(&self, pattern: impl Into<String>, lines: &[&str]) {
        let lines = lines.iter().map(|line| line.to_string()).collect();
        self.script.lock().responses.push((pattern.into(), lines));
    }

    /// Commands containing `pattern` are rejected by the backend.
    pub fn fail_on(&self, pattern: impl Into<String>) {
        self.script.lock().failures.push(pattern.into());
    }

    /// Commands containing `pattern` never return.
    pub fn hang_on(&self, pattern: impl Into<String>) {
        self.script.lock().hangs.push(pattern.into());
    }

    /// Everything typed so far, in order.
    pub fn sent(&self) -> Vec<SentKeys> {
        self.log.lock().clone()
    }

    pub fn sent_to(&self, pane: &str) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter(|sent| sent.pane == pane)
            .map(|sent| sent.keys.clone())
            .collect()
    }

    /// Every typed line, regardless of pane.
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().iter().map(|sent| sent.keys.clone()).collect()
    }

    /// Number of typed lines containing `pattern`.
    pub fn count(&self, pattern: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|sent| sent.keys.contains(pattern))
            .count()
    }

    /// Position of the first typed line containing `pattern`.
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.log
            .lock()
            .iter()
            .position(|sent| sent.keys.contains(pattern))
    }
}

#[async_trait]
impl PaneFactory for RecordingPanes {
    fn open(&self, name: &str) -> Box<dyn Pane> {
        Box::new(RecordingPane {
            name: name.to_string(),
            log: self.log.clone(),
            script: self.script.clone(),
            screen: Vec::new(),
        })
    }
}

pub struct RecordingPane {
    name: String,
    log: Arc<Mutex<Vec<SentKeys>>>,
    script: Arc<Mutex<Script>>,
    screen: Vec<String>,
}

impl RecordingPane {
    fn record(&mut self, keys: &str) {
        self.log.lock().push(SentKeys {
            pane: self.name.clone(),
            keys: keys.to_string(),
        });
    }
}

#[async_trait]
impl Pane for RecordingPane {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_keys(&mut self, keys: &str) -> Result<(), ChannelError> {
        let (hang, fail, output) = {
            let script = self.script.lock();
            let hang = script.hangs.iter().any(|p| keys.contains(p.as_str()));
            let fail =
                script.failures.iter().any(|p| keys.contains(p.as_str()));
            let output: Vec<String> = script
                .responses
                .iter()
                .filter(|(pattern, _)| keys.contains(pattern.as_str()))
                .flat_map(|(_, lines)| lines.iter().cloned())
                .collect();
            (hang, fail, output)
        };

        if hang {
            futures::future::pending::<()>().await;
        }
        if fail {
            return Err(ChannelError::Backend {
                pane: self.name.clone(),
                command: keys.to_string(),
                reason: String::from("scripted failure"),
            });
        }

        self.record(keys);
        self.screen.push(format!("$ {}", keys));
        self.screen.extend(output);
        // plain `echo`s print their argument
        for segment in keys.split(';').skip(1) {
            let segment = segment.trim();
            if let Some(text) = segment.strip_prefix("echo ") {
                if !segment.contains('>') && !segment.contains('|') {
                    self.screen.push(text.trim().to_string());
                }
            }
        }
        Ok(())
    }

    async fn interrupt(&mut self) -> Result<(), ChannelError> {
        self.record("C-c");
        self.screen.push(String::from("^C"));
        Ok(())
    }

    async fn capture(
        &mut self,
        lines: usize,
    ) -> Result<Vec<String>, ChannelError> {
        let skip = self.screen.len().saturating_sub(lines);
        Ok(self.screen[skip..].to_vec())
    }
}
