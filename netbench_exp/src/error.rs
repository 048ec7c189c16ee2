use crate::experiment::Phase;
use crate::node::{NodeState, Side};
use std::path::PathBuf;
use std::time::Duration;

/// A channel operation did not complete within its allotted window.
#[derive(Debug, Clone, thiserror::Error)]
#[error("pane {pane}: `{command}` did not complete within {after:?}")]
pub struct TimeoutError {
    pub pane: String,
    pub command: String,
    pub after: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error("pane {pane}: could not run the pane backend: {source}")]
    Io {
        pane: String,
        #[source]
        source: std::io::Error,
    },
    #[error("pane {pane}: backend rejected `{command}`: {reason}")]
    Backend {
        pane: String,
        command: String,
        reason: String,
    },
    #[error("pane {pane}: marker {marker} never showed up in the pane")]
    Unconfirmed { pane: String, marker: String },
}

impl ChannelError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// A resource failed to reach the provisioned state.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("{resource}: step `{step}` failed: {source}")]
    Step {
        resource: String,
        step: &'static str,
        #[source]
        source: ChannelError,
    },
    #[error("{resource}: {missing} must be provisioned first")]
    Prerequisite { resource: String, missing: String },
}

impl ProvisionError {
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Step { source, .. } => source.is_timeout(),
            Self::Prerequisite { .. } => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("{process}: {source}")]
    Channel {
        process: String,
        #[source]
        source: ChannelError,
    },
    #[error("{process}: already launched")]
    AlreadyLaunched { process: String },
}

impl LaunchError {
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Channel { source, .. } => source.is_timeout(),
            Self::AlreadyLaunched { .. } => false,
        }
    }
}

/// Some configured artifacts of a process could not be retrieved. This is a
/// warning: histogram files are legitimately absent for some workloads.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{process}: {} artifact(s) not retrieved: {missing:?}", missing.len())]
pub struct PartialRetrievalError {
    pub process: String,
    pub missing: Vec<PathBuf>,
}

/// Raised while cleaning up. Never propagates past `cleanup()`.
#[derive(Debug, thiserror::Error)]
pub enum TeardownError {
    #[error("{resource}: {source}")]
    Channel {
        resource: String,
        #[source]
        source: ChannelError,
    },
    #[error("{resource}: pane is not inside the guest (whoami = {user:?}); refusing to shut down")]
    NotInGuest {
        resource: String,
        user: Option<String>,
    },
}

impl TeardownError {
    pub fn resource(&self) -> &str {
        match self {
            Self::Channel { resource, .. } => resource,
            Self::NotInGuest { resource, .. } => resource,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("node {node}: cannot {operation} while {state:?}")]
    InvalidState {
        node: String,
        operation: &'static str,
        state: NodeState,
    },
}

impl NodeError {
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Provision(e) => e.is_timeout(),
            Self::Launch(e) => e.is_timeout(),
            Self::InvalidState { .. } => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid core set `{0}`")]
    CoreSet(String),
    #[error("node {node}: {reason}")]
    Invalid { node: String, reason: String },
}

/// A failed experiment: which node, at which phase, and the resources that
/// were up when the failure happened (teardown is attempted but never
/// verified, so these need a manual look).
#[derive(Debug, thiserror::Error)]
#[error(
    "experiment {experiment}: {side:?} node failed during {phase:?}; \
     resources to verify: {leftovers:?}: {source}"
)]
pub struct OrchestrationError {
    pub experiment: String,
    pub side: Side,
    pub phase: Phase,
    pub leftovers: Vec<String>,
    #[source]
    pub source: NodeError,
}
