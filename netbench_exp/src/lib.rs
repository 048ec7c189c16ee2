#![deny(rust_2018_idioms)]

// This module contains utilities shared by the rest of the crate (e.g. the
// `args!` macro).
pub mod util;

// This module contains the definition of `RemoteChannel` and its pane
// backends.
pub mod channel;

// This module contains the definition of `ComponentProcess`.
pub mod component;

// This module contains the configuration of experiments and nodes.
pub mod config;

// This module contains the error types.
pub mod error;

// This module contains the definition of `Experiment`.
pub mod experiment;

// This module contains the definition of `Node` and its topology variants.
pub mod node;

// This module contains the definition of `TracingProgressBar`.
pub mod progress;

// This module contains the definition of the `Resource` trait and of the
// resources nodes provision.
pub mod resource;

// Re-exports.
pub use channel::{PaneFactory, RecordingPanes, RemoteChannel, TmuxPanes};
pub use config::{Delays, ExperimentConfig, SuiteConfig, Topology};
pub use error::OrchestrationError;
pub use experiment::{Experiment, Phase};
pub use node::{Node, NodeState, Side};
