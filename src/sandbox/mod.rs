//! Ephemeral container sandboxes for untrusted snippets.
//!
//! Every invocation gets a fresh, network-less, memory- and pid-limited
//! container that is removed afterwards, whatever happens.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        SandboxRunner                             │
//! │                                                                  │
//! │  ExecutionProfile ──▶ InvocationRequest ──▶ dyn SandboxBackend   │
//! │                                               │                  │
//! │                          ┌────────────────────┴──────────┐       │
//! │                          ▼                               ▼       │
//! │                  ┌───────────────┐             ┌──────────────┐  │
//! │                  │  CliBackend   │             │ DockerApi    │  │
//! │                  │ podman/docker │             │ (bollard)    │  │
//! │                  └───────────────┘             └──────────────┘  │
//! │                          │                               │       │
//! │                          └───────────▶ RawOutput ◀───────┘       │
//! │                                           │                      │
//! │                                           ▼                      │
//! │                                   ExecutionOutcome               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod cli;
pub mod container;
pub mod error;
pub mod limits;
pub mod outcome;
pub mod output;
pub mod runner;

pub use backend::{InvocationRequest, RawOutput, SandboxBackend};
pub use cli::{CliBackend, Engine};
pub use container::DockerApiBackend;
pub use error::SandboxError;
pub use limits::{ByteSize, NetworkMode, ResourceLimits, RuntimeOption};
pub use outcome::{ExecutionOutcome, ExitStatus};
pub use runner::SandboxRunner;
