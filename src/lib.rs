//! shelleval: run untrusted shell snippets in throwaway containers.
//!
//! A message goes through four stages:
//!
//! 1. [`extract`] finds the snippet and its language tag.
//! 2. [`registry`] maps the language to an execution profile for the
//!    requested purpose (evaluate, check or format).
//! 3. [`sandbox`] runs it once in a fresh, resource-limited container.
//! 4. [`format`] renders the outcome as bounded chat markdown.
//!
//! [`service::Service`] ties the stages together; [`serve`] exposes it as a
//! JSON-lines stream.

pub mod config;
pub mod error;
pub mod extract;
pub mod format;
pub mod registry;
pub mod sandbox;
pub mod serve;
pub mod service;

pub use config::{Backend, Config};
pub use error::{ConfigError, RegistryError, ServiceError};
pub use extract::{Snippet, SnippetSource, extract};
pub use format::Formatter;
pub use registry::{ExecutionProfile, Purpose, Registry};
pub use sandbox::{ExecutionOutcome, ExitStatus, SandboxError, SandboxRunner};
pub use service::{Request, Service};
