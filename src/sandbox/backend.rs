//! The sandbox invocation primitive.
//!
//! A backend turns an [`InvocationRequest`] into one ephemeral, isolated
//! process: it feeds the input to stdin, enforces the wall-clock limit by
//! killing the sandbox, removes the sandbox on every exit path, and reports
//! what it saw. Classification of the result is left to the runner.

use async_trait::async_trait;

use crate::sandbox::error::SandboxError;
use crate::sandbox::limits::{ResourceLimits, RuntimeOption};

/// Label carrying the caller identity.
pub const CALLER_LABEL: &str = "shelleval.caller";

/// Label carrying the profile key.
pub const PROFILE_LABEL: &str = "shelleval.profile";

/// Everything needed to launch one sandbox.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    /// Unique container name, also used for forced removal.
    pub name: String,
    pub image: String,
    pub argv: Vec<String>,
    pub workdir: String,
    pub limits: ResourceLimits,
    pub options: Vec<RuntimeOption>,
    /// Informational labels attached to the sandbox.
    pub labels: Vec<(String, String)>,
    /// Bytes written to the sandbox's stdin, then closed.
    pub input: Vec<u8>,
    /// Per-stream capture cap.
    pub max_output_bytes: usize,
}

/// What a backend observed.
#[derive(Debug, Clone, Default)]
pub struct RawOutput {
    /// Exit code of the sandboxed command; `None` when killed on timeout.
    pub exit_code: Option<i64>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Either stream exceeded `max_output_bytes`.
    pub truncated: bool,
    /// The backend killed the sandbox because the time limit elapsed.
    pub timed_out: bool,
}

/// A container engine capable of running one-shot sandboxes.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Backend name for logs (e.g. "podman", "docker-api").
    fn name(&self) -> &str;

    /// Run one sandbox to completion or timeout.
    ///
    /// Errors mean the sandbox could not be launched at all.
    async fn invoke(&self, request: InvocationRequest) -> Result<RawOutput, SandboxError>;
}
