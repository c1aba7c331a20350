//! Docker Engine API backend.
//!
//! Talks to the engine socket directly (Docker, or Podman's compatible API)
//! instead of spawning a CLI client.
//!
//! # Container Setup
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────────┐
//! │                          Sandbox Container                             │
//! │                                                                        │
//! │  stdin:   snippet bytes, then closed (open_stdin + stdin_once)         │
//! │  stdout:  attached, capped at max_output_bytes                         │
//! │  stderr:  attached, capped at max_output_bytes                         │
//! │                                                                        │
//! │  Limits:                                                               │
//! │    Memory + swap: profile memory ceiling                               │
//! │    PIDs:          profile pids limit                                   │
//! │    Network:       profile network mode (none by default)               │
//! │                                                                        │
//! │  Removed with force=true on every exit path                            │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::models::HostConfig;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::sandbox::backend::{InvocationRequest, RawOutput, SandboxBackend};
use crate::sandbox::error::{Result, SandboxError};
use crate::sandbox::limits::RuntimeOption;
use crate::sandbox::output::CappedBuffer;

/// Runs sandboxes through the engine HTTP API.
pub struct DockerApiBackend {
    docker: Docker,
}

impl DockerApiBackend {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect to the local engine and verify it answers.
    pub async fn connect() -> Result<Self> {
        Ok(Self::new(connect_docker().await?))
    }

    async fn create_container(&self, request: &InvocationRequest) -> Result<String> {
        let config = container_config(request);
        let options = CreateContainerOptions {
            name: request.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| SandboxError::ContainerCreationFailed {
                reason: e.to_string(),
            })?;

        Ok(response.id)
    }

    /// Exit code once the container stops.
    async fn wait_exit_code(&self, container_id: &str) -> Result<i64> {
        let mut wait_stream = self.docker.wait_container(
            container_id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );

        match wait_stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports non-zero exits as errors
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(SandboxError::ExecutionFailed {
                reason: format!("wait failed: {}", e),
            }),
            None => Err(SandboxError::ExecutionFailed {
                reason: "container wait stream ended unexpectedly".to_string(),
            }),
        }
    }

    async fn remove(&self, container_id: &str) -> bool {
        let removed = self
            .docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await;
        if let Err(e) = &removed {
            tracing::warn!("Failed to remove container {}: {}", container_id, e);
        }
        removed.is_ok()
    }

    /// Attach, start, feed stdin and collect output until exit or timeout.
    async fn run_attached(&self, container_id: &str, request: InvocationRequest) -> Result<RawOutput> {
        let AttachContainerResults { mut output, mut input } = self
            .docker
            .attach_container(
                container_id,
                Some(AttachContainerOptions::<String> {
                    stdin: Some(true),
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    logs: Some(false),
                    detach_keys: None,
                }),
            )
            .await
            .map_err(|e| SandboxError::ContainerStartFailed {
                reason: format!("attach failed: {}", e),
            })?;

        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::ContainerStartFailed {
                reason: e.to_string(),
            })?;

        let mut stdout = CappedBuffer::new(request.max_output_bytes);
        let mut stderr = CappedBuffer::new(request.max_output_bytes);
        let snippet = request.input;

        let finished = tokio::time::timeout(request.limits.timeout, async {
            let feed = async {
                // The snippet may exit without reading all of stdin.
                let _ = input.write_all(&snippet).await;
                let _ = input.shutdown().await;
            };
            let collect = async {
                while let Some(frame) = output.next().await {
                    match frame {
                        Ok(LogOutput::StdOut { message }) => stdout.push(&message),
                        Ok(LogOutput::StdErr { message }) => stderr.push(&message),
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("Error reading container output: {}", e);
                            break;
                        }
                    }
                }
            };
            futures::join!(feed, collect);
            self.wait_exit_code(container_id).await
        })
        .await;

        let exit_code = match finished {
            Ok(code) => Some(code?),
            Err(_) => {
                tracing::warn!(
                    "Sandbox {} exceeded {:?}, removing it",
                    request.name,
                    request.limits.timeout
                );
                None
            }
        };

        let (stdout, stdout_truncated) = stdout.into_parts();
        let (stderr, stderr_truncated) = stderr.into_parts();

        Ok(RawOutput {
            exit_code,
            stdout,
            stderr,
            truncated: stdout_truncated || stderr_truncated,
            timed_out: exit_code.is_none(),
        })
    }
}

#[async_trait]
impl SandboxBackend for DockerApiBackend {
    fn name(&self) -> &str {
        "docker-api"
    }

    async fn invoke(&self, request: InvocationRequest) -> Result<RawOutput> {
        let container_id = self.create_container(&request).await?;
        let mut guard = ContainerGuard::new(self.docker.clone(), container_id.clone());

        let result = self.run_attached(&container_id, request).await;

        // Always clean up the container
        if self.remove(&container_id).await {
            guard.disarm();
        }

        result
    }
}

/// Container configuration for one invocation.
fn container_config(request: &InvocationRequest) -> Config<String> {
    let mut env = Vec::new();
    let mut cap_drop = Vec::new();
    let mut security_opt = Vec::new();
    let mut tmpfs = HashMap::new();
    let mut readonly_rootfs = false;

    for option in &request.options {
        match option {
            RuntimeOption::Env { key, value } => env.push(format!("{}={}", key, value)),
            RuntimeOption::ReadOnlyRootfs => readonly_rootfs = true,
            RuntimeOption::Tmpfs { path, options } => {
                tmpfs.insert(path.clone(), options.clone());
            }
            RuntimeOption::CapDrop(cap) => cap_drop.push(cap.clone()),
            RuntimeOption::NoNewPrivileges => {
                security_opt.push("no-new-privileges:true".to_string())
            }
        }
    }

    let memory = i64::try_from(request.limits.memory.as_u64()).unwrap_or(i64::MAX);
    let host_config = HostConfig {
        memory: Some(memory),
        memory_swap: Some(memory),
        pids_limit: Some(i64::from(request.limits.pids_limit)),
        network_mode: Some(request.limits.network.as_str().to_string()),
        auto_remove: Some(false),
        readonly_rootfs: Some(readonly_rootfs),
        cap_drop: (!cap_drop.is_empty()).then_some(cap_drop),
        security_opt: (!security_opt.is_empty()).then_some(security_opt),
        tmpfs: (!tmpfs.is_empty()).then_some(tmpfs),
        ..Default::default()
    };

    Config {
        image: Some(request.image.clone()),
        cmd: Some(request.argv.clone()),
        working_dir: Some(request.workdir.clone()),
        env: (!env.is_empty()).then_some(env),
        labels: Some(request.labels.iter().cloned().collect()),
        open_stdin: Some(true),
        stdin_once: Some(true),
        attach_stdin: Some(true),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(false),
        network_disabled: Some(request.limits.network.is_disabled()),
        host_config: Some(host_config),
        ..Default::default()
    }
}

/// Force-removes the container in the background if dropped while armed.
struct ContainerGuard {
    docker: Docker,
    container_id: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(docker: Docker, container_id: String) -> Self {
        Self {
            docker,
            container_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::error!(
                "Container {} leaked: no runtime available for removal",
                self.container_id
            );
            return;
        };
        let docker = self.docker.clone();
        let container_id = std::mem::take(&mut self.container_id);
        handle.spawn(async move {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            if let Err(e) = docker.remove_container(&container_id, Some(options)).await {
                tracing::warn!("Background removal of {} failed: {}", container_id, e);
            }
        });
    }
}

/// Connect to the container engine socket.
///
/// Tries these locations in order:
/// 1. `DOCKER_HOST` env var (bollard default)
/// 2. `/var/run/docker.sock` (Linux default)
/// 3. `$XDG_RUNTIME_DIR/podman/podman.sock` (rootless Podman)
/// 4. `~/.docker/run/docker.sock` (Docker Desktop on macOS)
pub async fn connect_docker() -> Result<Docker> {
    // First try bollard defaults (checks DOCKER_HOST, then /var/run/docker.sock)
    if let Ok(docker) = Docker::connect_with_local_defaults()
        && docker.ping().await.is_ok()
    {
        return Ok(docker);
    }

    let mut candidates = Vec::new();
    if let Some(runtime_dir) = std::env::var_os("XDG_RUNTIME_DIR") {
        candidates.push(std::path::Path::new(&runtime_dir).join("podman/podman.sock"));
    }
    if let Some(home) = std::env::var_os("HOME") {
        candidates.push(std::path::Path::new(&home).join(".docker/run/docker.sock"));
    }

    for socket in candidates.iter().filter(|p| p.exists()) {
        let sock_str = socket.to_string_lossy();
        if let Ok(docker) = Docker::connect_with_socket(&sock_str, 120, bollard::API_DEFAULT_VERSION)
            && docker.ping().await.is_ok()
        {
            return Ok(docker);
        }
    }

    Err(SandboxError::RuntimeNotAvailable {
        reason: "no container engine socket answered (tried DOCKER_HOST, /var/run/docker.sock, \
                 rootless podman and Docker Desktop sockets)"
            .to_string(),
    })
}
