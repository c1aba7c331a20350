//! Container engine CLI backend (`podman run` / `docker run`).
//!
//! # Invocation
//!
//! ```text
//! podman run --rm -i --pull=never --name=shelleval-<uuid>
//!     --label=shelleval.caller=<caller> --label=shelleval.profile=<key>
//!     --pids-limit=64 --memory=32m --memory-swap=32m --network=none
//!     --workdir=/root [extra options] <image> <argv...>
//! ```
//!
//! The snippet goes to stdin. On timeout the container is force-removed by
//! name, which also ends the attached client. If this future is dropped while
//! the container is still running, a guard issues the removal in the
//! background.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::sandbox::backend::{InvocationRequest, RawOutput, SandboxBackend};
use crate::sandbox::error::{Result, SandboxError};
use crate::sandbox::output::{drain_into, shared_buffer, take_shared};

/// Exit codes the engine uses for its own failures: 125 when the engine
/// failed (bad image, bad flags), 126/127 when the command in the image
/// could not be invoked or found.
const ENGINE_FAILURE_EXITS: [i64; 3] = [125, 126, 127];

/// How long to wait for output pipes to close once the client is gone.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Which engine CLI dialect to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Podman,
    Docker,
}

impl Engine {
    pub fn default_binary(&self) -> &'static str {
        match self {
            Engine::Podman => "podman",
            Engine::Docker => "docker",
        }
    }
}

/// Runs sandboxes by shelling out to an engine CLI.
#[derive(Debug, Clone)]
pub struct CliBackend {
    engine: Engine,
    binary: String,
    cleanup_timeout: Duration,
}

impl CliBackend {
    pub fn new(engine: Engine, binary: impl Into<String>, cleanup_timeout: Duration) -> Self {
        Self {
            engine,
            binary: binary.into(),
            cleanup_timeout,
        }
    }

    /// Arguments for `<binary> run ...`.
    pub fn run_args(&self, request: &InvocationRequest) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-i".to_string(),
            "--pull=never".to_string(),
            format!("--name={}", request.name),
        ];
        args.extend(
            request
                .labels
                .iter()
                .map(|(key, value)| format!("--label={}={}", key, value)),
        );
        args.extend(request.limits.to_cli_args());
        args.push(format!("--workdir={}", request.workdir));
        args.extend(request.options.iter().flat_map(|o| o.to_cli_args()));
        args.push(request.image.clone());
        args.extend(request.argv.iter().cloned());
        args
    }

    fn remove_args(&self, name: &str) -> Vec<String> {
        match self.engine {
            Engine::Podman => vec![
                "rm".to_string(),
                "--force".to_string(),
                "--time=0".to_string(),
                name.to_string(),
            ],
            Engine::Docker => vec!["rm".to_string(), "--force".to_string(), name.to_string()],
        }
    }

    /// Force-remove a container by name, bounded by the cleanup timeout.
    async fn force_remove(&self, name: &str) -> bool {
        let mut command = Command::new(&self.binary);
        command
            .args(self.remove_args(name))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.cleanup_timeout, command.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                tracing::warn!("Failed to run container removal for {}: {}", name, e);
                false
            }
            Err(_) => {
                tracing::warn!(
                    "Container removal for {} did not finish within {:?}",
                    name,
                    self.cleanup_timeout
                );
                false
            }
        }
    }
}

#[async_trait]
impl SandboxBackend for CliBackend {
    fn name(&self) -> &str {
        self.engine.default_binary()
    }

    async fn invoke(&self, request: InvocationRequest) -> Result<RawOutput> {
        let args = self.run_args(&request);
        tracing::debug!("Spawning {} {}", self.binary, args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    SandboxError::RuntimeNotAvailable {
                        reason: format!("cannot execute '{}': {}", self.binary, e),
                    }
                }
                _ => SandboxError::Io(e),
            })?;

        let mut guard = RemovalGuard::new(self.binary.clone(), self.remove_args(&request.name));

        let stdout = shared_buffer(request.max_output_bytes);
        let stderr = shared_buffer(request.max_output_bytes);
        let mut readers = Vec::with_capacity(2);
        if let Some(pipe) = child.stdout.take() {
            readers.push(tokio::spawn(drain_into(pipe, stdout.clone())));
        }
        if let Some(pipe) = child.stderr.take() {
            readers.push(tokio::spawn(drain_into(pipe, stderr.clone())));
        }
        let writer = child.stdin.take().map(|mut pipe| {
            let input = request.input;
            tokio::spawn(async move {
                // The snippet may exit without reading all of stdin.
                let _ = pipe.write_all(&input).await;
                let _ = pipe.shutdown().await;
            })
        });

        let waited = tokio::select! {
            status = child.wait() => Some(status?),
            _ = tokio::time::sleep(request.limits.timeout) => None,
        };

        let exit_code = match waited {
            Some(status) => {
                guard.disarm();
                Some(exit_code_of(status))
            }
            None => {
                tracing::warn!(
                    "Sandbox {} exceeded {:?}, removing it",
                    request.name,
                    request.limits.timeout
                );
                if self.force_remove(&request.name).await {
                    guard.disarm();
                }
                let _ = child.start_kill();
                let _ = child.wait().await;
                None
            }
        };

        for reader in readers {
            let abort = reader.abort_handle();
            if tokio::time::timeout(PIPE_DRAIN_GRACE, reader).await.is_err() {
                abort.abort();
            }
        }
        if let Some(writer) = writer {
            writer.abort();
        }

        let (stdout, stdout_truncated) = take_shared(&stdout);
        let (stderr, stderr_truncated) = take_shared(&stderr);

        if let Some(error) = exit_code.and_then(|code| engine_failure(code, &stderr)) {
            return Err(error);
        }

        Ok(RawOutput {
            exit_code,
            stdout,
            stderr,
            truncated: stdout_truncated || stderr_truncated,
            timed_out: exit_code.is_none(),
        })
    }
}

/// Exit code as the engine reports it, or `128 + signal` if the client was killed.
fn exit_code_of(status: std::process::ExitStatus) -> i64 {
    if let Some(code) = status.code() {
        return i64::from(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + i64::from(signal);
        }
    }
    -1
}

/// The launch error behind an engine failure exit, if it was one.
fn engine_failure(code: i64, stderr: &[u8]) -> Option<SandboxError> {
    if !ENGINE_FAILURE_EXITS.contains(&code) || !is_engine_error(stderr) {
        return None;
    }
    let reason = String::from_utf8_lossy(stderr).trim().to_string();
    Some(match code {
        125 => SandboxError::ContainerCreationFailed { reason },
        _ => SandboxError::ContainerStartFailed { reason },
    })
}

/// Engine diagnostics, as opposed to a snippet that exited 125-127 itself.
fn is_engine_error(stderr: &[u8]) -> bool {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim_start();
    text.starts_with("Error") || text.starts_with("docker:")
}

/// Removes the container by name if dropped while armed.
struct RemovalGuard {
    binary: String,
    args: Vec<String>,
    armed: bool,
}

impl RemovalGuard {
    fn new(binary: String, args: Vec<String>) -> Self {
        Self {
            binary,
            args,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RemovalGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!("Sandbox invocation abandoned, removing container in background");
        let spawned = std::process::Command::new(&self.binary)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        if let Err(e) = spawned {
            tracing::error!("Failed to spawn container removal: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::backend::{CALLER_LABEL, PROFILE_LABEL};
    use crate::sandbox::limits::{ResourceLimits, RuntimeOption};

    fn request() -> InvocationRequest {
        InvocationRequest {
            name: "shelleval-test".to_string(),
            image: "eval-shell:alpine".to_string(),
            argv: vec!["zsh".to_string(), "-l".to_string()],
            workdir: "/root".to_string(),
            limits: ResourceLimits::default(),
            options: vec![RuntimeOption::env("LANG", "C.UTF-8")],
            labels: vec![
                (CALLER_LABEL.to_string(), "alice".to_string()),
                (PROFILE_LABEL.to_string(), "zsh".to_string()),
            ],
            input: b"echo hi".to_vec(),
            max_output_bytes: 1024,
        }
    }

    #[test]
    fn test_run_args_order() {
        let backend = CliBackend::new(Engine::Podman, "podman", Duration::from_secs(10));
        let args = backend.run_args(&request());

        assert_eq!(
            args,
            vec![
                "run",
                "--rm",
                "-i",
                "--pull=never",
                "--name=shelleval-test",
                "--label=shelleval.caller=alice",
                "--label=shelleval.profile=zsh",
                "--pids-limit=64",
                "--memory=32m",
                "--memory-swap=32m",
                "--network=none",
                "--workdir=/root",
                "--env=LANG=C.UTF-8",
                "eval-shell:alpine",
                "zsh",
                "-l",
            ]
        );
    }

    #[test]
    fn test_limits_always_before_image() {
        let backend = CliBackend::new(Engine::Docker, "docker", Duration::from_secs(10));
        let args = backend.run_args(&request());
        let image_at = args.iter().position(|a| a == "eval-shell:alpine").unwrap();
        for flag in ["--memory=", "--pids-limit=", "--network=", "--workdir="] {
            let at = args.iter().position(|a| a.starts_with(flag)).unwrap();
            assert!(at < image_at, "{flag} must precede the image");
        }
    }

    #[test]
    fn test_remove_args_per_engine() {
        let podman = CliBackend::new(Engine::Podman, "podman", Duration::from_secs(1));
        assert_eq!(
            podman.remove_args("x"),
            vec!["rm", "--force", "--time=0", "x"]
        );
        let docker = CliBackend::new(Engine::Docker, "docker", Duration::from_secs(1));
        assert_eq!(docker.remove_args("x"), vec!["rm", "--force", "x"]);
    }

    #[test]
    fn test_engine_error_detection() {
        assert!(is_engine_error(b"Error: eval-shell:alpine: image not known\n"));
        assert!(is_engine_error(
            b"docker: Error response from daemon: No such image.\n"
        ));
        assert!(!is_engine_error(b"my script failed\n"));
        assert!(!is_engine_error(b""));
    }

    #[tokio::test]
    async fn test_missing_binary_is_runtime_unavailable() {
        let backend = CliBackend::new(
            Engine::Podman,
            "/nonexistent/shelleval-podman",
            Duration::from_secs(1),
        );
        let err = backend.invoke(request()).await.unwrap_err();
        assert!(matches!(err, SandboxError::RuntimeNotAvailable { .. }));
    }

    #[test]
    fn test_engine_failure_classification() {
        assert!(matches!(
            engine_failure(125, b"Error: eval-shell:alpine: image not known\n"),
            Some(SandboxError::ContainerCreationFailed { .. })
        ));
        assert!(matches!(
            engine_failure(
                127,
                b"Error: crun: executable file `bash` not found in $PATH\n"
            ),
            Some(SandboxError::ContainerStartFailed { .. })
        ));
        assert!(matches!(
            engine_failure(126, b"docker: Error response from daemon: permission denied\n"),
            Some(SandboxError::ContainerStartFailed { .. })
        ));
        // The snippet's own failures stay exit codes.
        assert!(engine_failure(127, b"sh: frobnicate: not found\n").is_none());
        assert!(engine_failure(1, b"Error: my script failed\n").is_none());
    }

    /// A stand-in engine binary: `run` prints, records its pid and sleeps;
    /// every invocation appends its arguments to `calls.log`.
    #[cfg(unix)]
    fn fake_engine(dir: &std::path::Path, run_body: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("engine");
        let body = format!(
            "#!/bin/sh\n\
             echo \"$*\" >> '{log}'\n\
             case \"$1\" in\n\
             run)\n{run_body}\n;;\n\
             rm) exit 0 ;;\n\
             esac\n",
            log = dir.join("calls.log").display(),
        );
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    fn calls(dir: &std::path::Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_removes_container_and_keeps_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let engine = fake_engine(
            dir.path(),
            &format!(
                "cat > /dev/null\necho started\necho err >&2\necho $$ > '{}'\nexec sleep 10",
                pid_file.display()
            ),
        );
        let backend = CliBackend::new(Engine::Podman, engine.to_string_lossy(), Duration::from_secs(5));
        let mut req = request();
        req.limits.timeout = Duration::from_secs(1);

        let start = std::time::Instant::now();
        let output = backend.invoke(req).await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(3), "took {:?}", start.elapsed());
        assert!(output.timed_out);
        assert_eq!(output.exit_code, None);
        assert_eq!(output.stdout, b"started\n");
        assert_eq!(output.stderr, b"err\n");

        let calls = calls(dir.path());
        assert!(calls[0].starts_with("run --rm -i --pull=never --name=shelleval-test "));
        assert_eq!(calls[1], "rm --force --time=0 shelleval-test");

        #[cfg(target_os = "linux")]
        {
            let pid = std::fs::read_to_string(&pid_file).unwrap();
            assert!(
                !std::path::Path::new(&format!("/proc/{}", pid.trim())).exists(),
                "sandbox client {} still running",
                pid.trim()
            );
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_completed_run_is_not_removed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_engine(dir.path(), "cat\nexit 3");
        let backend = CliBackend::new(Engine::Docker, engine.to_string_lossy(), Duration::from_secs(5));

        let output = backend.invoke(request()).await.unwrap();

        assert!(!output.timed_out);
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout, b"echo hi");
        assert_eq!(calls(dir.path()).len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_engine_exit_125_is_creation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_engine(
            dir.path(),
            "echo 'Error: eval-shell:alpine: image not known' >&2\nexit 125",
        );
        let backend = CliBackend::new(Engine::Podman, engine.to_string_lossy(), Duration::from_secs(5));

        let err = backend.invoke(request()).await.unwrap_err();
        match err {
            SandboxError::ContainerCreationFailed { reason } => {
                assert_eq!(reason, "Error: eval-shell:alpine: image not known")
            }
            other => panic!("expected ContainerCreationFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_engine_exit_127_is_start_failure() {
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_engine(
            dir.path(),
            "echo 'Error: crun: executable file `zsh` not found in $PATH' >&2\nexit 127",
        );
        let backend = CliBackend::new(Engine::Podman, engine.to_string_lossy(), Duration::from_secs(5));

        let err = backend.invoke(request()).await.unwrap_err();
        assert!(matches!(err, SandboxError::ContainerStartFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abandoned_invocation_removes_container() {
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_engine(dir.path(), "cat > /dev/null\nexec sleep 10");
        let backend = CliBackend::new(Engine::Podman, engine.to_string_lossy(), Duration::from_secs(5));
        let mut req = request();
        req.limits.timeout = Duration::from_secs(30);

        let abandoned = tokio::time::timeout(Duration::from_millis(500), backend.invoke(req)).await;
        assert!(abandoned.is_err());

        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        while !calls(dir.path()).iter().any(|c| c.starts_with("rm ")) {
            assert!(std::time::Instant::now() < deadline, "no removal after drop");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(calls(dir.path())[1], "rm --force --time=0 shelleval-test");
    }
}
