//! Runs a snippet under an execution profile and classifies the result.
//!
//! ```text
//!   run(profile, snippet, caller)
//!         │
//!         ▼
//!   ┌──────────────────┐    ┌───────────────────┐    ┌────────────────────┐
//!   │ Compose request  │───▶│ Backend invoke    │───▶│ Classify + re-cap  │
//!   │ (limits, labels) │    │ (exactly once)    │    │ → ExecutionOutcome │
//!   └──────────────────┘    └───────────────────┘    └────────────────────┘
//! ```
//!
//! Nothing here retries. Launch errors become `LaunchFailed`; they are never
//! returned as `Err`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use uuid::Uuid;

use crate::registry::ExecutionProfile;
use crate::sandbox::backend::{
    CALLER_LABEL, InvocationRequest, PROFILE_LABEL, RawOutput, SandboxBackend,
};
use crate::sandbox::limits::DEFAULT_MAX_OUTPUT_BYTES;
use crate::sandbox::outcome::{ExecutionOutcome, ExitStatus};
use crate::sandbox::output::CappedBuffer;

/// Extra time a backend gets past the profile timeout to kill and clean up
/// before the runner gives up on it.
const BACKEND_GRACE: Duration = Duration::from_secs(15);

const MAX_LABEL_CHARS: usize = 128;

/// Executes snippets through a [`SandboxBackend`].
#[derive(Clone)]
pub struct SandboxRunner {
    backend: Arc<dyn SandboxBackend>,
    max_output_bytes: usize,
}

impl std::fmt::Debug for SandboxRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxRunner")
            .field("backend", &self.backend.name())
            .field("max_output_bytes", &self.max_output_bytes)
            .finish()
    }
}

impl SandboxRunner {
    pub fn new(backend: Arc<dyn SandboxBackend>) -> Self {
        Self {
            backend,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// Set the per-stream capture cap.
    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Run `snippet` once under `profile`.
    pub async fn run(
        &self,
        profile: &ExecutionProfile,
        snippet: &[u8],
        caller: &str,
    ) -> ExecutionOutcome {
        let started_at = Utc::now();
        let start = Instant::now();
        let request = self.compose(profile, snippet, caller);
        let limit = profile.timeout();

        tracing::info!(
            "Running {} ({}) for {} in {} via {}",
            request.name,
            profile.key(),
            caller,
            profile.image(),
            self.backend.name()
        );

        let invoked = tokio::time::timeout(limit + BACKEND_GRACE, self.backend.invoke(request)).await;
        let duration = start.elapsed();

        let outcome = match invoked {
            Ok(Ok(raw)) => self.classify(raw, limit, started_at, duration),
            Ok(Err(e)) => {
                tracing::warn!("Sandbox launch failed for {}: {}", profile.key(), e);
                ExecutionOutcome::launch_failed(e.to_string(), started_at, duration)
            }
            Err(_) => {
                tracing::error!(
                    "Backend {} did not return within {:?} of the time limit",
                    self.backend.name(),
                    BACKEND_GRACE
                );
                ExecutionOutcome {
                    status: ExitStatus::TimedOut { limit },
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    truncated: false,
                    started_at,
                    duration,
                }
            }
        };

        tracing::info!(
            "Sandbox for {} finished: {} in {:?}{}",
            profile.key(),
            outcome.status,
            outcome.duration,
            if outcome.truncated { " (truncated)" } else { "" }
        );
        outcome
    }

    /// The backend request for one invocation; limits are always present.
    pub fn compose(&self, profile: &ExecutionProfile, snippet: &[u8], caller: &str) -> InvocationRequest {
        InvocationRequest {
            name: format!("shelleval-{}", Uuid::new_v4()),
            image: profile.image().to_string(),
            argv: profile.argv().to_vec(),
            workdir: profile.workdir().to_string(),
            limits: profile.limits().clone(),
            options: profile.extra_options().to_vec(),
            labels: vec![
                (CALLER_LABEL.to_string(), label_value(caller)),
                (PROFILE_LABEL.to_string(), profile.key().to_string()),
            ],
            input: snippet.to_vec(),
            max_output_bytes: self.max_output_bytes,
        }
    }

    fn classify(
        &self,
        raw: RawOutput,
        limit: Duration,
        started_at: chrono::DateTime<Utc>,
        duration: Duration,
    ) -> ExecutionOutcome {
        let status = match (raw.timed_out, raw.exit_code) {
            (true, _) => ExitStatus::TimedOut { limit },
            (false, Some(code)) => ExitStatus::from_exit_code(code),
            (false, None) => {
                return ExecutionOutcome::launch_failed(
                    "sandbox reported neither an exit code nor a timeout",
                    started_at,
                    duration,
                );
            }
        };

        let (stdout, stdout_truncated) = CappedBuffer::capped(raw.stdout, self.max_output_bytes);
        let (stderr, stderr_truncated) = CappedBuffer::capped(raw.stderr, self.max_output_bytes);

        ExecutionOutcome {
            status,
            stdout,
            stderr,
            truncated: raw.truncated || stdout_truncated || stderr_truncated,
            started_at,
            duration,
        }
    }
}

/// Caller identity as a label value: no control characters, bounded length.
fn label_value(caller: &str) -> String {
    let cleaned: String = caller
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_LABEL_CHARS)
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::process::Stdio;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::io::AsyncWriteExt;
    use tokio::process::Command;

    use super::*;
    use crate::sandbox::error::SandboxError;
    use crate::sandbox::output::{drain_into, shared_buffer, take_shared};

    /// Returns a canned result and records every request.
    pub(crate) struct FakeBackend {
        result: Mutex<Option<Result<RawOutput, SandboxError>>>,
        pub(crate) requests: Mutex<Vec<InvocationRequest>>,
    }

    impl FakeBackend {
        pub(crate) fn returning(result: Result<RawOutput, SandboxError>) -> Arc<Self> {
            Arc::new(Self {
                result: Mutex::new(Some(result)),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn exit(code: i64, stdout: &str, stderr: &str) -> Arc<Self> {
            Self::returning(Ok(RawOutput {
                exit_code: Some(code),
                stdout: stdout.as_bytes().to_vec(),
                stderr: stderr.as_bytes().to_vec(),
                truncated: false,
                timed_out: false,
            }))
        }
    }

    #[async_trait]
    impl SandboxBackend for FakeBackend {
        fn name(&self) -> &str {
            "fake"
        }

        async fn invoke(&self, request: InvocationRequest) -> Result<RawOutput, SandboxError> {
            self.requests.lock().unwrap().push(request);
            self.result
                .lock()
                .unwrap()
                .take()
                .expect("fake backend invoked more than once")
        }
    }

    /// Runs argv directly on the host, without isolation, to exercise real
    /// process timeouts.
    pub(crate) struct HostProcessBackend;

    #[async_trait]
    impl SandboxBackend for HostProcessBackend {
        fn name(&self) -> &str {
            "host"
        }

        async fn invoke(&self, request: InvocationRequest) -> Result<RawOutput, SandboxError> {
            let mut child = Command::new(&request.argv[0])
                .args(&request.argv[1..])
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()?;

            let stdout = shared_buffer(request.max_output_bytes);
            let stderr = shared_buffer(request.max_output_bytes);
            let out = tokio::spawn(drain_into(child.stdout.take().unwrap(), stdout.clone()));
            let err = tokio::spawn(drain_into(child.stderr.take().unwrap(), stderr.clone()));
            let mut stdin = child.stdin.take().unwrap();
            let _ = stdin.write_all(&request.input).await;
            drop(stdin);

            let exit_code = tokio::select! {
                status = child.wait() => Some(i64::from(status?.code().unwrap_or(-1))),
                _ = tokio::time::sleep(request.limits.timeout) => None,
            };
            if exit_code.is_none() {
                child.kill().await?;
            }
            let _ = out.await;
            let _ = err.await;

            let (stdout, t1) = take_shared(&stdout);
            let (stderr, t2) = take_shared(&stderr);
            Ok(RawOutput {
                exit_code,
                stdout,
                stderr,
                truncated: t1 || t2,
                timed_out: exit_code.is_none(),
            })
        }
    }

    fn profile(timeout: Duration) -> ExecutionProfile {
        ExecutionProfile::builder("sh", "eval-shell:alpine", ["sh"])
            .timeout(timeout)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_success() {
        let runner = SandboxRunner::new(FakeBackend::exit(0, "ok\n", ""));
        let outcome = runner.run(&profile(Duration::from_secs(5)), b"echo ok", "alice").await;

        assert_eq!(outcome.status, ExitStatus::Success);
        assert_eq!(outcome.stdout, b"ok\n");
        assert!(outcome.stderr.is_empty());
        assert!(!outcome.truncated);
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let runner = SandboxRunner::new(FakeBackend::exit(2, "", "boom\n"));
        let outcome = runner.run(&profile(Duration::from_secs(5)), b"exit 2", "alice").await;

        assert_eq!(outcome.status, ExitStatus::NonZeroExit { code: 2 });
        assert_eq!(outcome.stderr, b"boom\n");
    }

    #[tokio::test]
    async fn test_exit_137_is_sigkill() {
        let runner = SandboxRunner::new(FakeBackend::exit(137, "", ""));
        let outcome = runner.run(&profile(Duration::from_secs(5)), b"kill -9 $$", "alice").await;

        assert_eq!(
            outcome.status,
            ExitStatus::Signaled {
                code: 137,
                signal: "SIGKILL"
            }
        );
    }

    #[tokio::test]
    async fn test_backend_timeout_keeps_partial_output() {
        let backend = FakeBackend::returning(Ok(RawOutput {
            exit_code: None,
            stdout: b"partial".to_vec(),
            stderr: Vec::new(),
            truncated: false,
            timed_out: true,
        }));
        let runner = SandboxRunner::new(backend);
        let outcome = runner.run(&profile(Duration::from_secs(3)), b"yes", "alice").await;

        assert_eq!(
            outcome.status,
            ExitStatus::TimedOut {
                limit: Duration::from_secs(3)
            }
        );
        assert_eq!(outcome.stdout, b"partial");
    }

    #[tokio::test]
    async fn test_launch_failure_is_an_outcome() {
        let backend = FakeBackend::returning(Err(SandboxError::RuntimeNotAvailable {
            reason: "podman not found".to_string(),
        }));
        let runner = SandboxRunner::new(backend.clone());
        let outcome = runner.run(&profile(Duration::from_secs(5)), b"true", "alice").await;

        match outcome.status {
            ExitStatus::LaunchFailed { reason } => assert!(reason.contains("podman not found")),
            other => panic!("expected LaunchFailed, got {other:?}"),
        }
        assert_eq!(backend.requests.lock().unwrap().len(), 1, "launch must not be retried");
    }

    #[tokio::test]
    async fn test_runner_recaps_oversized_output() {
        let runner = SandboxRunner::new(FakeBackend::exit(0, "0123456789", "abc"))
            .with_max_output_bytes(4);
        let outcome = runner.run(&profile(Duration::from_secs(5)), b"", "alice").await;

        assert_eq!(outcome.stdout, b"0123");
        assert_eq!(outcome.stderr, b"abc");
        assert!(outcome.truncated);
    }

    #[tokio::test]
    async fn test_request_carries_limits_and_labels() {
        let backend = FakeBackend::exit(0, "", "");
        let runner = SandboxRunner::new(backend.clone()).with_max_output_bytes(1000);
        let profile = profile(Duration::from_secs(7));
        runner.run(&profile, b"echo hi", "alice\n#1").await;

        let requests = backend.requests.lock().unwrap();
        let request = &requests[0];
        assert!(request.name.starts_with("shelleval-"));
        assert_eq!(request.image, "eval-shell:alpine");
        assert_eq!(request.argv, vec!["sh"]);
        assert_eq!(request.limits, *profile.limits());
        assert_eq!(request.limits.timeout, Duration::from_secs(7));
        assert_eq!(request.input, b"echo hi");
        assert_eq!(request.max_output_bytes, 1000);
        assert!(
            request
                .labels
                .contains(&(CALLER_LABEL.to_string(), "alice#1".to_string()))
        );
        assert!(
            request
                .labels
                .contains(&(PROFILE_LABEL.to_string(), "sh".to_string()))
        );
    }

    #[test]
    fn test_container_names_are_unique() {
        let runner = SandboxRunner::new(FakeBackend::exit(0, "", ""));
        let p = profile(Duration::from_secs(1));
        assert_ne!(runner.compose(&p, b"", "a").name, runner.compose(&p, b"", "a").name);
    }

    #[test]
    fn test_label_value() {
        assert_eq!(label_value("bob"), "bob");
        assert_eq!(label_value("\u{7}\n"), "unknown");
        assert_eq!(label_value(&"x".repeat(500)).len(), MAX_LABEL_CHARS);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_real_process_timeout_is_enforced() {
        let runner = SandboxRunner::new(Arc::new(HostProcessBackend));
        let start = Instant::now();
        let outcome = runner
            .run(&profile(Duration::from_secs(1)), b"echo started\nexec sleep 10\n", "alice")
            .await;

        assert_eq!(
            outcome.status,
            ExitStatus::TimedOut {
                limit: Duration::from_secs(1)
            }
        );
        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(outcome.stdout, b"started\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_real_process_exit_codes() {
        let runner = SandboxRunner::new(Arc::new(HostProcessBackend));
        let p = profile(Duration::from_secs(5));

        let outcome = runner.run(&p, b"echo hi", "alice").await;
        assert_eq!(outcome.status, ExitStatus::Success);
        assert_eq!(outcome.stdout, b"hi\n");

        let outcome = runner.run(&p, b"echo oops >&2; exit 3", "alice").await;
        assert_eq!(outcome.status, ExitStatus::NonZeroExit { code: 3 });
        assert_eq!(outcome.stderr, b"oops\n");

        let outcome = runner.run(&p, b"exit 137", "alice").await;
        assert_eq!(
            outcome.status,
            ExitStatus::Signaled {
                code: 137,
                signal: "SIGKILL"
            }
        );
    }
}
