//! Classified result of one sandbox invocation.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Exit codes at or above this value encode `128 + signal`.
const SIGNAL_EXIT_BASE: i64 = 128;

/// Linux signal names by number.
const SIGNAL_NAMES: [&str; 31] = [
    "SIGHUP", "SIGINT", "SIGQUIT", "SIGILL", "SIGTRAP", "SIGABRT", "SIGBUS", "SIGFPE",
    "SIGKILL", "SIGUSR1", "SIGSEGV", "SIGUSR2", "SIGPIPE", "SIGALRM", "SIGTERM", "SIGSTKFLT",
    "SIGCHLD", "SIGCONT", "SIGSTOP", "SIGTSTP", "SIGTTIN", "SIGTTOU", "SIGURG", "SIGXCPU",
    "SIGXFSZ", "SIGVTALRM", "SIGPROF", "SIGWINCH", "SIGIO", "SIGPWR", "SIGSYS",
];

/// Name of the fatal signal an exit code stands for, if any.
///
/// `137` → `SIGKILL`, `139` → `SIGSEGV`; codes below 129 or past the
/// standard signal range resolve to nothing.
pub fn signal_name(exit_code: i64) -> Option<&'static str> {
    let signal = exit_code.checked_sub(SIGNAL_EXIT_BASE)?;
    if signal < 1 {
        return None;
    }
    SIGNAL_NAMES.get(usize::try_from(signal - 1).ok()?).copied()
}

/// How the invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    /// Exit code 0.
    Success,
    /// Non-zero exit code with no signal meaning.
    NonZeroExit { code: i64 },
    /// Exit code of the form `128 + n` for a known signal `n`.
    Signaled { code: i64, signal: &'static str },
    /// Killed after exceeding the wall-clock budget.
    TimedOut { limit: Duration },
    /// The sandbox never ran the snippet.
    LaunchFailed { reason: String },
}

impl ExitStatus {
    /// Classify a completed process's exit code.
    pub fn from_exit_code(code: i64) -> Self {
        if code == 0 {
            return ExitStatus::Success;
        }
        match signal_name(code) {
            Some(signal) => ExitStatus::Signaled { code, signal },
            None => ExitStatus::NonZeroExit { code },
        }
    }

    /// Whether captured streams are meaningful for this status.
    pub fn has_output(&self) -> bool {
        !matches!(self, ExitStatus::LaunchFailed { .. })
    }

    /// Short machine-friendly label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ExitStatus::Success => "success",
            ExitStatus::NonZeroExit { .. } => "non_zero_exit",
            ExitStatus::Signaled { .. } => "signaled",
            ExitStatus::TimedOut { .. } => "timed_out",
            ExitStatus::LaunchFailed { .. } => "launch_failed",
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Success => write!(f, "exited 0"),
            ExitStatus::NonZeroExit { code } => write!(f, "exited {}", code),
            ExitStatus::Signaled { code, signal } => write!(f, "exited {} ({})", code, signal),
            ExitStatus::TimedOut { limit } => write!(f, "timed out after {}s", limit.as_secs()),
            ExitStatus::LaunchFailed { reason } => write!(f, "launch failed: {}", reason),
        }
    }
}

/// Everything observed from one invocation.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ExitStatus,
    /// Captured standard output, possibly partial.
    pub stdout: Vec<u8>,
    /// Captured standard error, possibly partial.
    pub stderr: Vec<u8>,
    /// Set when either stream hit the capture cap.
    pub truncated: bool,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl ExecutionOutcome {
    /// Outcome for a sandbox that could not be started.
    pub fn launch_failed(reason: impl Into<String>, started_at: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            status: ExitStatus::LaunchFailed {
                reason: reason.into(),
            },
            stdout: Vec::new(),
            stderr: Vec::new(),
            truncated: false,
            started_at,
            duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        assert_eq!(signal_name(137), Some("SIGKILL"));
        assert_eq!(signal_name(139), Some("SIGSEGV"));
        assert_eq!(signal_name(129), Some("SIGHUP"));
        assert_eq!(signal_name(159), Some("SIGSYS"));
        assert_eq!(signal_name(160), None);
        assert_eq!(signal_name(128), None);
        assert_eq!(signal_name(1), None);
        assert_eq!(signal_name(-1), None);
        assert_eq!(signal_name(i64::MIN), None);
    }

    #[test]
    fn test_classify_exit_codes() {
        assert_eq!(ExitStatus::from_exit_code(0), ExitStatus::Success);
        assert_eq!(
            ExitStatus::from_exit_code(1),
            ExitStatus::NonZeroExit { code: 1 }
        );
        assert_eq!(
            ExitStatus::from_exit_code(137),
            ExitStatus::Signaled {
                code: 137,
                signal: "SIGKILL"
            }
        );
        assert_eq!(
            ExitStatus::from_exit_code(255),
            ExitStatus::NonZeroExit { code: 255 }
        );
    }

    #[test]
    fn test_status_display() {
        assert_eq!(
            ExitStatus::Signaled {
                code: 143,
                signal: "SIGTERM"
            }
            .to_string(),
            "exited 143 (SIGTERM)"
        );
        assert_eq!(
            ExitStatus::TimedOut {
                limit: Duration::from_secs(5)
            }
            .to_string(),
            "timed out after 5s"
        );
    }
}
