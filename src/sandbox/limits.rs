//! Resource envelope passed to every sandbox invocation.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Sandbox Envelope                        │
//! ├──────────────────┬───────────────────────────────────────────┤
//! │ Ceiling          │ Default                                   │
//! ├──────────────────┼───────────────────────────────────────────┤
//! │ Wall clock       │ 5s, then the container is force-removed   │
//! │ Memory           │ 32 MiB, no swap                           │
//! │ Processes        │ 64                                        │
//! │ Network          │ none                                      │
//! │ Working dir      │ /root                                     │
//! └──────────────────┴───────────────────────────────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default wall-clock budget for a snippet.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default memory ceiling (32 MiB).
pub const DEFAULT_MEMORY: ByteSize = ByteSize::mib(32);

/// Default process-count ceiling.
pub const DEFAULT_PIDS_LIMIT: u32 = 64;

/// Default working directory inside the sandbox.
pub const DEFAULT_WORKDIR: &str = "/root";

/// Default per-stream capture cap (256 KiB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 256 * 1024;

/// A byte quantity as accepted by container engines (`32M`, `512k`, `1GiB`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteSize(u64);

impl ByteSize {
    pub const fn bytes(n: u64) -> Self {
        Self(n)
    }

    pub const fn kib(n: u64) -> Self {
        Self(n * 1024)
    }

    pub const fn mib(n: u64) -> Self {
        Self(n * 1024 * 1024)
    }

    pub const fn gib(n: u64) -> Self {
        Self(n * 1024 * 1024 * 1024)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl FromStr for ByteSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, unit) = trimmed.split_at(split);
        if digits.is_empty() {
            return Err(format!("invalid byte size '{}': missing number", s));
        }
        let value: u64 = digits
            .parse()
            .map_err(|e| format!("invalid byte size '{}': {}", s, e))?;
        let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "b" => 1,
            "k" | "kb" | "kib" => 1024,
            "m" | "mb" | "mib" => 1024 * 1024,
            "g" | "gb" | "gib" => 1024 * 1024 * 1024,
            other => {
                return Err(format!(
                    "invalid byte size '{}': unknown unit '{}', expected b, k, m or g",
                    s, other
                ));
            }
        };
        let bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| format!("invalid byte size '{}': overflow", s))?;
        if bytes == 0 {
            return Err(format!("invalid byte size '{}': must be non-zero", s));
        }
        Ok(Self(bytes))
    }
}

/// Renders in the shortest exact engine notation (`32m`, `512k`, `1000`).
impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [(u64, &str); 3] = [
            (1024 * 1024 * 1024, "g"),
            (1024 * 1024, "m"),
            (1024, "k"),
        ];
        for (size, suffix) in UNITS {
            if self.0 >= size && self.0 % size == 0 {
                return write!(f, "{}{}", self.0 / size, suffix);
            }
        }
        write!(f, "{}", self.0)
    }
}

/// Network attachment of the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NetworkMode {
    /// No network interfaces besides loopback.
    #[default]
    None,
    /// The engine's default bridge network.
    Bridge,
    /// Share the host network stack.
    Host,
    /// A named, pre-existing engine network.
    Named(String),
}

impl NetworkMode {
    pub fn is_disabled(&self) -> bool {
        matches!(self, NetworkMode::None)
    }

    pub fn as_str(&self) -> &str {
        match self {
            NetworkMode::None => "none",
            NetworkMode::Bridge => "bridge",
            NetworkMode::Host => "host",
            NetworkMode::Named(name) => name,
        }
    }
}

impl FromStr for NetworkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err("network mode must not be empty".to_string()),
            "none" => Ok(NetworkMode::None),
            "bridge" => Ok(NetworkMode::Bridge),
            "host" => Ok(NetworkMode::Host),
            name if name.chars().all(|c| c.is_ascii_alphanumeric() || "-_.".contains(c)) => {
                Ok(NetworkMode::Named(name.to_string()))
            }
            other => Err(format!("invalid network name '{}'", other)),
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Additional isolation flag applied on top of the base envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeOption {
    /// Extra environment variable inside the sandbox.
    Env { key: String, value: String },
    /// Mount the image's root filesystem read-only.
    ReadOnlyRootfs,
    /// Mount a tmpfs at `path` (`options` as understood by the engine, e.g. `size=16m`).
    Tmpfs { path: String, options: String },
    /// Drop a Linux capability (`ALL` drops everything).
    CapDrop(String),
    /// Forbid privilege escalation through setuid binaries.
    NoNewPrivileges,
}

impl RuntimeOption {
    pub fn env(key: impl Into<String>, value: impl Into<String>) -> Self {
        RuntimeOption::Env {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Engine CLI flags for this option, in order.
    pub fn to_cli_args(&self) -> Vec<String> {
        match self {
            RuntimeOption::Env { key, value } => vec![format!("--env={}={}", key, value)],
            RuntimeOption::ReadOnlyRootfs => vec!["--read-only".to_string()],
            RuntimeOption::Tmpfs { path, options } if options.is_empty() => {
                vec![format!("--tmpfs={}", path)]
            }
            RuntimeOption::Tmpfs { path, options } => vec![format!("--tmpfs={}:{}", path, options)],
            RuntimeOption::CapDrop(cap) => vec![format!("--cap-drop={}", cap)],
            RuntimeOption::NoNewPrivileges => {
                vec!["--security-opt=no-new-privileges".to_string()]
            }
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        match self {
            RuntimeOption::Env { key, .. } => {
                let valid = !key.is_empty()
                    && !key.starts_with(|c: char| c.is_ascii_digit())
                    && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                if valid {
                    Ok(())
                } else {
                    Err(format!("invalid environment variable name '{}'", key))
                }
            }
            RuntimeOption::Tmpfs { path, .. } if !path.starts_with('/') => {
                Err(format!("tmpfs path '{}' must be absolute", path))
            }
            RuntimeOption::CapDrop(cap) if cap.is_empty() => {
                Err("capability name must not be empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Hard ceilings for a single invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Wall-clock budget; the sandbox is killed when it elapses.
    pub timeout: Duration,
    /// Memory ceiling (swap is capped at the same value).
    pub memory: ByteSize,
    /// Maximum number of processes inside the sandbox.
    pub pids_limit: u32,
    /// Network attachment.
    pub network: NetworkMode,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            memory: DEFAULT_MEMORY,
            pids_limit: DEFAULT_PIDS_LIMIT,
            network: NetworkMode::None,
        }
    }
}

impl ResourceLimits {
    /// Engine CLI flags carrying these ceilings.
    pub fn to_cli_args(&self) -> Vec<String> {
        vec![
            format!("--pids-limit={}", self.pids_limit),
            format!("--memory={}", self.memory),
            format!("--memory-swap={}", self.memory),
            format!("--network={}", self.network),
        ]
    }
}
