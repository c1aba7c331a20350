//! Startup configuration.
//!
//! Read once from the environment (after `.env` is loaded) and treated as
//! immutable afterwards. CLI flags may override individual values before the
//! service is built.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::format::DEFAULT_MAX_CHARS;
use crate::registry::DEFAULT_LANGUAGE;
use crate::sandbox::limits::{ByteSize, DEFAULT_MAX_OUTPUT_BYTES};
use crate::sandbox::{CliBackend, DockerApiBackend, Engine, SandboxBackend, SandboxError};

/// Replies shorter than this cannot hold a status line and a block.
const MIN_MESSAGE_CHARS: usize = 100;

const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Which sandbox backend to run snippets with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// `podman run` via the CLI.
    #[default]
    Podman,
    /// `docker run` via the CLI.
    Docker,
    /// Engine HTTP API (Docker or Podman's compatible socket).
    DockerApi,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Podman => "podman",
            Backend::Docker => "docker",
            Backend::DockerApi => "docker-api",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "podman" => Ok(Backend::Podman),
            "docker" => Ok(Backend::Docker),
            "docker-api" | "docker_api" | "api" => Ok(Backend::DockerApi),
            _ => Err(ConfigError::UnknownBackend(s.to_string())),
        }
    }
}

/// Process-wide settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub backend: Backend,
    /// Engine CLI binary; defaults to the backend name.
    pub runtime_bin: Option<String>,
    /// Per-stream capture cap in bytes.
    pub max_output_bytes: usize,
    /// Reply length bound in characters.
    pub max_message_chars: usize,
    /// Language key for snippets without a tag.
    pub default_language: String,
    /// Bound on the forced container removal after a timeout.
    pub cleanup_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            runtime_bin: None,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_message_chars: DEFAULT_MAX_CHARS,
            default_language: DEFAULT_LANGUAGE.to_string(),
            cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
        }
    }
}

impl Config {
    /// Load from `SHELLEVAL_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unset or blank keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(value) = get("SHELLEVAL_BACKEND") {
            config.backend = value.parse()?;
        }
        config.runtime_bin = get("SHELLEVAL_RUNTIME_BIN");
        if let Some(value) = get("SHELLEVAL_MAX_OUTPUT_BYTES") {
            config.max_output_bytes = parse_byte_size("SHELLEVAL_MAX_OUTPUT_BYTES", &value)?;
        }
        if let Some(value) = get("SHELLEVAL_MAX_MESSAGE_CHARS") {
            config.max_message_chars = parse_number("SHELLEVAL_MAX_MESSAGE_CHARS", &value)?;
        }
        if let Some(value) = get("SHELLEVAL_DEFAULT_LANGUAGE") {
            config.default_language = value.trim().to_lowercase();
        }
        if let Some(value) = get("SHELLEVAL_CLEANUP_TIMEOUT_SECS") {
            let secs: u64 = parse_number("SHELLEVAL_CLEANUP_TIMEOUT_SECS", &value)?;
            config.cleanup_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_chars < MIN_MESSAGE_CHARS {
            return Err(invalid(
                "SHELLEVAL_MAX_MESSAGE_CHARS",
                format!("must be at least {}", MIN_MESSAGE_CHARS),
            ));
        }
        if self.max_output_bytes == 0 {
            return Err(invalid("SHELLEVAL_MAX_OUTPUT_BYTES", "must be non-zero"));
        }
        if self.default_language.is_empty()
            || !self.default_language.chars().all(|c| c.is_ascii_lowercase())
        {
            return Err(invalid(
                "SHELLEVAL_DEFAULT_LANGUAGE",
                format!("'{}' is not a language key", self.default_language),
            ));
        }
        if self.cleanup_timeout.is_zero() {
            return Err(invalid("SHELLEVAL_CLEANUP_TIMEOUT_SECS", "must be non-zero"));
        }
        Ok(())
    }

    /// The engine CLI binary to execute.
    pub fn runtime_bin(&self) -> &str {
        match (&self.runtime_bin, self.backend) {
            (Some(bin), _) => bin,
            (None, Backend::Docker) => Engine::Docker.default_binary(),
            (None, _) => Engine::Podman.default_binary(),
        }
    }

    /// Construct the configured sandbox backend.
    ///
    /// The API backend connects eagerly so an unreachable engine is reported
    /// at startup.
    pub async fn sandbox_backend(&self) -> Result<Arc<dyn SandboxBackend>, SandboxError> {
        let backend: Arc<dyn SandboxBackend> = match self.backend {
            Backend::Podman => Arc::new(CliBackend::new(
                Engine::Podman,
                self.runtime_bin(),
                self.cleanup_timeout,
            )),
            Backend::Docker => Arc::new(CliBackend::new(
                Engine::Docker,
                self.runtime_bin(),
                self.cleanup_timeout,
            )),
            Backend::DockerApi => Arc::new(DockerApiBackend::connect().await?),
        };
        Ok(backend)
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(key, format!("'{}': {}", value, e)))
}

fn parse_byte_size(key: &str, value: &str) -> Result<usize, ConfigError> {
    let size: ByteSize = value.parse().map_err(|e: String| invalid(key, e))?;
    usize::try_from(size.as_u64()).map_err(|_| invalid(key, "too large for this platform"))
}
