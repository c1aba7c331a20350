//! Execution profiles: how to invoke a sandbox for one language and purpose.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::RegistryError;
use crate::sandbox::limits::{
    ByteSize, DEFAULT_WORKDIR, NetworkMode, ResourceLimits, RuntimeOption,
};

/// Immutable description of a sandbox invocation.
///
/// Built through [`ProfileBuilder`], which fills documented defaults and
/// validates everything up front so nothing is coalesced at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionProfile {
    key: String,
    image: String,
    argv: Vec<String>,
    workdir: String,
    limits: ResourceLimits,
    extra_options: Vec<RuntimeOption>,
    stdout_class: Option<String>,
    stderr_class: Option<String>,
    aliases: BTreeSet<String>,
}

impl ExecutionProfile {
    /// Start building a profile for `key`, running `argv` inside `image`.
    pub fn builder<I, S>(key: &str, image: &str, argv: I) -> ProfileBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ProfileBuilder {
            key: key.to_string(),
            image: image.to_string(),
            argv: argv.into_iter().map(Into::into).collect(),
            workdir: None,
            timeout: None,
            memory: None,
            pids_limit: None,
            network: None,
            extra_options: Vec::new(),
            stdout_class: None,
            stderr_class: None,
            aliases: BTreeSet::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn workdir(&self) -> &str {
        &self.workdir
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn timeout(&self) -> Duration {
        self.limits.timeout
    }

    pub fn extra_options(&self) -> &[RuntimeOption] {
        &self.extra_options
    }

    /// Highlighting hint for the stdout fence.
    pub fn stdout_class(&self) -> Option<&str> {
        self.stdout_class.as_deref()
    }

    /// Highlighting hint for the stderr fence.
    pub fn stderr_class(&self) -> Option<&str> {
        self.stderr_class.as_deref()
    }

    pub fn aliases(&self) -> &BTreeSet<String> {
        &self.aliases
    }
}

/// Builder for [`ExecutionProfile`].
#[derive(Debug, Clone)]
pub struct ProfileBuilder {
    key: String,
    image: String,
    argv: Vec<String>,
    workdir: Option<String>,
    timeout: Option<Duration>,
    memory: Option<ByteSize>,
    pids_limit: Option<u32>,
    network: Option<NetworkMode>,
    extra_options: Vec<RuntimeOption>,
    stdout_class: Option<String>,
    stderr_class: Option<String>,
    aliases: BTreeSet<String>,
}

impl ProfileBuilder {
    pub fn workdir(mut self, workdir: &str) -> Self {
        self.workdir = Some(workdir.to_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn memory(mut self, memory: ByteSize) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn pids_limit(mut self, pids: u32) -> Self {
        self.pids_limit = Some(pids);
        self
    }

    pub fn network(mut self, network: NetworkMode) -> Self {
        self.network = Some(network);
        self
    }

    pub fn option(mut self, option: RuntimeOption) -> Self {
        self.extra_options.push(option);
        self
    }

    pub fn stdout_class(mut self, class: &str) -> Self {
        self.stdout_class = Some(class.to_string());
        self
    }

    pub fn stderr_class(mut self, class: &str) -> Self {
        self.stderr_class = Some(class.to_string());
        self
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.insert(alias.to_string());
        self
    }

    /// Validate and freeze the profile.
    pub fn build(self) -> Result<ExecutionProfile, RegistryError> {
        let invalid = |reason: String| RegistryError::InvalidProfile {
            key: self.key.clone(),
            reason,
        };

        if !is_lookup_key(&self.key) {
            return Err(invalid(
                "key must be non-empty lowercase ASCII letters".to_string(),
            ));
        }
        if let Some(alias) = self.aliases.iter().find(|a| !is_lookup_key(a)) {
            return Err(invalid(format!(
                "alias '{}' must be non-empty lowercase ASCII letters",
                alias
            )));
        }
        if self.aliases.contains(&self.key) {
            return Err(invalid("profile lists its own key as an alias".to_string()));
        }
        if self.image.trim().is_empty() {
            return Err(invalid("image must not be empty".to_string()));
        }
        if self.argv.is_empty() || self.argv.iter().any(|a| a.is_empty()) {
            return Err(invalid(
                "argv must be non-empty and contain no empty arguments".to_string(),
            ));
        }
        let workdir = self
            .workdir
            .clone()
            .unwrap_or_else(|| DEFAULT_WORKDIR.to_string());
        if !workdir.starts_with('/') {
            return Err(invalid(format!("workdir '{}' must be absolute", workdir)));
        }

        let defaults = ResourceLimits::default();
        let limits = ResourceLimits {
            timeout: self.timeout.unwrap_or(defaults.timeout),
            memory: self.memory.unwrap_or(defaults.memory),
            pids_limit: self.pids_limit.unwrap_or(defaults.pids_limit),
            network: self.network.clone().unwrap_or(defaults.network),
        };
        if limits.timeout.is_zero() {
            return Err(invalid("timeout must be non-zero".to_string()));
        }
        if limits.pids_limit == 0 {
            return Err(invalid("pids limit must be non-zero".to_string()));
        }

        for option in &self.extra_options {
            option.validate().map_err(invalid)?;
        }
        for class in [&self.stdout_class, &self.stderr_class].into_iter().flatten() {
            if !is_fence_class(class) {
                return Err(invalid(format!("highlight class '{}' is not a fence tag", class)));
            }
        }

        Ok(ExecutionProfile {
            key: self.key,
            image: self.image,
            argv: self.argv,
            workdir,
            limits,
            extra_options: self.extra_options,
            stdout_class: self.stdout_class,
            stderr_class: self.stderr_class,
            aliases: self.aliases,
        })
    }
}

/// Keys and aliases share the extractor's tag alphabet.
fn is_lookup_key(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_lowercase())
}

/// A fence info string that cannot break out of the fence line.
fn is_fence_class(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::limits::{DEFAULT_MEMORY, DEFAULT_PIDS_LIMIT, DEFAULT_TIMEOUT};

    #[test]
    fn test_builder_fills_defaults() {
        let profile = ExecutionProfile::builder("sh", "eval-shell:alpine", ["sh"])
            .build()
            .unwrap();

        assert_eq!(profile.workdir(), "/root");
        assert_eq!(profile.limits().timeout, DEFAULT_TIMEOUT);
        assert_eq!(profile.limits().memory, DEFAULT_MEMORY);
        assert_eq!(profile.limits().pids_limit, DEFAULT_PIDS_LIMIT);
        assert!(profile.limits().network.is_disabled());
        assert!(profile.extra_options().is_empty());
        assert_eq!(profile.stdout_class(), None);
    }

    #[test]
    fn test_builder_custom_values() {
        let profile = ExecutionProfile::builder("zsh", "eval-shell:alpine", ["zsh", "-l"])
            .workdir("/")
            .timeout(Duration::from_secs(2))
            .memory(ByteSize::mib(64))
            .pids_limit(16)
            .option(RuntimeOption::env("LANG", "C.UTF-8"))
            .stdout_class("zsh")
            .alias("zshell")
            .build()
            .unwrap();

        assert_eq!(profile.workdir(), "/");
        assert_eq!(profile.timeout(), Duration::from_secs(2));
        assert_eq!(profile.limits().memory, ByteSize::mib(64));
        assert_eq!(profile.limits().pids_limit, 16);
        assert_eq!(profile.extra_options().len(), 1);
        assert_eq!(profile.stdout_class(), Some("zsh"));
        assert!(profile.aliases().contains("zshell"));
    }

    #[test]
    fn test_builder_rejects_malformed_profiles() {
        let empty_argv: [&str; 0] = [];
        assert!(ExecutionProfile::builder("sh", "img", empty_argv).build().is_err());
        assert!(ExecutionProfile::builder("sh", "", ["sh"]).build().is_err());
        assert!(ExecutionProfile::builder("Sh", "img", ["sh"]).build().is_err());
        assert!(ExecutionProfile::builder("sh2", "img", ["sh"]).build().is_err());
        assert!(
            ExecutionProfile::builder("sh", "img", ["sh"])
                .workdir("relative")
                .build()
                .is_err()
        );
        assert!(
            ExecutionProfile::builder("sh", "img", ["sh"])
                .timeout(Duration::ZERO)
                .build()
                .is_err()
        );
        assert!(
            ExecutionProfile::builder("sh", "img", ["sh"])
                .alias("sh")
                .build()
                .is_err()
        );
        assert!(
            ExecutionProfile::builder("sh", "img", ["sh"])
                .stdout_class("x\n```")
                .build()
                .is_err()
        );
    }
}
