//! Error types for shelleval.

use thiserror::Error;

/// Errors raised while building the profile registry.
///
/// These indicate malformed built-in data, never bad user input.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Profile '{key}' is invalid: {reason}")]
    InvalidProfile { key: String, reason: String },

    #[error("Duplicate profile key '{0}'")]
    DuplicateKey(String),

    #[error("Alias '{alias}' is already taken by '{existing}'")]
    DuplicateAlias { alias: String, existing: String },

    #[error("Alias '{alias}' shadows the profile key of the same name")]
    AliasShadowsKey { alias: String },
}

/// Errors raised while loading startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown sandbox backend '{0}', expected 'podman', 'docker' or 'docker-api'")]
    UnknownBackend(String),
}

/// Failures that can reach a caller of the service layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] crate::sandbox::SandboxError),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
