//! The three entry points: evaluate, check and format.
//!
//! Every request flows through the same pipeline:
//!
//! ```text
//!   text ──▶ extract ──▶ Registry::resolve ──▶ SandboxRunner::run ──▶ Formatter ──▶ reply
//!                               │
//!                               └── no profile ──▶ "No matching language" reply
//! ```
//!
//! Expected failures (unknown language, launch failure, timeout, non-zero
//! exit) all end up as a reply string. Only a crashed worker turns into the
//! generic internal-error notice.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::Config;
use crate::error::{Result, ServiceError};
use crate::extract::extract;
use crate::format::{Formatter, INTERNAL_ERROR_NOTICE};
use crate::registry::{Purpose, Registry};
use crate::sandbox::SandboxRunner;

/// One inbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub purpose: Purpose,
    /// Raw message text, or bare code when `language` is given.
    pub text: String,
    /// Explicit language key; skips block extraction.
    #[serde(default)]
    pub language: Option<String>,
    /// Display label for the caller.
    #[serde(default = "default_caller")]
    pub caller: String,
}

fn default_caller() -> String {
    "anonymous".to_string()
}

impl Request {
    pub fn new(purpose: Purpose, text: impl Into<String>, caller: impl Into<String>) -> Self {
        Self {
            purpose,
            text: text.into(),
            language: None,
            caller: caller.into(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Shared, cheaply cloneable request handler.
#[derive(Debug, Clone)]
pub struct Service {
    registry: Arc<Registry>,
    runner: SandboxRunner,
    formatter: Formatter,
    default_language: String,
}

impl Service {
    pub fn new(
        registry: Arc<Registry>,
        runner: SandboxRunner,
        formatter: Formatter,
        default_language: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            runner,
            formatter,
            default_language: default_language.into(),
        }
    }

    /// Build the built-in registry and the configured backend.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let registry = Arc::new(Registry::builtin()?);
        let backend = config.sandbox_backend().await?;
        let runner = SandboxRunner::new(backend).with_max_output_bytes(config.max_output_bytes);

        info!(
            "Service ready: backend={}, default language={}",
            runner.backend_name(),
            config.default_language
        );

        Ok(Self::new(
            registry,
            runner,
            Formatter::new(config.max_message_chars),
            config.default_language.clone(),
        ))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run the snippet in `text`.
    pub async fn evaluate(&self, text: &str, caller: &str) -> String {
        self.handle(Request::new(Purpose::Evaluate, text, caller)).await
    }

    /// Run `code` as `language`, without looking for a code block.
    pub async fn evaluate_as(&self, language: &str, code: &str, caller: &str) -> String {
        self.handle(Request::new(Purpose::Evaluate, code, caller).with_language(language))
            .await
    }

    /// Lint the snippet in `text`.
    pub async fn check(&self, text: &str, caller: &str) -> String {
        self.handle(Request::new(Purpose::Check, text, caller)).await
    }

    /// Reformat the snippet in `text`.
    pub async fn format_code(&self, text: &str, caller: &str) -> String {
        self.handle(Request::new(Purpose::Format, text, caller)).await
    }

    /// Handle a request on the current task.
    pub async fn handle(&self, request: Request) -> String {
        let Request {
            purpose,
            text,
            language,
            caller,
        } = request;

        let (code, language) = match language {
            Some(language) => (text, language.trim().to_lowercase()),
            None => {
                let snippet = extract(&text, &self.default_language);
                tracing::debug!("Extracted {:?} snippet tagged '{}'", snippet.source, snippet.language);
                (snippet.code, snippet.language)
            }
        };

        let Some(profile) = self.registry.resolve(purpose, &language) else {
            info!("No {} profile for '{}' (caller {})", purpose, language, caller);
            return self.formatter.no_matching_language(&language);
        };

        let outcome = self.runner.run(&profile, code.as_bytes(), &caller).await;
        self.formatter.format(&outcome, &profile)
    }

    /// Handle a request on its own worker task.
    ///
    /// A slow sandbox never blocks the caller's event loop, and a panicking
    /// worker yields the internal-error notice instead of tearing it down.
    pub async fn dispatch(&self, request: Request) -> String {
        match self.spawn_worker(request).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("{}", e);
                INTERNAL_ERROR_NOTICE.to_string()
            }
        }
    }

    async fn spawn_worker(&self, request: Request) -> Result<String> {
        let service = self.clone();
        tokio::spawn(async move { service.handle(request).await })
            .await
            .map_err(|e| ServiceError::Worker(e.to_string()))
    }
}
