//! Execution profile registry.
//!
//! Three purpose-scoped tables are built once at startup from static data and
//! never mutated afterwards. The registry is handed to the components that
//! need it; there is no global lookup.
//!
//! ```text
//! ┌──────────────┬─────────────────────────┬───────────────────────────────┐
//! │ Purpose      │ Image                   │ Languages                     │
//! ├──────────────┼─────────────────────────┼───────────────────────────────┤
//! │ Evaluate     │ eval-shell:alpine       │ sh bash zsh ksh dash          │
//! │ Check        │ koalaman/shellcheck     │ sh bash ksh dash (+ zsh -n)   │
//! │ Format       │ mvdan/shfmt             │ sh bash ksh                   │
//! └──────────────┴─────────────────────────┴───────────────────────────────┘
//! ```

mod builtin;
pub mod profile;
pub mod table;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use profile::{ExecutionProfile, ProfileBuilder};
pub use table::ProfileTable;

use crate::error::RegistryError;

/// Language assumed when a snippet carries no tag.
pub const DEFAULT_LANGUAGE: &str = "bash";

/// What a snippet is submitted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    /// Run the snippet.
    Evaluate,
    /// Static analysis (shellcheck).
    Check,
    /// Reformat the snippet (shfmt).
    Format,
}

impl Purpose {
    pub const ALL: [Purpose; 3] = [Purpose::Evaluate, Purpose::Check, Purpose::Format];

    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Evaluate => "evaluate",
            Purpose::Check => "check",
            Purpose::Format => "format",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Purpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "evaluate" | "eval" | "run" => Ok(Purpose::Evaluate),
            "check" | "lint" | "shellcheck" => Ok(Purpose::Check),
            "format" | "fmt" => Ok(Purpose::Format),
            _ => Err(format!(
                "invalid purpose '{}', expected 'evaluate', 'check', or 'format'",
                s
            )),
        }
    }
}

/// The three profile tables.
#[derive(Debug)]
pub struct Registry {
    evaluate: ProfileTable,
    check: ProfileTable,
    format: ProfileTable,
}

impl Registry {
    /// Assemble a registry from prebuilt tables.
    pub fn new(evaluate: ProfileTable, check: ProfileTable, format: ProfileTable) -> Self {
        Self {
            evaluate,
            check,
            format,
        }
    }

    /// The built-in shell tables.
    ///
    /// Deterministic and free of I/O; an error means the static data is broken.
    pub fn builtin() -> Result<Self, RegistryError> {
        Ok(Self::new(
            ProfileTable::new(builtin::evaluate_profiles()?)?,
            ProfileTable::new(builtin::check_profiles()?)?,
            ProfileTable::new(builtin::format_profiles()?)?,
        ))
    }

    pub fn table(&self, purpose: Purpose) -> &ProfileTable {
        match purpose {
            Purpose::Evaluate => &self.evaluate,
            Purpose::Check => &self.check,
            Purpose::Format => &self.format,
        }
    }

    /// Resolve `key` (or one of its aliases) in the table for `purpose`.
    pub fn resolve(&self, purpose: Purpose, key: &str) -> Option<Arc<ExecutionProfile>> {
        self.table(purpose).resolve(key)
    }

    pub fn languages(&self, purpose: Purpose) -> BTreeMap<String, Vec<String>> {
        self.table(purpose).languages()
    }
}
