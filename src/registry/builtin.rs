//! Built-in shell profiles.

use crate::error::RegistryError;
use crate::registry::profile::ExecutionProfile;
use crate::sandbox::limits::RuntimeOption;

const EVAL_IMAGE: &str = "eval-shell:alpine";
const SHELLCHECK_IMAGE: &str = "koalaman/shellcheck";
const SHFMT_IMAGE: &str = "mvdan/shfmt";

/// Dialects shellcheck understands, with the aliases users type for them.
const SHELLCHECK_DIALECTS: [(&str, &[&str]); 4] = [
    ("sh", &["posix"]),
    ("bash", &["shell"]),
    ("dash", &[]),
    ("ksh", &["mksh"]),
];

pub(super) fn evaluate_profiles() -> Result<Vec<ExecutionProfile>, RegistryError> {
    Ok(vec![
        ExecutionProfile::builder("sh", EVAL_IMAGE, ["sh"])
            .alias("posix")
            .build()?,
        ExecutionProfile::builder("bash", EVAL_IMAGE, ["bash", "-O", "extglob", "-O", "globstar"])
            .alias("shell")
            .build()?,
        ExecutionProfile::builder("zsh", EVAL_IMAGE, ["zsh", "-l", "--extendedglob", "--multibyte"])
            .option(RuntimeOption::env("LANG", "C.UTF-8"))
            .build()?,
        ExecutionProfile::builder("ksh", EVAL_IMAGE, ["ksh"])
            .alias("mksh")
            .build()?,
        ExecutionProfile::builder("dash", EVAL_IMAGE, ["dash"]).build()?,
    ])
}

pub(super) fn check_profiles() -> Result<Vec<ExecutionProfile>, RegistryError> {
    let mut profiles = SHELLCHECK_DIALECTS
        .iter()
        .map(|(dialect, aliases)| {
            aliases
                .iter()
                .fold(
                    ExecutionProfile::builder(
                        dialect,
                        SHELLCHECK_IMAGE,
                        [format!("--shell={}", dialect), "/dev/stdin".to_string()],
                    )
                    .workdir("/"),
                    |builder, alias| builder.alias(alias),
                )
                .build()
        })
        .collect::<Result<Vec<_>, _>>()?;

    // shellcheck has no zsh support; fall back to zsh's own parser
    profiles.push(
        ExecutionProfile::builder("zsh", EVAL_IMAGE, ["zsh", "-n"])
            .option(RuntimeOption::env("LANG", "C.UTF-8"))
            .build()?,
    );

    Ok(profiles)
}

pub(super) fn format_profiles() -> Result<Vec<ExecutionProfile>, RegistryError> {
    [("sh", "posix", "posix"), ("bash", "bash", "shell"), ("ksh", "mksh", "mksh")]
        .into_iter()
        .map(|(key, dialect, alias)| {
            ExecutionProfile::builder(key, SHFMT_IMAGE, [format!("--language-dialect={}", dialect)])
                .workdir("/")
                .stdout_class(key)
                .alias(alias)
                .build()
        })
        .collect()
}
