//! Renders execution outcomes as chat-ready markdown.
//!
//! Replies are bounded to `max_chars` characters. Captured output never closes
//! a fence it did not open: runs of three or more backticks get a zero-width
//! space after every second backtick.

use crate::registry::ExecutionProfile;
use crate::sandbox::{ExecutionOutcome, ExitStatus};

/// Default reply bound, the message length limit of common chat platforms.
pub const DEFAULT_MAX_CHARS: usize = 2000;

/// Reply for faults that should never happen.
pub const INTERNAL_ERROR_NOTICE: &str = "**Internal error, the request could not be completed.**";

const TRUNCATED_NOTE: &str = "*output truncated*";
const FENCE: &str = "```";
const ZERO_WIDTH_SPACE: char = '\u{200B}';

/// A fenced body shorter than this is not worth rendering.
const MIN_BODY_CHARS: usize = 16;

/// Longest user-supplied language echoed back.
const MAX_LANGUAGE_CHARS: usize = 64;

#[derive(Debug, Clone)]
enum Part {
    Line(String),
    Fenced { class: String, body: String },
}

impl Part {
    fn render(&self) -> String {
        match self {
            Part::Line(line) => line.clone(),
            Part::Fenced { class, body } => format!("{FENCE}{class}\n{body}\n{FENCE}"),
        }
    }

    fn body_chars(&self) -> usize {
        match self {
            Part::Line(_) => 0,
            Part::Fenced { body, .. } => body.chars().count(),
        }
    }
}

fn render(parts: &[Part]) -> String {
    parts.iter().map(Part::render).collect::<Vec<_>>().join("\n")
}

/// Turns outcomes into display strings.
#[derive(Debug, Clone, Copy)]
pub struct Formatter {
    max_chars: usize,
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHARS)
    }
}

impl Formatter {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Render `outcome` for display. Total: every outcome yields a reply.
    pub fn format(&self, outcome: &ExecutionOutcome, profile: &ExecutionProfile) -> String {
        let header = match &outcome.status {
            ExitStatus::Success => None,
            ExitStatus::NonZeroExit { code } => Some(format!("**Process exited non-zero: `{code}`**")),
            ExitStatus::Signaled { code, signal } => {
                Some(format!("**Process exited non-zero: `{code}` ({signal})**"))
            }
            ExitStatus::TimedOut { limit } => {
                Some(format!("**Process timed out after {}s**", limit.as_secs()))
            }
            ExitStatus::LaunchFailed { reason } => {
                return self.failure_line("Failed to start sandbox: ", reason);
            }
        };

        let stdout = stream_body(&outcome.stdout);
        let stderr = stream_body(&outcome.stderr);

        let mut parts: Vec<Part> = header.into_iter().map(Part::Line).collect();
        if stdout.is_empty() && stderr.is_empty() {
            parts.push(Part::Line("*no stdout or stderr*".to_string()));
        } else {
            parts.push(stream_part(stdout, profile.stdout_class(), "*no stdout*"));
            parts.push(stream_part(stderr, profile.stderr_class(), "*no stderr*"));
        }
        if outcome.truncated {
            parts.push(Part::Line(TRUNCATED_NOTE.to_string()));
        }

        self.bounded(parts)
    }

    /// Reply for a language key that resolves to no profile.
    pub fn no_matching_language(&self, language: &str) -> String {
        let shown = truncate_chars(language, MAX_LANGUAGE_CHARS);
        let line = format!("**No matching language for {}!**", escape_markdown(shown));
        truncate_chars(&line, self.max_chars).to_string()
    }

    /// A single bold line with an escaped, length-bounded detail.
    fn failure_line(&self, prefix: &str, detail: &str) -> String {
        let overhead = prefix.chars().count() + 4;
        let escaped = escape_markdown(detail.trim());
        let room = self.max_chars.saturating_sub(overhead);
        let detail = truncate_chars(&escaped, room).trim_end_matches('\\');
        let line = format!("**{prefix}{detail}**");
        truncate_chars(&line, self.max_chars).to_string()
    }

    /// Shrink fenced bodies until the reply fits, keeping fences balanced.
    fn bounded(&self, mut parts: Vec<Part>) -> String {
        let rendered = render(&parts);
        let total = rendered.chars().count();
        if total <= self.max_chars {
            return rendered;
        }

        if !parts.iter().any(|p| matches!(p, Part::Fenced { .. })) {
            return truncate_chars(&rendered, self.max_chars).to_string();
        }

        if !parts
            .iter()
            .any(|p| matches!(p, Part::Line(line) if line == TRUNCATED_NOTE))
        {
            parts.push(Part::Line(TRUNCATED_NOTE.to_string()));
        }
        let rendered_chars = render(&parts).chars().count();
        let body_chars: usize = parts.iter().map(Part::body_chars).sum();
        let overhead = rendered_chars - body_chars;
        let fenced = parts
            .iter()
            .filter(|p| matches!(p, Part::Fenced { .. }))
            .count();
        let budget = self.max_chars.saturating_sub(overhead);

        if budget < fenced * MIN_BODY_CHARS {
            // Not even a sliver of output fits; keep the status and the note.
            let lines: Vec<Part> = parts
                .into_iter()
                .filter(|p| matches!(p, Part::Line(_)))
                .collect();
            return truncate_chars(&render(&lines), self.max_chars).to_string();
        }

        let lengths: Vec<usize> = parts.iter().map(Part::body_chars).collect();
        let allocation = share(&lengths, budget);
        for (part, allowed) in parts.iter_mut().zip(allocation) {
            if let Part::Fenced { body, .. } = part {
                let cut = truncate_chars(body, allowed).trim_end_matches('\n').to_string();
                *body = cut;
            }
        }
        render(&parts)
    }
}

/// Split `budget` across bodies: short ones keep everything, long ones share
/// the rest equally.
fn share(lengths: &[usize], budget: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..lengths.len()).filter(|&i| lengths[i] > 0).collect();
    order.sort_by_key(|&i| lengths[i]);

    let mut allocation = vec![0; lengths.len()];
    let mut remaining = budget;
    let mut left = order.len();
    for i in order {
        let fair = remaining / left;
        let given = lengths[i].min(fair);
        allocation[i] = given;
        remaining -= given;
        left -= 1;
    }
    allocation
}

fn stream_part(body: String, class: Option<&str>, placeholder: &str) -> Part {
    if body.is_empty() {
        Part::Line(placeholder.to_string())
    } else {
        Part::Fenced {
            class: class.unwrap_or_default().to_string(),
            body,
        }
    }
}

/// Decoded, newline-trimmed and fence-neutralized stream contents.
fn stream_body(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    neutralize_fences(text.trim_matches(|c| c == '\n' || c == '\r'))
}

/// Break every run of three or more backticks.
pub fn neutralize_fences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = 0;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if c != '`' {
            run = 0;
            continue;
        }
        run += 1;
        if run == 2 && chars.peek() == Some(&'`') {
            out.push(ZERO_WIDTH_SPACE);
            run = 0;
        }
    }
    out
}

/// Backslash-escape markdown control characters.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '*' | '_' | '`' | '~' | '|' | '>' | '#') {
            out.push('\\');
        }
        if c == '\n' || c == '\r' {
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((at, _)) => &text[..at],
        None => text,
    }
}
