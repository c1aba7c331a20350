//! Snippet extraction from raw message text.
//!
//! Tries, in order:
//!
//! 1. A triple-backtick fenced block (first fence pair only), with an
//!    optional alphabetic language tag on the opening line.
//! 2. The last inline single-backtick span.
//! 3. The whole text.
//!
//! Extraction never fails.

use std::sync::LazyLock;

use regex::Regex;

const FENCE: &str = "```";

/// Backtick spans paired left to right from the start of the text, skipping
/// `\``; the greedy repetition leaves the last complete span in group 1.
static INLINE_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^(?:(?:[^`\\]|\\.)*`[^`]*`)*(?:[^`\\]|\\.)*`([^`]*)`")
        .unwrap_or_else(|e| unreachable!("{e}"))
});

/// Which rule produced a snippet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnippetSource {
    Fenced,
    Inline,
    Raw,
}

/// Code pulled out of a message plus the language to run it as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub code: String,
    /// Lower-cased language key.
    pub language: String,
    pub source: SnippetSource,
}

/// Extract a snippet from `text`, using `default_language` when untagged.
pub fn extract(text: &str, default_language: &str) -> Snippet {
    if let Some((code, tag)) = fenced_block(text) {
        return Snippet {
            code: code.to_string(),
            language: tag.unwrap_or_else(|| default_language.to_lowercase()),
            source: SnippetSource::Fenced,
        };
    }

    if let Some(code) = inline_span(text) {
        return Snippet {
            code: code.to_string(),
            language: default_language.to_lowercase(),
            source: SnippetSource::Inline,
        };
    }

    Snippet {
        code: text.to_string(),
        language: default_language.to_lowercase(),
        source: SnippetSource::Raw,
    }
}

/// Body and optional tag of the first fenced region.
///
/// An unterminated fence runs to the end of the text.
fn fenced_block(text: &str) -> Option<(&str, Option<String>)> {
    let mut parts = text.splitn(3, FENCE);
    let _before = parts.next()?;
    let inner = parts.next()?;

    let (body, tag) = match inner.split_once('\n') {
        Some((first_line, rest)) => {
            let candidate = first_line.trim();
            if candidate.is_empty() {
                (rest, None)
            } else if candidate.chars().all(|c| c.is_ascii_alphabetic()) {
                (rest, Some(candidate.to_ascii_lowercase()))
            } else {
                (inner, None)
            }
        }
        None => (inner, None),
    };

    Some((strip_final_newline(body), tag))
}

fn inline_span(text: &str) -> Option<&str> {
    INLINE_SPAN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Drop the line break that precedes a closing fence.
fn strip_final_newline(body: &str) -> &str {
    body.strip_suffix("\r\n")
        .or_else(|| body.strip_suffix('\n'))
        .unwrap_or(body)
}
