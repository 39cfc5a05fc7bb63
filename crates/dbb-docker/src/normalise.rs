//! Normalisation of runtime log output.
//!
//! The daemon wraps build progress in single-field JSON objects such as
//! `{"stream":"Step 1 : FROM debian:jessie\n"}` with JSON escapes left in
//! place. The patterns here unwrap that markup back into plain terminal text.
//! Order matters: colour stripping and blank collapsing run after unescaping.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Compiled substitution pipeline, applied in order.
struct LogPatterns {
    /// `{"stream":"..."}` wrapper, including the trailing line break
    stream: Regex,
    ampersand: Regex,
    /// Escaped tab, either `\u0009` or `\t`
    tab: Regex,
    less_than: Regex,
    greater_than: Regex,
    quote: Regex,
    /// Terminal colour codes: `\u001b[32m`
    colour: Regex,
    carriage_return: Regex,
    line_feed: Regex,
    blanks: Regex,
}

fn build_patterns() -> Option<LogPatterns> {
    Some(LogPatterns {
        stream: Regex::new(r#"^\{"stream":"(.*)"\}\s*$"#).ok()?,
        ampersand: Regex::new(r"\\u0026").ok()?,
        tab: Regex::new(r"\\(u0009|t)").ok()?,
        less_than: Regex::new(r"\\u003c").ok()?,
        greater_than: Regex::new(r"\\u003e").ok()?,
        quote: Regex::new(r#"\\""#).ok()?,
        colour: Regex::new(r"\\u001b\[[0-9]+m").ok()?,
        carriage_return: Regex::new(r"\\r").ok()?,
        line_feed: Regex::new(r"\\n").ok()?,
        blanks: Regex::new(r" +").ok()?,
    })
}

#[allow(clippy::incompatible_msrv)]
static PATTERNS: LazyLock<Option<LogPatterns>> = LazyLock::new(build_patterns);

/// Normalise one line of runtime log output.
///
/// Plain text passes through with only runs of spaces collapsed, so applying
/// this twice gives the same result as applying it once.
#[must_use]
pub fn normalise_line(line: &str) -> String {
    let Some(patterns) = PATTERNS.as_ref() else {
        return line.to_owned();
    };

    let line = patterns.stream.replace(line, "$1");
    let line = patterns.ampersand.replace_all(&line, "&");
    let line = patterns.tab.replace_all(&line, " ");
    let line = patterns.less_than.replace_all(&line, "<");
    let line = patterns.greater_than.replace_all(&line, ">");
    let line = patterns.quote.replace_all(&line, "\"");
    let line = patterns.colour.replace_all(&line, "");
    let line = patterns.carriage_return.replace_all(&line, "\r");
    let line = patterns.line_feed.replace_all(&line, "\n");
    patterns.blanks.replace_all(&line, " ").into_owned()
}

/// Error message of a `{"error": "..."}` progress line, if it is one.
#[must_use]
pub fn build_error(line: &str) -> Option<String> {
    let value: Value = serde_json::from_str(line.trim()).ok()?;
    value.get("error")?.as_str().map(str::to_owned)
}

/// Reassembles lines from arbitrarily split stream chunks.
///
/// Each yielded line keeps its terminating `\n`.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every line completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Remaining unterminated text at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}
