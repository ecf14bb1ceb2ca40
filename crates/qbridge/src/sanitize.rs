//! Line-level cleanup of worker terminal output.
//!
//! The worker writes for a human at a terminal: colour codes, spinners, banners,
//! box-drawn hint panels and an echo of whatever was typed at its `>` prompt.
//! [`OutputSanitizer::classify`] turns one raw line into either cleaned content
//! or a reason to drop it.

use std::borrow::Cow;
use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// OSC sequences, CSI sequences and the two-character `ESC x` forms.
static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1B(?:\][^\x07\x1B]*(?:\x07|\x1B\\)|\[[0-?]*[ -/]*[@-~]|[0-?@-Z\\-_])")
        .expect("ANSI escape pattern is valid")
});

/// Remainders shorter than this only count as echoes on an exact match.
const MIN_PARTIAL_ECHO_CHARS: usize = 8;

// ============================================================================
// Rules
// ============================================================================

/// Tables describing the worker's terminal chrome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SanitizerRules {
    /// Marker the worker prints in front of echoed input.
    pub prompt_marker: String,
    /// Lines starting with any of these are dropped.
    pub noise_prefixes: Vec<String>,
    /// Lines containing any of these are dropped.
    pub noise_phrases: Vec<String>,
}

impl Default for SanitizerRules {
    fn default() -> Self {
        Self {
            prompt_marker: ">".to_string(),
            noise_prefixes: ["q chat", "━", "╭", "│", "╰"]
                .into_iter()
                .map(String::from)
                .collect(),
            noise_phrases: [
                "/quit",
                "Welcome to",
                "Type /quit",
                "Did you know?",
                "Get notified whenever",
                "chat.enableNotifications",
                "/help all commands",
                "ctrl + j new lines",
                "You are chatting with",
                "Thinking...",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

// ============================================================================
// Outbound request
// ============================================================================

/// The text most recently written to a worker, used to recognise its echo.
#[derive(Debug, Clone, Default)]
pub struct Outbound {
    lines: HashSet<String>,
}

impl Outbound {
    pub fn new(text: &str) -> Self {
        let mut outbound = Self::default();
        outbound.extend(text);
        outbound
    }

    /// Add every non-blank line of `text`.
    pub fn extend(&mut self, text: &str) {
        for line in text.lines() {
            let line = line.trim();
            if !line.is_empty() {
                self.lines.insert(line.to_string());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// True when `remainder` reproduces a sent line, possibly wrapped by the
    /// terminal into several pieces.
    pub fn is_echo(&self, remainder: &str) -> bool {
        if self.lines.contains(remainder) {
            return true;
        }
        if remainder.chars().count() < MIN_PARTIAL_ECHO_CHARS {
            return false;
        }
        self.lines
            .iter()
            .any(|sent| {
                sent.contains(remainder)
                    || (sent.chars().count() >= MIN_PARTIAL_ECHO_CHARS
                        && remainder.starts_with(sent.as_str()))
            })
    }
}

// ============================================================================
// Sanitizer
// ============================================================================

/// Outcome of classifying one raw output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClass {
    /// Cleaned text worth keeping.
    Content(String),
    /// Terminal chrome or blank.
    Skip,
    /// The worker echoing the request back at its prompt.
    Echo,
}

#[derive(Debug, Clone, Default)]
pub struct OutputSanitizer {
    rules: SanitizerRules,
}

impl OutputSanitizer {
    pub fn new(rules: SanitizerRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &SanitizerRules {
        &self.rules
    }

    pub fn classify(&self, raw: &str, outbound: &Outbound) -> LineClass {
        let stripped = strip_ansi(raw);
        let line = stripped.trim();

        if line.is_empty() || is_box_drawing(line) {
            return LineClass::Skip;
        }

        let marker = self.rules.prompt_marker.as_str();
        if !marker.is_empty() {
            if let Some(rest) = line.strip_prefix(marker) {
                let rest = rest.trim();
                if rest.is_empty() {
                    return LineClass::Skip;
                }
                if outbound.is_echo(rest) {
                    return LineClass::Echo;
                }
                if self.is_noise(rest) {
                    return LineClass::Skip;
                }
                return LineClass::Content(rest.to_string());
            }
        }

        if self.is_noise(line) {
            return LineClass::Skip;
        }
        LineClass::Content(line.to_string())
    }

    /// Clean a whole block, keeping only content lines.
    pub fn clean_output(&self, text: &str, outbound: &Outbound) -> String {
        text.lines()
            .filter_map(|raw| match self.classify(raw, outbound) {
                LineClass::Content(line) => Some(line),
                LineClass::Skip | LineClass::Echo => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn is_noise(&self, line: &str) -> bool {
        self.rules
            .noise_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && line.starts_with(prefix.as_str()))
            || self
                .rules
                .noise_phrases
                .iter()
                .any(|phrase| !phrase.is_empty() && line.contains(phrase.as_str()))
    }
}

/// Remove terminal escape sequences and carriage returns.
pub fn strip_ansi(raw: &str) -> Cow<'_, str> {
    let without_escapes = ANSI_ESCAPE.replace_all(raw, "");
    if without_escapes.contains('\r') {
        Cow::Owned(without_escapes.replace('\r', ""))
    } else {
        without_escapes
    }
}

/// Box-drawing and block-element characters plus whitespace only.
fn is_box_drawing(line: &str) -> bool {
    line.chars()
        .all(|c| c.is_whitespace() || ('\u{2500}'..='\u{259F}').contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitizer() -> OutputSanitizer {
        OutputSanitizer::default()
    }

    #[test]
    fn test_strips_ansi_sequences() {
        let raw = "\x1b[1;32mHello\x1b[0m \x1b]0;title\x07world\x1b7\r";
        assert_eq!(strip_ansi(raw), "Hello world");
    }

    #[test]
    fn test_blank_and_border_lines_are_skipped() {
        let s = sanitizer();
        let outbound = Outbound::default();
        for line in ["", "   \t ", "\x1b[2m   \x1b[0m", "━━━━━━━━", "╭──────╮", " ╰──╯ ", "▀▀▀"] {
            assert_eq!(s.classify(line, &outbound), LineClass::Skip, "line {line:?}");
        }
    }

    #[test]
    fn test_banner_and_hints_are_skipped() {
        let s = sanitizer();
        let outbound = Outbound::default();
        for line in [
            "Welcome to Amazon Q!",
            "q chat --trust-all-tools",
            "│ Did you know? You can resume │",
            "  Thinking...",
            "Type /quit to exit",
        ] {
            assert_eq!(s.classify(line, &outbound), LineClass::Skip, "line {line:?}");
        }
    }

    #[test]
    fn test_prompt_echo_is_detected() {
        let s = sanitizer();
        let outbound = Outbound::new("Hello, my name is Ada");
        assert_eq!(
            s.classify("\x1b[35m> \x1b[0mHello, my name is Ada", &outbound),
            LineClass::Echo
        );
        assert_eq!(s.classify(">", &outbound), LineClass::Skip);
        assert_eq!(s.classify(">   ", &outbound), LineClass::Skip);
    }

    #[test]
    fn test_wrapped_echo_is_detected() {
        let s = sanitizer();
        let outbound = Outbound::new("please summarise the attached design document for me");
        assert_eq!(
            s.classify("> please summarise the attached", &outbound),
            LineClass::Echo
        );
    }

    #[test]
    fn test_prompt_line_with_answer_is_kept() {
        let s = sanitizer();
        let outbound = Outbound::new("What's my name?");
        assert_eq!(
            s.classify("> Your name is Ada.", &outbound),
            LineClass::Content("Your name is Ada.".to_string())
        );
    }

    #[test]
    fn test_clean_output_keeps_content_only() {
        let s = sanitizer();
        let outbound = Outbound::new("hi");
        let raw = "Welcome to Amazon Q!\n> hi\n\n> Hello there.\nHow can I help?\n> /quit\n";
        assert_eq!(s.clean_output(raw, &outbound), "Hello there.\nHow can I help?");
    }

    #[test]
    fn test_custom_rules() {
        let s = OutputSanitizer::new(SanitizerRules {
            prompt_marker: "$".to_string(),
            noise_prefixes: vec![],
            noise_phrases: vec!["[spinner]".to_string()],
        });
        let outbound = Outbound::new("ls");
        assert_eq!(s.classify("$ ls", &outbound), LineClass::Echo);
        assert_eq!(s.classify("[spinner] working", &outbound), LineClass::Skip);
        assert_eq!(
            s.classify("> quoted", &outbound),
            LineClass::Content("> quoted".to_string())
        );
    }
}
