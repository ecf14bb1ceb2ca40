//! Removal of content the worker repeats within one answer.
//!
//! The worker occasionally re-prints its self-introduction or capability list,
//! sometimes verbatim and sometimes reworded. [`DuplicateRemover::remove`] runs
//! three passes over an assembled block:
//!
//! 1. exact block dedup (whole paragraphs, or sliding line windows when the
//!    text is a single paragraph),
//! 2. mirrored halves (the whole answer printed twice),
//! 3. pattern collapse (help offers and capability bullets keyed to a
//!    canonical category, then exact line repeats).
//!
//! Fenced code blocks pass through untouched. The result never grows and
//! removing duplicates from an already cleaned text is a no-op.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Maps a worker phrasing to the capability it describes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalPhrase {
    pub phrase: String,
    pub category: String,
}

impl CanonicalPhrase {
    fn new(phrase: &str, category: &str) -> Self {
        Self {
            phrase: phrase.to_string(),
            category: category.to_string(),
        }
    }
}

/// Tunables and phrase tables for duplicate removal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DedupRules {
    /// Texts shorter than this (in bytes) are returned as-is.
    pub min_length: usize,
    /// Line count of the sliding window used on single-paragraph text.
    pub window_lines: usize,
    /// How far (in bytes) from the midpoint a mirrored split may sit.
    pub midpoint_radius: usize,
    /// Lines containing any of these are offers of help; only the first survives.
    pub help_phrases: Vec<String>,
    /// Line prefixes marking a bullet item.
    pub bullet_markers: Vec<String>,
    /// Lines containing any of these describe a capability.
    pub service_keywords: Vec<String>,
    /// Known capability phrasings, checked in order.
    pub canonical_phrases: Vec<CanonicalPhrase>,
}

impl Default for DedupRules {
    fn default() -> Self {
        let strings = |items: &[&str]| -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        };
        Self {
            min_length: 50,
            window_lines: 3,
            midpoint_radius: 50,
            help_phrases: strings(&[
                "我可以帮助您",
                "我可以帮助你",
                "有什么我可以帮助",
                "请问有什么我可以帮助",
                "什么我可以帮助您的吗",
                "什么我可以帮助你的吗",
                "How can I help you",
                "What can I help you with",
                "Is there anything else I can help",
                "Let me know if you need any help",
            ]),
            bullet_markers: strings(&["•", "·", "▪"]),
            service_keywords: strings(&[
                "管理和查询 AWS 资源",
                "AWS 服务管理和配置",
                "代码编写和调试",
                "编写和调试代码",
                "文件系统操作",
                "读写本地文件系统",
                "执行命令行操作",
                "命令行操作",
                "Manage and query AWS resources",
                "Write and debug code",
                "Read and write files",
                "Run command line operations",
            ]),
            canonical_phrases: vec![
                CanonicalPhrase::new("管理和查询 AWS 资源", "aws_management"),
                CanonicalPhrase::new("AWS 服务管理和配置", "aws_management"),
                CanonicalPhrase::new("代码编写和调试", "code_development"),
                CanonicalPhrase::new("编写和调试代码", "code_development"),
                CanonicalPhrase::new("文件系统操作", "file_operations"),
                CanonicalPhrase::new("读写本地文件系统", "file_operations"),
                CanonicalPhrase::new("读写文件和目录", "file_operations"),
                CanonicalPhrase::new("执行命令行操作", "command_operations"),
                CanonicalPhrase::new("命令行操作", "command_operations"),
                CanonicalPhrase::new("基础设施配置", "infrastructure"),
                CanonicalPhrase::new("基础设施优化", "infrastructure"),
                CanonicalPhrase::new("提供 AWS 最佳实践建议", "aws_best_practices"),
                CanonicalPhrase::new("AWS 最佳实践建议", "aws_best_practices"),
                CanonicalPhrase::new("解决技术问题", "technical_support"),
                CanonicalPhrase::new("技术问题", "technical_support"),
                CanonicalPhrase::new("Manage and query AWS resources", "aws_management"),
                CanonicalPhrase::new("AWS service management", "aws_management"),
                CanonicalPhrase::new("Write and debug code", "code_development"),
                CanonicalPhrase::new("Read and write files", "file_operations"),
                CanonicalPhrase::new("file system operations", "file_operations"),
                CanonicalPhrase::new("Run command line operations", "command_operations"),
                CanonicalPhrase::new("AWS best practices", "aws_best_practices"),
            ],
        }
    }
}

// ============================================================================
// Line model
// ============================================================================

#[derive(Debug)]
struct Line<'a> {
    text: &'a str,
    /// Inside (or delimiting) a fenced code block.
    code: bool,
    removed: bool,
}

impl Line<'_> {
    fn is_prose(&self) -> bool {
        !self.code && !self.removed && !self.text.is_empty()
    }
}

fn split_lines(text: &str) -> Vec<Line<'_>> {
    let mut in_fence = false;
    text.lines()
        .map(|raw| {
            let line = raw.trim_end();
            let fence = line.trim_start().starts_with("```");
            let code = in_fence || fence;
            if fence {
                in_fence = !in_fence;
            }
            Line {
                text: line,
                code,
                removed: false,
            }
        })
        .collect()
}

/// Index ranges of prose paragraphs: maximal runs of live, non-blank prose lines.
fn paragraphs(lines: &[Line<'_>]) -> Vec<std::ops::Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = None;
    for (i, line) in lines.iter().enumerate() {
        match (line.is_prose(), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                ranges.push(s..i);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        ranges.push(s..lines.len());
    }
    ranges
}

// ============================================================================
// Remover
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct DuplicateRemover {
    rules: DedupRules,
}

impl DuplicateRemover {
    pub fn new(rules: DedupRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &DedupRules {
        &self.rules
    }

    pub fn remove(&self, text: &str) -> String {
        if text.len() < self.rules.min_length {
            return text.to_string();
        }

        let mut lines = split_lines(text);
        self.remove_exact_blocks(&mut lines);
        let mirrored = self.remove_mirrored_half(&lines);
        let mut lines = match &mirrored {
            Some(half) => split_lines(half),
            None => lines,
        };
        self.collapse_patterns(&mut lines);
        render(&lines)
    }

    /// Pass 1: drop repeated paragraphs, or repeated line windows when the
    /// prose is a single paragraph.
    fn remove_exact_blocks(&self, lines: &mut [Line<'_>]) {
        let paras = paragraphs(lines);
        match paras.len() {
            0 => {}
            1 => self.remove_repeated_windows(lines, paras[0].clone()),
            _ => {
                let mut seen: HashSet<Vec<&str>> = HashSet::new();
                for range in paras {
                    let key: Vec<&str> = lines[range.clone()].iter().map(|l| l.text).collect();
                    if !seen.insert(key) {
                        for line in &mut lines[range] {
                            line.removed = true;
                        }
                    }
                }
            }
        }
    }

    fn remove_repeated_windows(&self, lines: &mut [Line<'_>], range: std::ops::Range<usize>) {
        let window = self.rules.window_lines.max(1);
        let mut seen: HashSet<Vec<&str>> = HashSet::new();
        let mut i = range.start;
        while i + window <= range.end {
            let key: Vec<&str> = lines[i..i + window].iter().map(|l| l.text).collect();
            if seen.contains(&key) {
                for line in &mut lines[i..i + window] {
                    line.removed = true;
                }
                i += window;
                continue;
            }
            seen.insert(key);
            i += 1;
        }
    }

    /// Pass 2: a single prose block that is the same text twice, split at a
    /// newline near its midpoint.
    fn remove_mirrored_half(&self, lines: &[Line<'_>]) -> Option<String> {
        if lines.iter().any(|l| l.code) || paragraphs(lines).len() != 1 {
            return None;
        }
        let text = lines
            .iter()
            .filter(|l| !l.removed && !l.text.is_empty())
            .map(|l| l.text)
            .collect::<Vec<_>>()
            .join("\n");
        let bytes = text.as_bytes();
        let mid = bytes.len() / 2;
        let lo = mid.saturating_sub(self.rules.midpoint_radius).max(1);
        let hi = (mid + self.rules.midpoint_radius).min(bytes.len().saturating_sub(1));
        (lo..=hi)
            .filter(|&split| bytes.get(split) == Some(&b'\n'))
            .find_map(|split| {
                let first = text[..split].trim();
                let second = text[split + 1..].trim();
                (!first.is_empty() && first == second).then(|| text[..split].to_string())
            })
    }

    /// Pass 3: collapse help offers, capability bullets by canonical key, and
    /// exact repeats of any other prose line.
    fn collapse_patterns(&self, lines: &mut [Line<'_>]) {
        let mut seen_help = false;
        let mut seen_keys: HashSet<String> = HashSet::new();
        let mut seen_lines: HashSet<&str> = HashSet::new();

        for line in lines.iter_mut() {
            if !line.is_prose() {
                continue;
            }
            let trimmed = line.text.trim();

            let keep = if self.is_help_line(trimmed) {
                !std::mem::replace(&mut seen_help, true)
            } else if let Some(key) = self.service_key(trimmed) {
                seen_keys.insert(key)
            } else {
                true
            };

            if keep && seen_lines.insert(trimmed) {
                continue;
            }
            line.removed = true;
        }
    }

    fn is_help_line(&self, line: &str) -> bool {
        self.rules
            .help_phrases
            .iter()
            .any(|p| !p.is_empty() && line.contains(p.as_str()))
    }

    /// Canonical key for bullet or capability lines, `None` for anything else.
    fn service_key(&self, line: &str) -> Option<String> {
        let unbulleted = self
            .rules
            .bullet_markers
            .iter()
            .filter(|m| !m.is_empty())
            .find_map(|m| line.strip_prefix(m.as_str()));
        let is_service = unbulleted.is_some()
            || self
                .rules
                .service_keywords
                .iter()
                .any(|k| !k.is_empty() && line.contains(k.as_str()));
        if !is_service {
            return None;
        }

        let body = unbulleted.unwrap_or(line).trim();
        let category = self
            .rules
            .canonical_phrases
            .iter()
            .find(|c| !c.phrase.is_empty() && body.contains(c.phrase.as_str()))
            .map(|c| c.category.clone());
        Some(category.unwrap_or_else(|| body.to_lowercase()))
    }
}

/// Join live lines, collapsing blank prose runs and trimming blank edges.
fn render(lines: &[Line<'_>]) -> String {
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut pending_blank = false;
    for line in lines.iter().filter(|l| !l.removed) {
        if line.text.is_empty() && !line.code {
            pending_blank = true;
            continue;
        }
        if pending_blank && !out.is_empty() {
            out.push("");
        }
        pending_blank = false;
        out.push(line.text);
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    let start = out.iter().position(|l| !l.is_empty()).unwrap_or(out.len());
    out[start..].join("\n")
}
