use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use similar::{DiffOp, TextDiff};

use crate::models::ChangeMetrics;

/// Lines of surrounding context attached to each change record.
const CONTEXT_LINES: usize = 2;

/// Domain vocabulary whose presence flips mark a change as likely
/// important regardless of its size.
pub const SIGNIFICANT_KEYWORDS: &[&str] = &[
    "security",
    "vulnerability",
    "update",
    "critical",
    "bug",
    "fix",
    "release",
    "version",
    "deprecated",
    "breaking",
    "important",
    "urgent",
    "warning",
    "alert",
    "patch",
    "exploit",
    "risk",
    "cve-",
    "mitigation",
    "workaround",
    "upgrade",
    "downgrade",
    "compatibility",
    "performance",
    "memory",
    "cpu",
    "storage",
    "latency",
    "throughput",
    "regression",
    "feature",
    "api",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Unchanged,
    Added,
    Removed,
}

/// A run of text sharing one highlight state, produced by the word-level
/// sub-diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub kind: SegmentKind,
    pub text: String,
}

/// One contiguous difference between two text versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChange {
    pub kind: ChangeKind,
    pub old_content: String,
    pub new_content: String,
    /// Half-open line index range into the old text.
    pub old_range: (usize, usize),
    /// Half-open line index range into the new text.
    pub new_range: (usize, usize),
    pub context_before: String,
    pub context_after: String,
    /// Word-level highlight runs over `old_content`.
    pub old_segments: Vec<Segment>,
    /// Word-level highlight runs over `new_content`.
    pub new_segments: Vec<Segment>,
    pub summary: String,
}

/// A significant-keyword presence flip between two texts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordChange {
    pub keyword: &'static str,
    /// true when the keyword is new in the new text, false when it vanished.
    pub appeared: bool,
    pub context: String,
}

/// Compare two texts and return the structured change list.
///
/// Identical inputs yield an empty list. An empty old text yields a single
/// `Added` change spanning the whole new text, and vice versa for `Removed`.
pub fn compare_text(old_text: &str, new_text: &str) -> Vec<ContentChange> {
    if old_text == new_text {
        return Vec::new();
    }

    if old_text.is_empty() {
        let line_count = split_keepends(new_text).len();
        return vec![ContentChange {
            kind: ChangeKind::Added,
            old_content: String::new(),
            new_content: new_text.to_string(),
            old_range: (0, 0),
            new_range: (0, line_count),
            context_before: String::new(),
            context_after: String::new(),
            old_segments: Vec::new(),
            new_segments: whole_segment(SegmentKind::Added, new_text),
            summary: format!("Added {} lines", line_count),
        }];
    }

    if new_text.is_empty() {
        let line_count = split_keepends(old_text).len();
        return vec![ContentChange {
            kind: ChangeKind::Removed,
            old_content: old_text.to_string(),
            new_content: String::new(),
            old_range: (0, line_count),
            new_range: (0, 0),
            context_before: String::new(),
            context_after: String::new(),
            old_segments: whole_segment(SegmentKind::Removed, old_text),
            new_segments: Vec::new(),
            summary: format!("Removed {} lines", line_count),
        }];
    }

    let old_lines = split_keepends(old_text);
    let new_lines = split_keepends(new_text);
    let diff = TextDiff::from_slices(&old_lines, &new_lines);

    let mut changes = Vec::new();
    for op in diff.ops() {
        match *op {
            DiffOp::Equal { .. } => {}
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => {
                let old_chunk = old_lines[old_index..old_index + old_len].concat();
                let new_chunk = new_lines[new_index..new_index + new_len].concat();
                let (old_segments, new_segments) = word_segments(&old_chunk, &new_chunk);
                let summary = change_summary(&old_chunk, &new_chunk);
                changes.push(ContentChange {
                    kind: ChangeKind::Modified,
                    old_content: old_chunk,
                    new_content: new_chunk,
                    old_range: (old_index, old_index + old_len),
                    new_range: (new_index, new_index + new_len),
                    context_before: context_before(&old_lines, old_index),
                    context_after: context_after(&old_lines, old_index + old_len),
                    old_segments,
                    new_segments,
                    summary,
                });
            }
            DiffOp::Delete {
                old_index,
                old_len,
                new_index,
            } => {
                let old_chunk = old_lines[old_index..old_index + old_len].concat();
                changes.push(ContentChange {
                    kind: ChangeKind::Removed,
                    old_segments: whole_segment(SegmentKind::Removed, &old_chunk),
                    old_content: old_chunk,
                    new_content: String::new(),
                    old_range: (old_index, old_index + old_len),
                    new_range: (new_index, new_index),
                    context_before: context_before(&old_lines, old_index),
                    context_after: context_after(&old_lines, old_index + old_len),
                    new_segments: Vec::new(),
                    summary: format!("Removed {} lines", old_len),
                });
            }
            DiffOp::Insert {
                old_index,
                new_index,
                new_len,
            } => {
                let new_chunk = new_lines[new_index..new_index + new_len].concat();
                changes.push(ContentChange {
                    kind: ChangeKind::Added,
                    new_segments: whole_segment(SegmentKind::Added, &new_chunk),
                    old_content: String::new(),
                    new_content: new_chunk,
                    old_range: (old_index, old_index),
                    new_range: (new_index, new_index + new_len),
                    context_before: context_before(&old_lines, old_index),
                    context_after: context_after(&old_lines, old_index),
                    old_segments: Vec::new(),
                    summary: format!("Added {} lines", new_len),
                });
            }
        }
    }

    changes
}

/// Aggregate change statistics between two texts.
///
/// `lines_added`/`lines_removed` report only the growing direction; the
/// shrinking side is floored at zero. `keyword_changes` is filled by the
/// significance scorer, not here.
pub fn calculate_change_metrics(old_text: &str, new_text: &str) -> ChangeMetrics {
    let ratio = char_similarity(old_text, new_text);

    let words_old: HashSet<&str> = old_text.split_whitespace().collect();
    let words_new: HashSet<&str> = new_text.split_whitespace().collect();

    let old_line_count = old_text.lines().count();
    let new_line_count = new_text.lines().count();

    ChangeMetrics {
        words_added: words_new.difference(&words_old).count(),
        words_removed: words_old.difference(&words_new).count(),
        total_words_old: old_text.split_whitespace().count(),
        total_words_new: new_text.split_whitespace().count(),
        similarity_score: ratio * 100.0,
        change_percentage: (1.0 - ratio) * 100.0,
        lines_added: new_line_count.saturating_sub(old_line_count),
        lines_removed: old_line_count.saturating_sub(new_line_count),
        keyword_changes: 0,
    }
}

/// Character-level similarity ratio in [0, 1].
pub fn char_similarity(old_text: &str, new_text: &str) -> f64 {
    if old_text == new_text {
        return 1.0;
    }
    TextDiff::from_chars(old_text, new_text).ratio() as f64
}

/// Scan for presence flips of the significant-keyword vocabulary,
/// case-insensitively, with a short excerpt around each flipped term.
pub fn scan_keyword_changes(old_text: &str, new_text: &str) -> Vec<KeywordChange> {
    let old_lower = old_text.to_lowercase();
    let new_lower = new_text.to_lowercase();

    let mut changes = Vec::new();
    for &keyword in SIGNIFICANT_KEYWORDS {
        let old_has = old_lower.contains(keyword);
        let new_has = new_lower.contains(keyword);
        if old_has == new_has {
            continue;
        }
        let source = if new_has { &new_lower } else { &old_lower };
        let context = source
            .find(keyword)
            .map(|pos| excerpt(source, pos, keyword.len()))
            .unwrap_or_default();
        changes.push(KeywordChange {
            keyword,
            appeared: new_has,
            context,
        });
    }
    changes
}

/// Split into lines keeping the trailing newline on each, so concatenating
/// the pieces reproduces the input exactly.
pub(crate) fn split_keepends(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Split into alternating runs of whitespace and non-whitespace, so
/// concatenating the tokens reproduces the input exactly.
fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut prev_is_ws: Option<bool> = None;

    for (i, ch) in text.char_indices() {
        let is_ws = ch.is_whitespace();
        match prev_is_ws {
            Some(prev) if prev != is_ws => {
                tokens.push(&text[start..i]);
                start = i;
                prev_is_ws = Some(is_ws);
            }
            Some(_) => {}
            None => prev_is_ws = Some(is_ws),
        }
    }
    if start < text.len() {
        tokens.push(&text[start..]);
    }
    tokens
}

/// Word-level sub-diff for replaced chunks. Whitespace tokens inside a
/// changed run stay unhighlighted, matching how a reviewer reads the diff.
fn word_segments(old_chunk: &str, new_chunk: &str) -> (Vec<Segment>, Vec<Segment>) {
    let old_tokens = tokenize(old_chunk);
    let new_tokens = tokenize(new_chunk);
    let diff = TextDiff::from_slices(&old_tokens, &new_tokens);

    let mut old_segments: Vec<Segment> = Vec::new();
    let mut new_segments: Vec<Segment> = Vec::new();

    let mut push = |segments: &mut Vec<Segment>, kind: SegmentKind, text: &str| {
        if text.is_empty() {
            return;
        }
        if let Some(last) = segments.last_mut() {
            if last.kind == kind {
                last.text.push_str(text);
                return;
            }
        }
        segments.push(Segment {
            kind,
            text: text.to_string(),
        });
    };

    for op in diff.ops() {
        match *op {
            DiffOp::Equal {
                old_index,
                new_index,
                len,
            } => {
                for token in &old_tokens[old_index..old_index + len] {
                    push(&mut old_segments, SegmentKind::Unchanged, token);
                }
                for token in &new_tokens[new_index..new_index + len] {
                    push(&mut new_segments, SegmentKind::Unchanged, token);
                }
            }
            DiffOp::Delete {
                old_index, old_len, ..
            } => {
                for token in &old_tokens[old_index..old_index + old_len] {
                    let kind = if token.trim().is_empty() {
                        SegmentKind::Unchanged
                    } else {
                        SegmentKind::Removed
                    };
                    push(&mut old_segments, kind, token);
                }
            }
            DiffOp::Insert {
                new_index, new_len, ..
            } => {
                for token in &new_tokens[new_index..new_index + new_len] {
                    let kind = if token.trim().is_empty() {
                        SegmentKind::Unchanged
                    } else {
                        SegmentKind::Added
                    };
                    push(&mut new_segments, kind, token);
                }
            }
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => {
                for token in &old_tokens[old_index..old_index + old_len] {
                    let kind = if token.trim().is_empty() {
                        SegmentKind::Unchanged
                    } else {
                        SegmentKind::Removed
                    };
                    push(&mut old_segments, kind, token);
                }
                for token in &new_tokens[new_index..new_index + new_len] {
                    let kind = if token.trim().is_empty() {
                        SegmentKind::Unchanged
                    } else {
                        SegmentKind::Added
                    };
                    push(&mut new_segments, kind, token);
                }
            }
        }
    }

    (old_segments, new_segments)
}

fn whole_segment(kind: SegmentKind, text: &str) -> Vec<Segment> {
    vec![Segment {
        kind,
        text: text.to_string(),
    }]
}

fn context_before(lines: &[&str], index: usize) -> String {
    lines[index.saturating_sub(CONTEXT_LINES)..index].concat()
}

fn context_after(lines: &[&str], index: usize) -> String {
    lines[index..(index + CONTEXT_LINES).min(lines.len())].concat()
}

fn change_summary(old_chunk: &str, new_chunk: &str) -> String {
    let old_words: HashSet<&str> = old_chunk.split_whitespace().collect();
    let new_words: HashSet<&str> = new_chunk.split_whitespace().collect();
    format!(
        "Changed {} words added, {} words removed",
        new_words.difference(&old_words).count(),
        old_words.difference(&new_words).count()
    )
}

fn excerpt(text: &str, pos: usize, len: usize) -> String {
    let mut start = pos.saturating_sub(30);
    while start > 0 && !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (pos + len + 30).min(text.len());
    while end < text.len() && !text.is_char_boundary(end) {
        end += 1;
    }
    text[start..end].trim().to_string()
}
