//! Presentational renderings of the structured diff. Nothing here feeds
//! back into scoring or storage.

use serde::{Deserialize, Serialize};
use similar::{DiffOp, TextDiff};

use super::engine::{self, ChangeKind, Segment, SegmentKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    Unchanged,
    Added,
    Removed,
    Modified,
}

/// One row of the side-by-side line table. Line cells contain HTML with
/// word-level highlight spans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideBySideRow {
    pub old_line: String,
    pub new_line: String,
    pub kind: RowKind,
    pub old_line_num: Option<usize>,
    pub new_line_num: Option<usize>,
}

/// Render the change list as a standalone HTML fragment with per-change
/// sections and word-level highlights.
pub fn render_html_diff(old_text: &str, new_text: &str) -> String {
    let changes = engine::compare_text(old_text, new_text);
    if changes.is_empty() {
        return r#"<div class="no-changes">No changes detected</div>"#.to_string();
    }

    let mut html = String::from("<div class=\"diff-container\">\n");
    for change in &changes {
        match change.kind {
            ChangeKind::Added => {
                html.push_str("<div class=\"change-item added\">\n");
                html.push_str("<div class=\"change-header\">Added content</div>\n");
                html.push_str(&format!(
                    "<div class=\"new-content\">{}</div>\n",
                    segments_to_html(&change.new_segments)
                ));
            }
            ChangeKind::Removed => {
                html.push_str("<div class=\"change-item removed\">\n");
                html.push_str("<div class=\"change-header\">Removed content</div>\n");
                html.push_str(&format!(
                    "<div class=\"old-content\">{}</div>\n",
                    segments_to_html(&change.old_segments)
                ));
            }
            ChangeKind::Modified => {
                html.push_str("<div class=\"change-item modified\">\n");
                html.push_str("<div class=\"change-header\">Modified content</div>\n");
                html.push_str("<div class=\"comparison\">\n");
                html.push_str(&format!(
                    "<div class=\"old-content\">{}</div>\n",
                    segments_to_html(&change.old_segments)
                ));
                html.push_str(&format!(
                    "<div class=\"new-content\">{}</div>\n",
                    segments_to_html(&change.new_segments)
                ));
                html.push_str("</div>\n");
            }
        }
        if !change.context_before.is_empty() {
            html.push_str(&format!(
                "<div class=\"context-before\">...{}</div>\n",
                escape_html(change.context_before.trim_end())
            ));
        }
        html.push_str("</div>\n");
    }
    html.push_str("</div>\n");
    html.push_str(DIFF_CSS);
    html
}

/// Line-by-line comparison table, pairing replaced lines positionally and
/// highlighting word changes within each pair.
pub fn side_by_side_diff(old_text: &str, new_text: &str) -> Vec<SideBySideRow> {
    let old_lines = engine::split_keepends(old_text);
    let new_lines = engine::split_keepends(new_text);
    let diff = TextDiff::from_slices(&old_lines, &new_lines);

    let mut rows = Vec::new();
    for op in diff.ops() {
        match *op {
            DiffOp::Equal {
                old_index,
                new_index,
                len,
            } => {
                for k in 0..len {
                    rows.push(SideBySideRow {
                        old_line: escape_html(old_lines[old_index + k]),
                        new_line: escape_html(new_lines[new_index + k]),
                        kind: RowKind::Unchanged,
                        old_line_num: Some(old_index + k + 1),
                        new_line_num: Some(new_index + k + 1),
                    });
                }
            }
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => {
                let max_len = old_len.max(new_len);
                for k in 0..max_len {
                    let old_line = old_lines.get(old_index + k).filter(|_| k < old_len);
                    let new_line = new_lines.get(new_index + k).filter(|_| k < new_len);
                    match (old_line, new_line) {
                        (Some(old_line), Some(new_line)) => {
                            let (old_segments, new_segments) =
                                pair_line_segments(old_line, new_line);
                            rows.push(SideBySideRow {
                                old_line: segments_to_html(&old_segments),
                                new_line: segments_to_html(&new_segments),
                                kind: RowKind::Modified,
                                old_line_num: Some(old_index + k + 1),
                                new_line_num: Some(new_index + k + 1),
                            });
                        }
                        (Some(old_line), None) => rows.push(SideBySideRow {
                            old_line: highlighted_line(old_line, SegmentKind::Removed),
                            new_line: String::new(),
                            kind: RowKind::Removed,
                            old_line_num: Some(old_index + k + 1),
                            new_line_num: None,
                        }),
                        (None, Some(new_line)) => rows.push(SideBySideRow {
                            old_line: String::new(),
                            new_line: highlighted_line(new_line, SegmentKind::Added),
                            kind: RowKind::Added,
                            old_line_num: None,
                            new_line_num: Some(new_index + k + 1),
                        }),
                        (None, None) => {}
                    }
                }
            }
            DiffOp::Delete {
                old_index, old_len, ..
            } => {
                for k in 0..old_len {
                    rows.push(SideBySideRow {
                        old_line: highlighted_line(old_lines[old_index + k], SegmentKind::Removed),
                        new_line: String::new(),
                        kind: RowKind::Removed,
                        old_line_num: Some(old_index + k + 1),
                        new_line_num: None,
                    });
                }
            }
            DiffOp::Insert {
                new_index, new_len, ..
            } => {
                for k in 0..new_len {
                    rows.push(SideBySideRow {
                        old_line: String::new(),
                        new_line: highlighted_line(new_lines[new_index + k], SegmentKind::Added),
                        kind: RowKind::Added,
                        old_line_num: None,
                        new_line_num: Some(new_index + k + 1),
                    });
                }
            }
        }
    }
    rows
}

/// Word-level segments for a single replaced line pair, reusing the
/// engine's chunk comparison.
fn pair_line_segments(old_line: &str, new_line: &str) -> (Vec<Segment>, Vec<Segment>) {
    let changes = engine::compare_text(old_line, new_line);
    match changes.into_iter().next() {
        Some(change) if change.kind == ChangeKind::Modified => {
            (change.old_segments, change.new_segments)
        }
        _ => (
            vec![Segment {
                kind: SegmentKind::Unchanged,
                text: old_line.to_string(),
            }],
            vec![Segment {
                kind: SegmentKind::Unchanged,
                text: new_line.to_string(),
            }],
        ),
    }
}

fn highlighted_line(line: &str, kind: SegmentKind) -> String {
    segments_to_html(&[Segment {
        kind,
        text: line.to_string(),
    }])
}

fn segments_to_html(segments: &[Segment]) -> String {
    let mut html = String::new();
    for segment in segments {
        match segment.kind {
            SegmentKind::Unchanged => html.push_str(&escape_html(&segment.text)),
            SegmentKind::Added => html.push_str(&format!(
                r#"<span class="added-word">{}</span>"#,
                escape_html(&segment.text)
            )),
            SegmentKind::Removed => html.push_str(&format!(
                r#"<span class="removed-word">{}</span>"#,
                escape_html(&segment.text)
            )),
        }
    }
    html
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

const DIFF_CSS: &str = r#"<style>
.diff-container { font-family: monospace; font-size: 13px; line-height: 1.5; }
.change-item { margin: 15px 0; border-radius: 4px; overflow: hidden; }
.change-header { padding: 8px 12px; font-weight: bold; }
.change-item.added .change-header { background-color: #d4edda; color: #155724; }
.change-item.removed .change-header { background-color: #f8d7da; color: #721c24; }
.change-item.modified .change-header { background-color: #fff3cd; color: #856404; }
.old-content, .new-content { padding: 10px 12px; background-color: #f8f9fa; white-space: pre-wrap; }
.comparison { display: grid; grid-template-columns: 1fr 1fr; gap: 10px; }
.added-word { background-color: #c3e6cb; color: #155724; }
.removed-word { background-color: #f5c6cb; color: #721c24; text-decoration: line-through; }
.context-before { font-size: 12px; color: #6c757d; padding: 4px 12px; font-style: italic; }
.no-changes { padding: 20px; text-align: center; color: #6c757d; font-style: italic; }
</style>"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_changes_renders_placeholder() {
        let html = render_html_diff("same", "same");
        assert!(html.contains("No changes detected"));
    }

    #[test]
    fn html_diff_highlights_added_and_removed_words() {
        let html = render_html_diff("the quick fox\n", "the slow fox\n");
        assert!(html.contains(r#"<span class="removed-word">quick</span>"#));
        assert!(html.contains(r#"<span class="added-word">slow</span>"#));
    }

    #[test]
    fn html_content_is_escaped() {
        let html = render_html_diff("", "<script>alert(1)</script>");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn side_by_side_marks_row_kinds() {
        let rows = side_by_side_diff("a\nb\nc\n", "a\nB\nc\nd\n");
        assert_eq!(rows[0].kind, RowKind::Unchanged);
        assert_eq!(rows[0].old_line_num, Some(1));
        assert!(rows.iter().any(|r| r.kind == RowKind::Modified));
        let added: Vec<_> = rows.iter().filter(|r| r.kind == RowKind::Added).collect();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].new_line_num, Some(4));
        assert_eq!(added[0].old_line_num, None);
    }
}
