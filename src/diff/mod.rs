mod engine;
mod render;

pub use engine::{
    calculate_change_metrics, char_similarity, compare_text, scan_keyword_changes, ChangeKind,
    ContentChange, KeywordChange, Segment, SegmentKind, SIGNIFICANT_KEYWORDS,
};
pub use render::{render_html_diff, side_by_side_diff, RowKind, SideBySideRow};
