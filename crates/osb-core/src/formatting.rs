//! Result rendering: human-readable summary and exportable file content.
//!
//! Both renderers take the same `(records, limit)` input so the displayed
//! count and the exported-file count can never disagree. Output is
//! deterministic and preserves upstream record order.

use crate::search::ResultRecord;

pub const NO_RESULTS_TEXT: &str = "No results found.";

const FIELD_SENTINEL: &str = "N/A";
const EXPORT_SEPARATOR_LEN: usize = 40;

fn field(v: &Option<String>) -> &str {
    v.as_deref().unwrap_or(FIELD_SENTINEL)
}

/// Number of records actually rendered for a given limit.
pub fn effective_count(total: usize, limit: Option<usize>) -> usize {
    match limit {
        Some(l) => total.min(l),
        None => total,
    }
}

/// Numbered URL/Username/Password blocks, truncated to `limit` if given.
/// The caller appends a "showing N of M" note when it applies.
pub fn render_summary(records: &[ResultRecord], limit: Option<usize>) -> String {
    if records.is_empty() {
        return NO_RESULTS_TEXT.to_string();
    }

    let shown = effective_count(records.len(), limit);
    let mut lines = Vec::new();
    for (i, item) in records[..shown].iter().enumerate() {
        lines.push(format!("Result {}:", i + 1));
        lines.push(format!("  URL: {}", field(&item.url)));
        lines.push(format!("  Username: {}", field(&item.username)));
        lines.push(format!("  Password: {}", field(&item.password)));
        lines.push(String::new());
    }

    lines.join("\n")
}

/// Line-delimited full dump for the export artifact, truncated identically
/// to [`render_summary`].
pub fn render_export(records: &[ResultRecord], limit: Option<usize>) -> String {
    let shown = effective_count(records.len(), limit);
    let mut lines = Vec::new();
    for item in &records[..shown] {
        lines.push(format!("URL: {}", field(&item.url)));
        lines.push(format!("Username: {}", field(&item.username)));
        lines.push(format!("Password: {}", field(&item.password)));
        lines.push("-".repeat(EXPORT_SEPARATOR_LEN));
    }

    lines.join("\n")
}
