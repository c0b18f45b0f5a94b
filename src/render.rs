//! Content rendering helpers shared by the Atlassian connectors.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

/// Parse an Atlassian timestamp.
///
/// Jira emits `2024-01-01T10:00:00.000+0000` (no colon in the offset);
/// Confluence emits RFC 3339 (`2024-01-01T10:00:00.000Z`). Both are accepted.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("static regex"))
}

fn space_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// Reduce Confluence storage-format HTML to plain text.
pub fn strip_html(html: &str) -> String {
    let without_tags = tag_re().replace_all(html, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    space_re().replace_all(&decoded, " ").trim().to_string()
}

/// First `max_chars` characters of `s`.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Text body uploaded for a Jira issue.
pub fn render_issue(summary: &str, description: Option<&str>, status: &str) -> String {
    let description = description
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or("None");
    format!(
        "Title: {}\n\nDescription: {}\n\nStatus: {}",
        summary, description, status
    )
}

/// Text body uploaded for a Confluence page.
pub fn render_page(title: &str, body_html: &str, max_chars: usize) -> String {
    let text = strip_html(body_html);
    format!("Title: {}\n\nContent: {}", title, truncate_chars(&text, max_chars))
}
