// src/providers/mod.rs
pub mod rss;

pub use rss::RssProvider;

use once_cell::sync::OnceCell;
use regex::Regex;

/// Max characters kept from a post description.
pub const DESCRIPTION_MAX_CHARS: usize = 1500;

/// Normalize text: decode entities, strip tags, collapse whitespace, trim,
/// cap at `max_chars` characters.
pub fn normalize_text(s: &str, max_chars: usize) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap
    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_strips_tags_and_collapses_ws() {
        let s = "  <p>Hello,&nbsp;&nbsp;<b>world</b></p>\n\n “ok” ";
        assert_eq!(normalize_text(s, 100), r#"Hello, world "ok""#);
    }

    #[test]
    fn normalize_text_caps_length() {
        let s = "ábcdé".repeat(10);
        assert_eq!(normalize_text(&s, 7).chars().count(), 7);
    }
}
