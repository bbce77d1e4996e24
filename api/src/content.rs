//! Essay body helpers: sanitizing, plain-text extraction, read-time estimate.
//!
//! A body is either a JSON string or a block document such as
//! `{"blocks": [{"type": "paragraph", "data": {"text": "..."}}]}`. Every
//! string leaf is treated as prose except structural keys (`type`, `id`,
//! `url`, ...), which never count toward words. Link keys must hold an
//! http(s) URL or they are blanked.

use scraper::{ElementRef, Html};
use serde_json::Value;

const WORDS_PER_MINUTE: usize = 200;
const EXCERPT_WORDS: usize = 40;
const STRUCTURAL_KEYS: &[&str] = &["type", "id", "url", "src", "href", "style", "alignment"];
const LINK_KEYS: &[&str] = &["url", "src", "href"];

/// Elements that separate words when their markup is removed.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption",
    "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "ol", "p",
    "pre", "section", "table", "td", "th", "tr", "ul",
];

/// Runs `ammonia` over every prose string in the document.
pub fn sanitize(content: Value) -> Value {
    match content {
        Value::String(text) => Value::String(ammonia::clean(&text)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    if LINK_KEYS.contains(&key.as_str()) {
                        let value = clean_link(value);
                        (key, value)
                    } else if STRUCTURAL_KEYS.contains(&key.as_str()) {
                        (key, value)
                    } else {
                        (key, sanitize(value))
                    }
                })
                .collect(),
        ),
        other => other,
    }
}

/// True for absolute `http://` and `https://` URLs.
pub fn is_web_url(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    lower.starts_with("https://") || lower.starts_with("http://")
}

fn clean_link(value: Value) -> Value {
    match value {
        Value::String(url) if is_web_url(&url) => Value::String(url.trim().to_string()),
        Value::String(url) => {
            tracing::debug!(url = %url, "dropping non-http link from essay body");
            Value::String(String::new())
        }
        other => other,
    }
}

/// All prose in document order, markup removed, entities decoded, joined
/// by single spaces.
pub fn plain_text(content: &Value) -> String {
    let mut prose = String::new();
    collect_prose(content, &mut prose);
    prose.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn word_count(content: &Value) -> usize {
    plain_text(content).split_whitespace().count()
}

/// `ceil(words / 200)`, never below one minute.
pub fn read_time_minutes(content: &Value) -> u32 {
    let minutes = word_count(content).div_ceil(WORDS_PER_MINUTE).max(1);
    u32::try_from(minutes).unwrap_or(u32::MAX)
}

pub fn excerpt(content: &Value) -> String {
    let text = plain_text(content);
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() > EXCERPT_WORDS {
        format!("{}…", words[..EXCERPT_WORDS].join(" "))
    } else {
        text
    }
}

/// Trims tags and drops blank ones. Order and duplicates are kept.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter()
        .map(|tag| ammonia::clean(tag.trim()))
        .filter(|tag| !tag.is_empty())
        .collect()
}

fn collect_prose(value: &Value, out: &mut String) {
    match value {
        Value::String(text) => {
            let fragment = Html::parse_fragment(text);
            push_text(fragment.root_element(), out);
            out.push(' ');
        }
        Value::Array(items) => items.iter().for_each(|item| collect_prose(item, out)),
        Value::Object(map) => {
            for (key, value) in map {
                if !STRUCTURAL_KEYS.contains(&key.as_str()) {
                    collect_prose(value, out);
                }
            }
        }
        _ => {}
    }
}

fn push_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(inner) = ElementRef::wrap(child) {
            let block = BLOCK_TAGS.contains(&inner.value().name());
            if block {
                out.push(' ');
            }
            push_text(inner, out);
            if block {
                out.push(' ');
            }
        }
    }
}
