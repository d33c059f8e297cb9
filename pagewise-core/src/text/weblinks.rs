use once_cell::sync::Lazy;
use regex::Regex;

use super::TextRange;

static WEB_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:https?://|www\.)[^\s<>\x22']+|[A-Z0-9._%+-]+@[A-Z0-9-]+(?:\.[A-Z0-9-]+)+",
    )
    .expect("web link pattern is valid")
});

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}'];

#[derive(Debug, Clone, PartialEq)]
pub struct WebLink {
    pub url: String,
    pub range: TextRange,
}

/// Finds URLs and e-mail addresses in page text. Ranges are in characters.
pub fn extract_web_links(text: &str) -> Vec<WebLink> {
    WEB_LINK
        .find_iter(text)
        .filter_map(|found| {
            let raw = found.as_str().trim_end_matches(TRAILING_PUNCTUATION);
            if raw.is_empty() {
                return None;
            }
            let start = text[..found.start()].chars().count();
            let range = TextRange::new(start, raw.chars().count());
            Some(WebLink {
                url: normalize(raw),
                range,
            })
        })
        .collect()
}

fn normalize(raw: &str) -> String {
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        raw.to_string()
    } else if lower.starts_with("www.") {
        format!("http://{raw}")
    } else {
        format!("mailto:{raw}")
    }
}
