//! HTML to text helpers shared by the scrapers.

use regex::Regex;
use std::sync::LazyLock;

static RE_SCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("static regex"));
static RE_STYLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").expect("static regex"));
static RE_NOSCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<noscript[^>]*>.*?</noscript>").expect("static regex"));
static RE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("static regex"));
static RE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("static regex"));
static RE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").expect("static regex"));
static RE_SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{3000}]+").expect("static regex"));
static RE_MULTI_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n(\s*\n)+").expect("static regex"));

/// Removes script, style and comment blocks.
pub fn clean_html(html: &str) -> String {
    let result = RE_SCRIPT.replace_all(html, "");
    let result = RE_STYLE.replace_all(&result, "");
    let result = RE_NOSCRIPT.replace_all(&result, "");
    let result = RE_COMMENT.replace_all(&result, "");
    result.to_string()
}

/// Readable text of a page or fragment, `width` columns wide.
pub fn html_to_text(html: &str, width: usize) -> String {
    let cleaned = clean_html(html);
    let text = match html2text::from_read(cleaned.as_bytes(), width) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "HTML conversion failed, falling back to tag stripping");
            strip_tags(&cleaned)
        }
    };
    RE_MULTI_NEWLINES
        .replace_all(text.trim(), "\n\n")
        .to_string()
}

/// Text content of a small fragment on one line, tags dropped and entities decoded.
pub fn strip_tags(fragment: &str) -> String {
    let with_breaks = RE_BREAK.replace_all(fragment, " ");
    let text = RE_TAG.replace_all(&with_breaks, " ");
    let text = decode_entities(&text);
    RE_SPACES
        .replace_all(&text.replace('\n', " "), " ")
        .trim()
        .to_string()
}

/// Like [`strip_tags`] but keeps line breaks from `<br>` and block boundaries.
pub fn fragment_lines(fragment: &str) -> String {
    let with_breaks = RE_BREAK.replace_all(fragment, "\n");
    let text = RE_TAG.replace_all(&with_breaks, "");
    let text = decode_entities(&text);
    text.lines()
        .map(|line| RE_SPACES.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Inner HTML of the first `tag` element whose opening tag contains `needle`.
///
/// Whitespace in the opening tag is ignored when matching, and nested
/// elements of the same tag are balanced.
pub fn element_inner<'a>(html: &'a str, tag: &str, needle: &str) -> Option<&'a str> {
    let needle: String = needle.chars().filter(|c| !c.is_whitespace()).collect();
    let tags = tag_regex(tag)?;
    let mut opens = tags.captures_iter(html);
    let start = loop {
        let cap = opens.next()?;
        let whole = cap.get(0)?;
        let is_close = cap.get(1).map(|m| !m.as_str().is_empty()).unwrap_or(false);
        let compact: String = whole.as_str().chars().filter(|c| !c.is_whitespace()).collect();
        if !is_close && compact.contains(&needle) {
            break whole.end();
        }
    };
    balanced_inner(html, start, &tags)
}

/// Inner HTML of every top-level `tag` element in `html`, in document order.
pub fn elements_inner<'a>(html: &'a str, tag: &str) -> Vec<&'a str> {
    let Some(tags) = tag_regex(tag) else {
        return Vec::new();
    };
    let mut found = Vec::new();
    let mut pos = 0;
    while let Some(cap) = tags.captures_at(html, pos) {
        let Some(whole) = cap.get(0) else { break };
        let is_close = cap.get(1).map(|m| !m.as_str().is_empty()).unwrap_or(false);
        if is_close {
            pos = whole.end();
            continue;
        }
        match balanced_inner(html, whole.end(), &tags) {
            Some(inner) => {
                pos = whole.end() + inner.len();
                found.push(inner);
            }
            None => break,
        }
    }
    found
}

/// Value of `name` on the first opening `tag`, entities decoded.
pub fn attribute_value(html: &str, tag: &str, name: &str) -> Option<String> {
    let pattern = format!(
        r#"(?is)<{}\b[^>]*?\b{}\s*=\s*(?:"([^"]*)"|'([^']*)')"#,
        regex::escape(tag),
        regex::escape(name)
    );
    let re = Regex::new(&pattern).ok()?;
    let cap = re.captures(html)?;
    let raw = cap.get(1).or_else(|| cap.get(2))?.as_str();
    Some(decode_entities(raw))
}

fn tag_regex(tag: &str) -> Option<Regex> {
    Regex::new(&format!(r"(?i)<(/?){}\b[^>]*>", regex::escape(tag))).ok()
}

fn balanced_inner<'a>(html: &'a str, start: usize, tags: &Regex) -> Option<&'a str> {
    let mut depth = 1usize;
    for cap in tags.captures_iter(&html[start..]) {
        let whole = cap.get(0)?;
        let is_close = cap.get(1).map(|m| !m.as_str().is_empty()).unwrap_or(false);
        if is_close {
            depth -= 1;
            if depth == 0 {
                return Some(&html[start..start + whole.start()]);
            }
        } else if !whole.as_str().ends_with("/>") {
            depth += 1;
        }
    }
    None
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}
