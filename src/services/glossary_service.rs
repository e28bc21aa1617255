use crate::error::{Error, Result};
use crate::models::glossary::{GlossaryEntry, GlossaryTerm};
use crate::utils::html::strip_tags;
use crate::utils::parse_outcome::ParseOutcome;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static RE_DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<dt[^>]*>(.*?)</dt>\s*<dd[^>]*>(.*?)</dd>").expect("static regex")
});

/// Lines that delimit the glossary body inside a page's full text.
#[derive(Debug, Clone)]
pub struct BodyMarkers {
    pub start: Vec<String>,
    pub end: Vec<String>,
}

impl Default for BodyMarkers {
    fn default() -> Self {
        Self {
            start: vec!["Data Cloud 用語集".into(), "Data Cloud Glossary of Terms".into()],
            end: vec![
                "この記事で問題は解決されましたか?".into(),
                "DID THIS ARTICLE SOLVE YOUR ISSUE?".into(),
            ],
        }
    }
}

/// Loads every readable glossary list in order.
///
/// Missing files and files that are not a list are logged and skipped, as are
/// list items that are not glossary entries.
pub fn load_glossary_files(paths: &[PathBuf]) -> Vec<Vec<GlossaryEntry>> {
    let mut lists = Vec::new();
    for path in paths {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Glossary file not found, skipping");
            continue;
        }
        match read_glossary(path) {
            Ok(entries) => {
                tracing::info!(path = %path.display(), entries = entries.len(), "Loaded glossary");
                lists.push(entries);
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Unreadable glossary file, skipping"
                )
            }
        }
    }
    lists
}

fn read_glossary(path: &Path) -> Result<Vec<GlossaryEntry>> {
    let text = std::fs::read_to_string(path)?;
    let value: serde_yaml::Value = serde_yaml::from_str(&text)?;
    let serde_yaml::Value::Sequence(items) = value else {
        return Err(Error::BadRequest(format!(
            "{} does not contain a glossary list",
            path.display()
        )));
    };
    let total = items.len();
    let entries: Vec<GlossaryEntry> = items
        .into_iter()
        .filter_map(|item| serde_yaml::from_value(item).ok())
        .collect();
    if entries.len() < total {
        tracing::warn!(
            path = %path.display(),
            skipped = total - entries.len(),
            "Skipped items that are not glossary entries"
        );
    }
    Ok(entries)
}

/// Concatenates glossaries, keeping the first entry per case-insensitive English term.
///
/// Entries with a blank English term are dropped. Input order is preserved.
pub fn merge_glossaries(lists: Vec<Vec<GlossaryEntry>>) -> Vec<GlossaryEntry> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for entry in lists.into_iter().flatten() {
        let key = entry.dedup_key();
        if key.is_empty() || !seen.insert(key) {
            continue;
        }
        merged.push(entry);
    }
    merged
}

/// Sorted by English term; stable for equal terms.
pub fn sorted_by_term(mut entries: Vec<GlossaryEntry>) -> Vec<GlossaryEntry> {
    entries.sort_by(|a, b| a.en_term.cmp(&b.en_term));
    entries
}

/// Term/description pairs from the plain text of a glossary page.
///
/// A term is a short line without closing punctuation; the lines after it,
/// up to the next term, form its description. Single-letter index headings
/// are ignored.
pub fn parse_glossary_text(
    full_text: &str,
    markers: &BodyMarkers,
) -> ParseOutcome<Vec<GlossaryTerm>> {
    let lines: Vec<&str> = full_text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let Some(start) = lines
        .iter()
        .position(|line| markers.start.iter().any(|m| line.contains(m.as_str())))
    else {
        return ParseOutcome::NotFound;
    };
    let body = &lines[start + 1..];
    let end = body
        .iter()
        .position(|line| markers.end.iter().any(|m| line.contains(m.as_str())))
        .unwrap_or(body.len());
    let body = &body[..end];

    let mut terms = Vec::new();
    let mut i = 0;
    while i < body.len() {
        let term = body[i];
        i += 1;
        if is_index_heading(term) {
            continue;
        }
        let mut description = Vec::new();
        while i < body.len() {
            let next = body[i];
            if looks_like_term(next) && !is_index_heading(next) {
                break;
            }
            if !is_index_heading(next) {
                description.push(next);
            }
            i += 1;
        }
        if !description.is_empty() {
            terms.push(GlossaryTerm {
                term: term.to_string(),
                description: description.join(" "),
            });
        }
    }

    if terms.is_empty() {
        return ParseOutcome::Malformed("glossary body has no term with a description".to_string());
    }
    ParseOutcome::Parsed(terms)
}

fn is_index_heading(line: &str) -> bool {
    let mut chars = line.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if c.is_ascii_uppercase())
}

fn looks_like_term(line: &str) -> bool {
    line.split_whitespace().count() < 5 && !line.ends_with(['。', '.', ':', ')'])
}

/// `<dt>`/`<dd>` pairs from glossary HTML.
pub fn parse_definition_lists(html: &str) -> ParseOutcome<Vec<GlossaryTerm>> {
    let mut found_any = false;
    let terms: Vec<GlossaryTerm> = RE_DEFINITION
        .captures_iter(html)
        .filter_map(|cap| {
            found_any = true;
            let term = strip_tags(cap.get(1)?.as_str());
            let description = strip_tags(cap.get(2)?.as_str());
            (!term.is_empty() && !description.is_empty())
                .then_some(GlossaryTerm { term, description })
        })
        .collect();

    match (found_any, terms.is_empty()) {
        (false, _) => ParseOutcome::NotFound,
        (true, true) => {
            ParseOutcome::Malformed("definition lists have no filled entries".to_string())
        }
        (true, false) => ParseOutcome::Parsed(terms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(en: &str, ja: &str) -> GlossaryEntry {
        GlossaryEntry {
            en_term: en.into(),
            ja_term: ja.into(),
            en_description: format!("{} description", en),
            ja_description: String::new(),
        }
    }

    #[test]
    fn first_occurrence_wins_case_insensitively() {
        let merged = merge_glossaries(vec![
            vec![entry("Segment", "セグメント"), entry("", "空")],
            vec![entry("segment", "別訳"), entry("Data Stream", "データストリーム")],
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].ja_term, "セグメント");
        assert_eq!(merged[1].en_term, "Data Stream");
    }

    #[test]
    fn merge_is_stable_under_repetition() {
        let lists = vec![vec![entry("B", "b"), entry("A", "a")], vec![entry("a", "x")]];
        let once = sorted_by_term(merge_glossaries(lists.clone()));
        let twice = sorted_by_term(merge_glossaries(vec![once.clone(), lists.concat()]));
        assert_eq!(once, twice);
        assert_eq!(once.iter().map(|e| e.en_term.as_str()).collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn text_glossary_between_markers() {
        let text = "Header noise\nData Cloud Glossary of Terms\nA\nActivation\nThe process of publishing audience\nsegments to a target.\nB\nBatch Data Transform\nA transform that runs on a schedule.\nDID THIS ARTICLE SOLVE YOUR ISSUE?\nFooter";
        let terms = parse_glossary_text(text, &BodyMarkers::default()).parsed().unwrap();
        assert_eq!(terms.len(), 2);
        assert_eq!(terms[0].term, "Activation");
        assert_eq!(
            terms[0].description,
            "The process of publishing audience segments to a target."
        );
        assert_eq!(terms[1].term, "Batch Data Transform");
    }

    #[test]
    fn missing_start_marker_is_not_found() {
        assert_eq!(
            parse_glossary_text("nothing here", &BodyMarkers::default()),
            ParseOutcome::NotFound
        );
    }

    #[test]
    fn definition_lists_are_paired() {
        let html = "<h2>A</h2><dl><dt>Account</dt><dd>An <b>organization</b> you do business with.</dd>\n<dt>Empty</dt><dd></dd></dl>";
        let terms = parse_definition_lists(html).parsed().unwrap();
        assert_eq!(
            terms,
            vec![GlossaryTerm {
                term: "Account".into(),
                description: "An organization you do business with.".into()
            }]
        );
        assert_eq!(parse_definition_lists("<p>none</p>"), ParseOutcome::NotFound);
    }

    #[test]
    fn malformed_glossary_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("ja.yaml");
        std::fs::write(
            &good,
            "- en_term: Segment\n  ja_term: セグメント\n- just a string\n- en_term: Data Stream\n",
        )
        .unwrap();
        let not_a_list = dir.path().join("map.yaml");
        std::fs::write(&not_a_list, "en_term: Orphan\n").unwrap();
        let broken = dir.path().join("broken.yaml");
        std::fs::write(&broken, "- [unclosed\n").unwrap();
        let missing = dir.path().join("missing.yaml");

        let lists = load_glossary_files(&[not_a_list, good, broken, missing]);
        assert_eq!(lists.len(), 1);
        let terms: Vec<&str> = lists[0].iter().map(|e| e.en_term.as_str()).collect();
        assert_eq!(terms, vec!["Segment", "Data Stream"]);

        let merged = merge_glossaries(lists);
        assert_eq!(merged.len(), 2);
    }
}
