use crate::error::{Error, Result};
use crate::models::document::SourceDocument;
use crate::models::glossary::{pair_terms, GlossaryEntry, GlossaryTerm};
use crate::models::question::ExamQuestion;
use crate::services::glossary_service::{parse_definition_lists, parse_glossary_text, BodyMarkers};
use crate::utils::html::{
    attribute_value, element_inner, elements_inner, fragment_lines, html_to_text, strip_tags,
};
use crate::utils::parse_outcome::ParseOutcome;
use crate::utils::retry::{retry, RetryPolicy};
use futures::stream::{self, StreamExt};
use regex::Regex;
use reqwest::Client;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const TEXT_WIDTH: usize = 120;
const SIDEBAR_HOST: &str = "doc-content-layout";
const SIDEBAR_ATTRIBUTE: &str = "sidebar-content";

static RE_QUESTION_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h4[^>]*>(.*?)</h4>").expect("static regex"));
static RE_QUESTION_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"問題\s*(\d+)").expect("static regex"));
static RE_STRONG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<strong[^>]*>(.*?)</strong>").expect("static regex"));
static RE_ANSWER_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"正解\s*[:：]\s*(.+)").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum GlossaryFormat {
    /// Terms and descriptions as consecutive lines of page text.
    Text,
    /// `<dt>`/`<dd>` definition lists.
    DefinitionList,
}

#[derive(Clone)]
pub struct ScrapeService {
    client: Client,
    timeout: Duration,
    max_concurrent: usize,
}

impl ScrapeService {
    pub fn new(client: Client, timeout: Duration, max_concurrent: usize) -> Self {
        Self {
            client,
            timeout,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// GET with an explicit timeout and one re-attempt.
    pub async fn fetch_page(&self, url: &str) -> Result<String> {
        retry(RetryPolicy::fixed(2, Duration::from_secs(1)), url, |_| async move {
            let resp = self
                .client
                .get(url)
                .header("User-Agent", USER_AGENT)
                .timeout(self.timeout)
                .send()
                .await?
                .error_for_status()?;
            Ok::<_, Error>(resp.text().await?)
        })
        .await
        .map_err(|e| e.last)
    }

    /// Fetches every url with bounded concurrency, keeping input order.
    pub async fn fetch_pages(&self, urls: &[String]) -> Vec<(String, Option<String>)> {
        stream::iter(urls.iter().cloned())
            .map(|url| async move {
                let body = match self.fetch_page(&url).await {
                    Ok(body) => Some(body),
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "Page fetch failed, skipping");
                        None
                    }
                };
                (url, body)
            })
            .buffered(self.max_concurrent)
            .collect()
            .await
    }

    /// Questions from every page, sorted by id; later duplicates are ignored.
    pub async fn scrape_exam(&self, urls: &[String]) -> Vec<ExamQuestion> {
        let mut by_id = BTreeMap::new();
        for (url, body) in self.fetch_pages(urls).await {
            let Some(html) = body else { continue };
            let Some(questions) = parse_exam_page(&html).log_skipped(&url) else {
                continue;
            };
            tracing::info!(url = %url, questions = questions.len(), "Parsed exam page");
            for question in questions {
                by_id.entry(question.question_id).or_insert(question);
            }
        }
        by_id.into_values().collect()
    }

    /// Every article linked from the sidebar tree of `start_url`.
    pub async fn scrape_docs(&self, start_url: &str) -> Result<Vec<SourceDocument>> {
        let base = Url::parse(start_url)
            .map_err(|e| Error::BadRequest(format!("invalid start url {}: {}", start_url, e)))?;
        let start_page = self.fetch_page(start_url).await?;
        let sidebar = match sidebar_json(&start_page) {
            ParseOutcome::Parsed(json) => json,
            ParseOutcome::NotFound => {
                return Err(Error::NotFound(format!("sidebar link data on {}", start_url)))
            }
            ParseOutcome::Malformed(reason) => {
                return Err(Error::BadRequest(format!("sidebar link data: {}", reason)))
            }
        };
        let links: Vec<String> = extract_sidebar_links(&sidebar, &base).into_iter().collect();
        tracing::info!(links = links.len(), "Collected article links");

        let mut articles = Vec::new();
        for (url, body) in self.fetch_pages(&links).await {
            let Some(html) = body else { continue };
            if let Some(article) = parse_article(&html, &url).log_skipped(&url) {
                articles.push(article);
            }
        }
        Ok(articles)
    }

    /// Bilingual glossary from the Japanese and English versions of one page.
    pub async fn scrape_glossary(
        &self,
        ja_url: &str,
        en_url: &str,
        format: GlossaryFormat,
    ) -> Result<Vec<GlossaryEntry>> {
        let ja = self.glossary_terms(ja_url, format).await?;
        let en = self.glossary_terms(en_url, format).await?;
        Ok(pair_terms(&ja, &en))
    }

    async fn glossary_terms(&self, url: &str, format: GlossaryFormat) -> Result<Vec<GlossaryTerm>> {
        let html = self.fetch_page(url).await?;
        let outcome = match format {
            GlossaryFormat::Text => {
                parse_glossary_text(&html_to_text(&html, TEXT_WIDTH), &BodyMarkers::default())
            }
            GlossaryFormat::DefinitionList => parse_definition_lists(&html),
        };
        outcome
            .log_skipped(url)
            .ok_or_else(|| Error::NotFound(format!("glossary terms on {}", url)))
    }
}

/// All questions on one exam listing page.
///
/// Each question starts at an `<h4>` heading carrying "問題 N"; the block up
/// to the next heading holds the question, options, answer and explanation.
pub fn parse_exam_page(html: &str) -> ParseOutcome<Vec<ExamQuestion>> {
    let headers: Vec<(i64, usize, usize)> = RE_QUESTION_HEADER
        .captures_iter(html)
        .filter_map(|cap| {
            let whole = cap.get(0)?;
            let text = strip_tags(cap.get(1)?.as_str());
            let id = RE_QUESTION_NUMBER.captures(&text)?.get(1)?.as_str().parse().ok()?;
            Some((id, whole.start(), whole.end()))
        })
        .collect();
    if headers.is_empty() {
        return ParseOutcome::NotFound;
    }

    let mut questions = Vec::new();
    for (i, (id, _, body_start)) in headers.iter().enumerate() {
        let body_end = headers.get(i + 1).map(|h| h.1).unwrap_or(html.len());
        match parse_question_block(*id, &html[*body_start..body_end]) {
            ParseOutcome::Parsed(q) => questions.push(q),
            ParseOutcome::NotFound => {
                tracing::debug!(question_id = id, "Question block without content")
            }
            ParseOutcome::Malformed(reason) => {
                tracing::warn!(question_id = id, reason = %reason, "Skipping malformed question")
            }
        }
    }

    if questions.is_empty() {
        return ParseOutcome::Malformed(format!(
            "{} question headings but no readable question",
            headers.len()
        ));
    }
    ParseOutcome::Parsed(questions)
}

fn parse_question_block(id: i64, block: &str) -> ParseOutcome<ExamQuestion> {
    let Some(question_html) = element_inner(block, "div", "qa-question") else {
        return ParseOutcome::NotFound;
    };
    let question_text = fragment_lines(question_html);
    if question_text.is_empty() {
        return ParseOutcome::Malformed("empty question text".to_string());
    }
    let choices = element_inner(block, "div", "qa-options")
        .map(parse_choices)
        .unwrap_or_default();
    if choices.is_empty() {
        return ParseOutcome::Malformed("no choices".to_string());
    }

    let answer_html = element_inner(block, "div", "qa-answerexp");
    let correct_answer = answer_html.map(parse_correct_answer).unwrap_or_default();
    let explanation = answer_html
        .and_then(|a| element_inner(a, "div", "qa_explanation"))
        .map(fragment_lines)
        .map(|e| e.trim_start_matches("説明").trim().to_string())
        .filter(|e| !e.is_empty());

    ParseOutcome::Parsed(ExamQuestion {
        question_id: id,
        question_text,
        choices,
        correct_answer,
        explanation,
        japanese_explanation: None,
        ai_analysis: None,
    })
}

/// `A` -> text, from `<li><label><strong>A.</strong> text</label></li>` or `A. text` labels.
fn parse_choices(options_html: &str) -> BTreeMap<String, String> {
    let mut choices = BTreeMap::new();
    let items = elements_inner(options_html, "li");
    let labels: Vec<&str> = if items.is_empty() {
        elements_inner(options_html, "label")
    } else {
        items
            .iter()
            .map(|li| element_inner(li, "label", "").unwrap_or(li))
            .collect()
    };

    for label in labels {
        if let Some(cap) = RE_STRONG.captures(label) {
            let key = strip_tags(&cap[1]).replace('.', "").trim().to_string();
            let text = strip_tags(&RE_STRONG.replace(label, ""));
            if !key.is_empty() && !text.is_empty() {
                choices.insert(key, text);
            }
            continue;
        }
        let text = strip_tags(label);
        if let Some((key, value)) = text.split_once(". ") {
            let (key, value) = (key.trim(), value.trim());
            if !key.is_empty() && !value.is_empty() {
                choices.insert(key.to_string(), value.to_string());
            }
        }
    }
    choices
}

fn parse_correct_answer(answer_html: &str) -> String {
    let Some(bold) = element_inner(answer_html, "div", "font-weight:bold") else {
        return String::new();
    };
    if let Some(span) = element_inner(bold, "span", "") {
        let answer = strip_tags(span);
        if !answer.is_empty() {
            return answer;
        }
    }
    RE_ANSWER_LABEL
        .captures(&strip_tags(bold))
        .map(|cap| cap[1].trim().to_string())
        .unwrap_or_default()
}

/// The link tree embedded in a documentation page's layout element.
pub fn sidebar_json(html: &str) -> ParseOutcome<JsonValue> {
    let Some(raw) = attribute_value(html, SIDEBAR_HOST, SIDEBAR_ATTRIBUTE) else {
        return ParseOutcome::NotFound;
    };
    match serde_json::from_str(&raw) {
        Ok(json) => ParseOutcome::Parsed(json),
        Err(e) => ParseOutcome::Malformed(e.to_string()),
    }
}

/// Absolute urls of every `link.href` in a nested `children` tree.
pub fn extract_sidebar_links(tree: &JsonValue, base: &Url) -> BTreeSet<String> {
    let mut links = BTreeSet::new();
    collect_links(tree, base, &mut links);
    links
}

fn collect_links(node: &JsonValue, base: &Url, links: &mut BTreeSet<String>) {
    let Some(items) = node.as_array() else {
        return;
    };
    for item in items {
        if let Some(href) = item.pointer("/link/href").and_then(JsonValue::as_str) {
            match base.join(href) {
                Ok(url) => {
                    links.insert(url.to_string());
                }
                Err(e) => tracing::debug!(href, error = %e, "Unjoinable sidebar link"),
            }
        }
        if let Some(children) = item.get("children") {
            collect_links(children, base, links);
        }
    }
}

/// Title and readable text of one documentation article.
pub fn parse_article(html: &str, url: &str) -> ParseOutcome<SourceDocument> {
    let title = element_inner(html, "h1", "")
        .or_else(|| element_inner(html, "title", ""))
        .map(strip_tags)
        .filter(|t| !t.is_empty());
    let body = element_inner(html, SIDEBAR_HOST, "")
        .or_else(|| element_inner(html, "main", ""))
        .or_else(|| element_inner(html, "article", ""))
        .or_else(|| element_inner(html, "body", ""));

    let (title, body) = match (title, body) {
        (None, None) => return ParseOutcome::NotFound,
        (Some(title), Some(body)) => (title, body),
        (None, Some(_)) => return ParseOutcome::Malformed("article has no title".to_string()),
        (Some(_), None) => return ParseOutcome::Malformed("article has no body".to_string()),
    };
    let content = html_to_text(body, TEXT_WIDTH);
    if content.is_empty() {
        return ParseOutcome::Malformed("article body is empty".to_string());
    }
    ParseOutcome::Parsed(SourceDocument {
        url: Some(url.to_string()),
        source_document: None,
        title: Some(title),
        content: Some(content),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAM_PAGE: &str = r#"
<html><body>
<h4 class="querstion-title">問題 7</h4>
<div class="qa">
  <div class="qa-question">Which two features unify customer profiles?<br>Choose 2 answers.</div>
  <div class="qa-options"><ul>
    <li><label><strong>A.</strong> Data streams</label></li>
    <li><label><strong>B.</strong> Identity resolution</label></li>
    <li><label><strong>C.</strong> Calculated insights</label></li>
  </ul></div>
  <div class="qa-answerexp">
    <div style="font-weight: bold">正解：<span>B, C</span></div>
    <div class="qa_explanation">説明<br>Identity resolution merges records.</div>
  </div>
</div>
<h4 class="querstion-title">問題 8</h4>
<div class="qa"><div class="qa-question">Broken question without options</div></div>
</body></html>"#;

    #[test]
    fn exam_page_questions_are_parsed() {
        let questions = parse_exam_page(EXAM_PAGE).parsed().unwrap();
        assert_eq!(questions.len(), 1);
        let q = &questions[0];
        assert_eq!(q.question_id, 7);
        assert_eq!(
            q.question_text,
            "Which two features unify customer profiles?\nChoose 2 answers."
        );
        assert_eq!(q.choices.get("B").map(String::as_str), Some("Identity resolution"));
        assert_eq!(q.choices.len(), 3);
        assert_eq!(q.correct_answer, "B, C");
        assert_eq!(q.explanation.as_deref(), Some("Identity resolution merges records."));
    }

    #[test]
    fn page_without_questions_is_not_found() {
        assert_eq!(parse_exam_page("<html><p>Maintenance</p></html>"), ParseOutcome::NotFound);
    }

    #[test]
    fn only_broken_questions_is_malformed() {
        let html = r#"<h4>問題 1</h4><div class="qa-question">text</div>"#;
        assert!(matches!(parse_exam_page(html), ParseOutcome::Malformed(_)));
    }

    #[test]
    fn plain_labels_split_on_dot() {
        let choices =
            parse_choices("<label>A. First</label><label>B. Second</label><label>noise</label>");
        assert_eq!(choices.len(), 2);
        assert_eq!(choices["A"], "First");
    }

    #[test]
    fn answer_falls_back_to_label_text() {
        let html = r#"<div style="font-weight:bold">正解：A</div>"#;
        assert_eq!(parse_correct_answer(html), "A");
    }

    #[test]
    fn sidebar_links_are_collected_recursively() {
        let tree = serde_json::json!([
            {"link": {"href": "guide/intro.html"}, "children": [
                {"link": {"href": "guide/setup.html"}},
                {"children": [{"link": {"href": "/docs/data/other.html"}}]}
            ]},
            {"link": {"href": "guide/intro.html"}}
        ]);
        let base = Url::parse("https://developer.example.com/docs/data/start.html").unwrap();
        let links: Vec<String> = extract_sidebar_links(&tree, &base).into_iter().collect();
        assert_eq!(
            links,
            vec![
                "https://developer.example.com/docs/data/guide/intro.html",
                "https://developer.example.com/docs/data/guide/setup.html",
                "https://developer.example.com/docs/data/other.html",
            ]
        );
    }

    #[test]
    fn sidebar_attribute_is_read() {
        let html = r#"<doc-content-layout sidebar-content="[{&quot;link&quot;:{&quot;href&quot;:&quot;a.html&quot;}}]">"#;
        let json = sidebar_json(html).parsed().unwrap();
        assert_eq!(json[0]["link"]["href"], "a.html");
        assert_eq!(sidebar_json("<div></div>"), ParseOutcome::NotFound);
    }

    #[test]
    fn article_title_and_body() {
        let html = "<html><head><title>Ignored</title></head><body><h1>Data Streams</h1><main><p>Streams ingest data.</p></main></body></html>";
        let doc = parse_article(html, "https://docs.example.com/streams").parsed().unwrap();
        assert_eq!(doc.title(), "Data Streams");
        assert!(doc.body().unwrap().contains("Streams ingest data."));
        assert_eq!(doc.source(), "https://docs.example.com/streams");
    }
}
