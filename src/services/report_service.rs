//! Deep-dive analysis of indeterminate questions, kept as an append-only
//! markdown report, and the patch workflow that feeds it back.

use crate::error::Result;
use crate::models::question::{AiAnalysis, AiVerification, ExamQuestion, RelatedDoc, Verdict};
use crate::services::ai_service::AIService;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::Semaphore;

const REPORT_TITLE: &str = "# Deep-dive analysis of indeterminate questions";
const SECTION_SEPARATOR: &str = "\n\n---\n\n";
const DEFAULT_REASON: &str = "AIによる推奨情報源です。";
const DEFAULT_SUPPORTING_TEXT: &str =
    "このドキュメントは、AIの追加調査によって正答の根拠として特定されました。";
const DEFAULT_JUSTIFICATION: &str = "分析レポートから自動生成された情報です。";

static RE_ANALYZED_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:問題ID|Question ID)\s*[:：]\s*(\d+)|\(ID:\s*(\d+)\)").expect("static regex")
});
static RE_SECTION_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^##\s*問題\s*\d+").expect("static regex"));
static RE_BLOCK_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"##\s*問題\s*\d+\s*\(ID:\s*(\d+)\)").expect("static regex")
});
static RE_SOURCES_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)##\s*2\.[^\n]*\n(.*?)(?:##\s*3\.|\z)").expect("static regex")
});
static RE_SOURCE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\s*\[([^\]]+)\]\((https?://[^)]+)\)").expect("static regex"));
static RE_SOURCE_REASON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\*\s*(?:推奨理由|Reason)\s*[:：]\s*(.*?)(?:\n\n|\z)")
        .expect("static regex")
});
static RE_FINAL_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)##\s*3\.[^\n]*\n(.*)").expect("static regex"));
static RE_CONCLUSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:結論|Conclusion)\s*[:：]\s*([^\n]+)").expect("static regex")
});
static RE_JUSTIFICATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(?:理由|根拠|Reason)\s*[:：]\s*(.*)").expect("static regex")
});

/// One question's correction extracted from the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchEntry {
    pub question_id: i64,
    pub ai_analysis: AiAnalysis,
}

#[derive(Debug, Clone, Copy)]
pub struct AnalysisOptions {
    /// Upper bound on questions analysed per run; 0 means no limit.
    pub max_questions: usize,
    pub max_concurrent: usize,
    pub dispatch_delay: Duration,
}

/// Question ids already present in a report.
pub fn analyzed_ids(report: &str) -> BTreeSet<i64> {
    RE_ANALYZED_ID
        .captures_iter(report)
        .filter_map(|cap| cap.get(1).or_else(|| cap.get(2)))
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

/// Number of `## 問題 N` sections, used to continue the numbering.
pub fn count_report_sections(report: &str) -> usize {
    RE_SECTION_HEADING.find_iter(report).count()
}

/// Indeterminate questions not yet in the report, capped at `max` when non-zero.
pub fn select_undecided<'a>(
    questions: &'a [ExamQuestion],
    analyzed: &BTreeSet<i64>,
    max: usize,
) -> Vec<&'a ExamQuestion> {
    let pending = questions
        .iter()
        .filter(|q| q.verdict() == Some(Verdict::Indeterminate))
        .filter(|q| !analyzed.contains(&q.question_id));
    if max > 0 {
        pending.take(max).collect()
    } else {
        pending.collect()
    }
}

pub fn build_analysis_prompt(question: &ExamQuestion) -> String {
    let choices = question
        .choices
        .iter()
        .map(|(key, text)| format!("  - {}: {}", key, text))
        .collect::<Vec<_>>()
        .join("\n");
    let previous = question
        .ai_analysis
        .as_ref()
        .map(|a| a.ai_verification.justification.as_str())
        .unwrap_or("N/A");

    format!(
        "You are a senior expert and research analyst for this certification exam.\n\
A retrieval system could not decide whether the declared answer below is correct.\n\
Find out why, identify the missing knowledge, look it up in official documentation, \
and give a clear final judgement (一致 or 矛盾の可能性あり).\n\
\n\
# Question data\n\
- 問題ID: {id}\n\
- Question: {text}\n\
- Choices:\n{choices}\n\
- Declared answer: {answer}\n\
- Unofficial explanation: {explanation}\n\
- Previous assessment: {previous}\n\
\n\
# Output format (markdown)\n\
## 1. Root cause of the indeterminate result\n\
## 2. Recommended sources\n\
* [title](https://...)\n\
  * 推奨理由: why the source settles the question\n\
## 3. Final assessment\n\
結論: 一致 or 矛盾の可能性あり\n\
理由: detailed reasoning based on the sources\n",
        id = question.question_id,
        text = question.question_text,
        choices = choices,
        answer = question.correct_answer_display(),
        explanation = question.japanese_explanation.as_deref().unwrap_or("N/A"),
        previous = previous,
    )
}

/// Analyses pending indeterminate questions and appends numbered sections to the report.
///
/// Returns the ids that were appended.
pub async fn run_undecided_analysis(
    ai: &AIService,
    questions: &[ExamQuestion],
    report_path: &Path,
    options: AnalysisOptions,
) -> Result<Vec<i64>> {
    let existing = if report_path.exists() {
        std::fs::read_to_string(report_path)?
    } else {
        String::new()
    };
    let analyzed = analyzed_ids(&existing);
    let targets = select_undecided(questions, &analyzed, options.max_questions);
    if targets.is_empty() {
        tracing::info!(
            already_analyzed = analyzed.len(),
            "No indeterminate questions left to analyse"
        );
        return Ok(Vec::new());
    }
    tracing::info!(
        targets = targets.len(),
        already_analyzed = analyzed.len(),
        "Analysing indeterminate questions"
    );

    let semaphore = Semaphore::new(options.max_concurrent.max(1));
    let tasks = targets.iter().map(|question| {
        let semaphore = &semaphore;
        async move {
            let _permit = semaphore.acquire().await.ok();
            tokio::time::sleep(options.dispatch_delay).await;
            let prompt = build_analysis_prompt(question);
            match ai.generate_with_retry(&prompt).await {
                Ok(text) => Some(text),
                Err(e) => {
                    // Failed questions stay out of the report so the next run picks them up.
                    tracing::error!(
                        question_id = question.question_id,
                        error = %e,
                        "Analysis failed, question left for the next run"
                    );
                    None
                }
            }
        }
    });
    let reports = join_all(tasks).await;

    let mut appended = String::new();
    if existing.is_empty() {
        appended.push_str(&report_header(Utc::now()));
    }
    let start = count_report_sections(&existing);
    let mut ids = Vec::with_capacity(targets.len());
    let succeeded = targets
        .iter()
        .zip(reports)
        .filter_map(|(question, report)| report.map(|r| (question.question_id, r)));
    for (question_id, report) in succeeded {
        appended.push_str(&format_section(start + ids.len() + 1, question_id, &report));
        ids.push(question_id);
    }
    if ids.is_empty() {
        tracing::warn!(failed = targets.len(), "Every analysis failed, report left unchanged");
        return Ok(ids);
    }

    if let Some(parent) = report_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(report_path, format!("{}{}", existing, appended))?;
    tracing::info!(appended = ids.len(), path = %report_path.display(), "Report updated");
    Ok(ids)
}

pub fn report_header(created: DateTime<Utc>) -> String {
    format!(
        "{}\n\nCreated: {}{}",
        REPORT_TITLE,
        created.format("%Y-%m-%d %H:%M UTC"),
        SECTION_SEPARATOR
    )
}

pub fn format_section(number: usize, question_id: i64, body: &str) -> String {
    format!(
        "## 問題 {} (ID: {}) の分析結果\n\n{}{}",
        number,
        question_id,
        body.trim(),
        SECTION_SEPARATOR
    )
}

/// Patch entries for every section of the report that names a question id.
pub fn parse_report(report: &str) -> Vec<PatchEntry> {
    let starts: Vec<(usize, i64)> = RE_BLOCK_ID
        .captures_iter(report)
        .filter_map(|cap| {
            let start = cap.get(0)?.start();
            let id = cap.get(1)?.as_str().parse().ok()?;
            Some((start, id))
        })
        .collect();

    starts
        .iter()
        .enumerate()
        .map(|(i, (start, id))| {
            let end = starts.get(i + 1).map(|s| s.0).unwrap_or(report.len());
            parse_block(*id, &report[*start..end])
        })
        .collect()
}

fn parse_block(question_id: i64, block: &str) -> PatchEntry {
    let mut related_docs = Vec::new();
    if let Some(sources) = RE_SOURCES_SECTION.captures(block).and_then(|c| c.get(1)) {
        let sources = sources.as_str();
        let links: Vec<regex::Captures> = RE_SOURCE_LINK.captures_iter(sources).collect();
        for (i, link) in links.iter().enumerate() {
            let (Some(whole), Some(title), Some(url)) = (link.get(0), link.get(1), link.get(2))
            else {
                continue;
            };
            let next = links
                .get(i + 1)
                .and_then(|l| l.get(0))
                .map(|m| m.start())
                .unwrap_or(sources.len());
            let reason = RE_SOURCE_REASON
                .captures(&sources[whole.end()..next])
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().replace('\n', " "))
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| DEFAULT_REASON.to_string());
            related_docs.push(RelatedDoc {
                title: title.as_str().trim().to_string(),
                url: url.as_str().trim().to_string(),
                reason,
                supporting_text: DEFAULT_SUPPORTING_TEXT.to_string(),
            });
        }
    }

    let mut status = Verdict::Indeterminate;
    let mut justification = DEFAULT_JUSTIFICATION.to_string();
    if let Some(final_eval) = RE_FINAL_SECTION.captures(block).and_then(|c| c.get(1)) {
        let final_eval = final_eval.as_str().trim_end().trim_end_matches("---");
        if let Some(conclusion) = RE_CONCLUSION.captures(final_eval).and_then(|c| c.get(1)) {
            let conclusion = conclusion.as_str();
            if conclusion.contains("一致") {
                status = Verdict::Matches;
            } else if conclusion.contains("矛盾") {
                status = Verdict::PossibleContradiction;
            }
        }
        if let Some(reason) = RE_JUSTIFICATION.captures(final_eval).and_then(|c| c.get(1)) {
            let reason = reason.as_str().trim().replace('\n', " ");
            if !reason.is_empty() {
                justification = reason;
            }
        }
    }

    PatchEntry {
        question_id,
        ai_analysis: AiAnalysis {
            related_docs,
            excluded_docs: Vec::new(),
            ai_verification: AiVerification {
                status,
                justification,
            },
        },
    }
}

/// Replaces the analysis of every patched question; returns the ids that were found.
pub fn apply_patch(questions: &mut [ExamQuestion], patch: &[PatchEntry]) -> Vec<i64> {
    let by_id: BTreeMap<i64, &PatchEntry> = patch.iter().map(|p| (p.question_id, p)).collect();
    let mut applied = Vec::new();
    for question in questions.iter_mut() {
        if let Some(entry) = by_id.get(&question.question_id) {
            question.ai_analysis = Some(entry.ai_analysis.clone());
            applied.push(question.question_id);
        }
    }
    let missing: Vec<i64> = by_id
        .keys()
        .filter(|id| !applied.contains(id))
        .copied()
        .collect();
    if !missing.is_empty() {
        tracing::warn!(?missing, "Patch entries without a matching question");
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ai_service::{GenerativeModel, MockGenerativeModel};
    use crate::utils::retry::RetryPolicy;
    use std::sync::Arc;

    const REPORT: &str = "# header\n\n---\n\n## 問題 1 (ID: 12) の分析結果\n\n## 1. 原因\nterm missing\n\n## 2. 不足知識を補うための推奨情報源\n* [Identity Resolution](https://help.example.com/ir)\n  * 推奨理由: explains match rules\n* [Data Streams](https://help.example.com/ds)\n\n## 3. 追加情報を踏まえた最終評価\n結論: 正答と一致\n理由: the guide states\nit directly.\n\n---\n\n## 問題 2 (ID: 30) の分析結果\n\n## 3. 最終評価\n結論：矛盾の可能性あり\n\n---\n\n";

    fn undecided(id: i64) -> ExamQuestion {
        ExamQuestion {
            question_id: id,
            question_text: format!("Question {}", id),
            choices: BTreeMap::from([("A".to_string(), "Yes".to_string())]),
            correct_answer: "A".into(),
            explanation: None,
            japanese_explanation: None,
            ai_analysis: Some(AiAnalysis::indeterminate("no docs")),
        }
    }

    #[test]
    fn ids_are_found_in_both_notations() {
        let ids = analyzed_ids("- 問題ID: 4\n## 問題 2 (ID: 9) の分析結果\nQuestion ID: 11");
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![4, 9, 11]);
        assert_eq!(count_report_sections(REPORT), 2);
    }

    #[test]
    fn selection_skips_analyzed_and_caps() {
        let mut questions: Vec<ExamQuestion> = (1..=5).map(undecided).collect();
        questions[1].ai_analysis = Some(AiAnalysis::error("boom"));
        let analyzed = BTreeSet::from([1]);
        let ids: Vec<i64> = select_undecided(&questions, &analyzed, 2)
            .iter()
            .map(|q| q.question_id)
            .collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(select_undecided(&questions, &analyzed, 0).len(), 3);
    }

    #[test]
    fn report_becomes_patch_entries() {
        let patch = parse_report(REPORT);
        assert_eq!(patch.len(), 2);

        let first = &patch[0];
        assert_eq!(first.question_id, 12);
        assert_eq!(first.ai_analysis.ai_verification.status, Verdict::Matches);
        assert_eq!(
            first.ai_analysis.ai_verification.justification,
            "the guide states it directly."
        );
        assert_eq!(first.ai_analysis.related_docs.len(), 2);
        assert_eq!(first.ai_analysis.related_docs[0].reason, "explains match rules");
        assert_eq!(first.ai_analysis.related_docs[1].reason, DEFAULT_REASON);

        let second = &patch[1];
        assert_eq!(second.question_id, 30);
        assert_eq!(second.ai_analysis.ai_verification.status, Verdict::PossibleContradiction);
        assert_eq!(second.ai_analysis.ai_verification.justification, DEFAULT_JUSTIFICATION);
    }

    #[test]
    fn patch_replaces_analysis_by_id() {
        let mut questions = vec![undecided(12), undecided(13)];
        let patch = parse_report(REPORT);
        assert_eq!(apply_patch(&mut questions, &patch), vec![12]);
        assert_eq!(questions[0].verdict(), Some(Verdict::Matches));
        assert_eq!(questions[1].verdict(), Some(Verdict::Indeterminate));
    }

    #[tokio::test]
    async fn analysis_appends_numbered_sections_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.md");
        let mut mock = MockGenerativeModel::new();
        mock.expect_generate()
            .times(3)
            .returning(|_| Ok("## 3. Final\n結論: 一致\n理由: confirmed".to_string()));
        let model: Arc<dyn GenerativeModel> = Arc::new(mock);
        let ai = AIService::new(model, RetryPolicy::none(), Duration::ZERO);
        let questions: Vec<ExamQuestion> = (1..=3).map(undecided).collect();
        let options = AnalysisOptions {
            max_questions: 2,
            max_concurrent: 2,
            dispatch_delay: Duration::ZERO,
        };

        let first = run_undecided_analysis(&ai, &questions, &path, options).await.unwrap();
        assert_eq!(first, vec![1, 2]);
        let second = run_undecided_analysis(&ai, &questions, &path, options).await.unwrap();
        assert_eq!(second, vec![3]);
        let third = run_undecided_analysis(&ai, &questions, &path, options).await.unwrap();
        assert!(third.is_empty());

        let report = std::fs::read_to_string(&path).unwrap();
        assert!(report.starts_with(REPORT_TITLE));
        assert_eq!(report.matches(REPORT_TITLE).count(), 1);
        assert!(report.contains("## 問題 3 (ID: 3) の分析結果"));
        assert_eq!(count_report_sections(&report), 3);
        assert_eq!(parse_report(&report).len(), 3);
    }

    #[tokio::test]
    async fn failed_analysis_is_retried_on_the_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.md");
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let mut mock = MockGenerativeModel::new();
        mock.expect_generate().times(2).returning(move |_| {
            if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Err(crate::error::Error::Upstream("quota exceeded".into()))
            } else {
                Ok("## 3. Final\n結論: 一致\n理由: confirmed".to_string())
            }
        });
        let model: Arc<dyn GenerativeModel> = Arc::new(mock);
        let ai = AIService::new(model, RetryPolicy::none(), Duration::ZERO);
        let questions = vec![undecided(5)];
        let options = AnalysisOptions {
            max_questions: 0,
            max_concurrent: 1,
            dispatch_delay: Duration::ZERO,
        };

        let first = run_undecided_analysis(&ai, &questions, &path, options).await.unwrap();
        assert!(first.is_empty());
        let after_failure = std::fs::read_to_string(&path).unwrap_or_default();
        assert!(!analyzed_ids(&after_failure).contains(&5));
        assert!(parse_report(&after_failure).is_empty());

        let second = run_undecided_analysis(&ai, &questions, &path, options).await.unwrap();
        assert_eq!(second, vec![5]);
        let report = std::fs::read_to_string(&path).unwrap();
        let patch = parse_report(&report);
        assert_eq!(patch.len(), 1);
        assert_eq!(patch[0].question_id, 5);
        assert_eq!(patch[0].ai_analysis.ai_verification.status, Verdict::Matches);
        assert_eq!(count_report_sections(&report), 1);
    }

    #[test]
    fn rescanning_a_report_gives_the_same_ids() {
        let first = analyzed_ids(REPORT);
        let second = analyzed_ids(REPORT);
        assert_eq!(first, second);
        assert_eq!(first, BTreeSet::from([12, 30]));

        let doubled = format!("{}{}", REPORT, REPORT);
        assert_eq!(analyzed_ids(&doubled), first);
    }
}
