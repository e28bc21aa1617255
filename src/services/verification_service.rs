//! Answer verification: translate, retrieve, and ask the model to adjudicate
//! the declared answer against the retrieved reference text.

use crate::models::document::DocumentChunk;
use crate::models::question::{AiAnalysis, ExamQuestion, Verdict};
use crate::services::ai_service::AIService;
use crate::services::retrieval_service::HybridRetriever;
use crate::utils::json_extract::extract_json_object;
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Semaphore;

pub const NO_CANDIDATES: &str = "関連ドキュメントの候補が見つかりませんでした。";

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub max_concurrent: usize,
    pub dispatch_delay: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub total_questions: usize,
    pub already_processed: usize,
    pub submitted: usize,
    pub succeeded: usize,
    /// Questions stored with an error verdict; they are picked up again on the next run.
    pub errored: Vec<i64>,
}

#[derive(Clone)]
pub struct VerificationService {
    ai: AIService,
    retriever: HybridRetriever,
    glossary: String,
}

impl VerificationService {
    pub fn new(ai: AIService, retriever: HybridRetriever, glossary: String) -> Self {
        Self {
            ai,
            retriever,
            glossary,
        }
    }

    /// Asks the model to pick supporting documents and judge the declared answer.
    pub async fn verify(
        &self,
        question: &ExamQuestion,
        candidates: &[DocumentChunk],
    ) -> AiAnalysis {
        if candidates.is_empty() {
            return AiAnalysis::indeterminate(NO_CANDIDATES);
        }
        let prompt = build_verification_prompt(question, candidates);
        match self.ai.generate_with_retry(&prompt).await {
            Ok(raw) => parse_verification(&raw),
            Err(e) => {
                tracing::error!(
                    question_id = question.question_id,
                    error = %e,
                    "Verification call failed"
                );
                AiAnalysis::error(format!("AI処理中にエラーが発生しました: {}", e))
            }
        }
    }

    /// Full treatment of one question. Failures end up as an error verdict in the result.
    pub async fn process_question(&self, question: &ExamQuestion) -> ExamQuestion {
        let translated = self
            .ai
            .translate_explanation(question.explanation.as_deref(), &self.glossary)
            .await;
        let query = enhanced_query(question, &translated);
        let candidates = self.retriever.search(&query).await;
        tracing::debug!(
            question_id = question.question_id,
            candidates = candidates.len(),
            "Retrieved candidate chunks"
        );
        let analysis = self.verify(question, &candidates).await;

        ExamQuestion {
            japanese_explanation: Some(translated),
            ai_analysis: Some(analysis),
            ..question.clone()
        }
    }

    /// Processes every question that has no usable result in `processed` yet.
    ///
    /// Returns the merged list sorted by question id.
    pub async fn run_pipeline(
        &self,
        questions: &[ExamQuestion],
        processed: Vec<ExamQuestion>,
        options: PipelineOptions,
    ) -> (Vec<ExamQuestion>, PipelineSummary) {
        let mut by_id: BTreeMap<i64, ExamQuestion> =
            processed.into_iter().map(|q| (q.question_id, q)).collect();
        let pending = pending_questions(questions, &by_id);

        let mut summary = PipelineSummary {
            total_questions: questions.len(),
            already_processed: questions.len() - pending.len(),
            submitted: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            tracing::info!("All questions are already processed");
            return (by_id.into_values().collect(), summary);
        }
        tracing::info!(
            pending = pending.len(),
            max_concurrent = options.max_concurrent,
            "Processing questions"
        );

        let semaphore = Semaphore::new(options.max_concurrent.max(1));
        let tasks = pending.iter().map(|question| {
            let semaphore = &semaphore;
            async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        let mut failed = (*question).clone();
                        failed.ai_analysis = Some(AiAnalysis::error(e.to_string()));
                        return failed;
                    }
                };
                tokio::time::sleep(options.dispatch_delay).await;
                self.process_question(question).await
            }
        });
        let results = join_all(tasks).await;

        for result in results {
            if result.verdict() == Some(Verdict::Error) {
                summary.errored.push(result.question_id);
            } else {
                summary.succeeded += 1;
            }
            by_id.insert(result.question_id, result);
        }
        summary.errored.sort_unstable();
        tracing::info!(
            submitted = summary.submitted,
            succeeded = summary.succeeded,
            errored = ?summary.errored,
            "Pipeline finished"
        );
        (by_id.into_values().collect(), summary)
    }
}

/// Questions absent from `processed`, or present only with an error verdict.
pub fn pending_questions<'a>(
    questions: &'a [ExamQuestion],
    processed: &BTreeMap<i64, ExamQuestion>,
) -> Vec<&'a ExamQuestion> {
    questions
        .iter()
        .filter(|q| {
            processed
                .get(&q.question_id)
                .map(|done| done.needs_verification())
                .unwrap_or(true)
        })
        .collect()
}

/// Question text, correct choice texts and translated explanation in one query.
pub fn enhanced_query(question: &ExamQuestion, translated_explanation: &str) -> String {
    format!(
        "{} {} {}",
        question.question_text,
        question.correct_answer_texts().join(" "),
        translated_explanation
    )
}

pub fn build_verification_prompt(question: &ExamQuestion, candidates: &[DocumentChunk]) -> String {
    let choices = question
        .choices
        .iter()
        .map(|(key, text)| format!("    {}: {}", key, text))
        .collect::<Vec<_>>()
        .join("\n");
    let docs = candidates
        .iter()
        .map(|doc| {
            format!(
                "- title: {}\n  url: {}\n  text: {:?}",
                doc.title, doc.source, doc.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are an expert on this certification exam. Check the declared correct answer \
against the candidate reference documents and reply in Japanese.\n\
\n\
# Question\n\
- question_id: {id}\n\
  question_text: {text}\n\
  choices:\n{choices}\n\
  correct_answer: {answer}\n\
\n\
# Candidate documents\n\
{docs}\n\
\n\
# Instructions\n\
1. Select up to 3 documents that support the correct answer. For each give title, url, \
reason and supporting_text (the key sentence).\n\
2. List the documents you did not select with title and a short reason.\n\
3. Judge whether the correct answer is valid. status must be one of \
\"一致\", \"矛盾の可能性あり\", \"判断不能\".\n\
\n\
# Output (JSON only)\n\
{{\n\
  \"related_docs\": [{{\"title\": \"\", \"url\": \"\", \"reason\": \"\", \"supporting_text\": \"\"}}],\n\
  \"excluded_docs\": [{{\"title\": \"\", \"reason\": \"\"}}],\n\
  \"ai_verification\": {{\"status\": \"\", \"justification\": \"\"}}\n\
}}\n",
        id = question.question_id,
        text = question.question_text,
        choices = choices,
        answer = question.correct_answer_display(),
        docs = docs,
    )
}

/// Reads the model's verdict from raw output.
///
/// Anything that cannot be read becomes an error verdict carrying the reason.
pub fn parse_verification(raw: &str) -> AiAnalysis {
    let value = match extract_json_object(raw) {
        Ok(value) => value,
        Err(e) => return AiAnalysis::error(format!("format error: {}", e)),
    };
    if value.get("ai_verification").is_none() {
        return AiAnalysis::error("format error: missing ai_verification");
    }
    if value
        .pointer("/ai_verification/status")
        .and_then(|s| s.as_str())
        .is_none()
    {
        return AiAnalysis::error("format error: missing ai_verification.status");
    }
    match serde_json::from_value::<AiAnalysis>(value) {
        Ok(analysis) => analysis,
        Err(e) => AiAnalysis::error(format!("format error: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn question() -> ExamQuestion {
        let mut choices = BTreeMap::new();
        choices.insert("A".to_string(), "Data streams".to_string());
        choices.insert("B".to_string(), "Identity resolution".to_string());
        choices.insert("C".to_string(), "Calculated insights".to_string());
        ExamQuestion {
            question_id: 7,
            question_text: "Which features unify profiles?".into(),
            choices,
            correct_answer: "B, C".into(),
            explanation: Some("Identity resolution merges records.".into()),
            japanese_explanation: None,
            ai_analysis: None,
        }
    }

    #[test]
    fn prompt_carries_answer_and_documents() {
        let chunk = DocumentChunk {
            text: "Identity resolution uses match rules.".into(),
            source: "https://help.example.com/ir".into(),
            title: "Identity Resolution".into(),
        };
        let prompt = build_verification_prompt(&question(), &[chunk]);
        assert!(prompt.contains("question_id: 7"));
        assert!(prompt.contains("correct_answer: B. Identity resolution, C. Calculated insights"));
        assert!(prompt.contains("url: https://help.example.com/ir"));
    }

    #[test]
    fn verdict_parsed_from_fenced_output() {
        let raw = "```json\n{\"related_docs\": [{\"title\": \"IR\", \"url\": \"u\", \"reason\": \"r\", \"supporting_text\": \"s\"}], \"ai_verification\": {\"status\": \"正答と一致\", \"justification\": \"ok\"}}\n```";
        let analysis = parse_verification(raw);
        assert_eq!(analysis.ai_verification.status, Verdict::Matches);
        assert_eq!(analysis.related_docs.len(), 1);
    }

    #[test]
    fn unknown_status_is_indeterminate() {
        let analysis =
            parse_verification(r#"{"ai_verification": {"status": "maybe?", "justification": ""}}"#);
        assert_eq!(analysis.ai_verification.status, Verdict::Indeterminate);
    }

    #[test]
    fn missing_keys_become_error_verdict() {
        let analysis = parse_verification(r#"{"related_docs": []}"#);
        assert_eq!(analysis.ai_verification.status, Verdict::Error);
        assert!(analysis.ai_verification.justification.contains("format error"));

        let analysis = parse_verification("I could not decide.");
        assert_eq!(analysis.ai_verification.status, Verdict::Error);
    }

    #[test]
    fn empty_verification_object_is_an_error() {
        let analysis = parse_verification(r#"{"related_docs": [], "ai_verification": {}}"#);
        assert_eq!(analysis.ai_verification.status, Verdict::Error);
        assert!(analysis.ai_verification.justification.contains("ai_verification.status"));

        let analysis =
            parse_verification(r#"{"ai_verification": {"status": null, "justification": "x"}}"#);
        assert_eq!(analysis.ai_verification.status, Verdict::Error);
    }

    #[test]
    fn query_joins_answer_texts() {
        let q = question();
        assert_eq!(
            enhanced_query(&q, "説明"),
            "Which features unify profiles? Identity resolution Calculated insights 説明"
        );
    }

    #[test]
    fn pending_skips_finished_but_not_errored() {
        let questions: Vec<ExamQuestion> = (1..=3)
            .map(|id| ExamQuestion {
                question_id: id,
                ..question()
            })
            .collect();
        let mut processed = BTreeMap::new();
        processed.insert(
            1,
            ExamQuestion {
                question_id: 1,
                ai_analysis: Some(AiAnalysis::indeterminate("no docs")),
                ..question()
            },
        );
        processed.insert(
            2,
            ExamQuestion {
                question_id: 2,
                ai_analysis: Some(AiAnalysis::error("timeout")),
                ..question()
            },
        );
        let ids: Vec<i64> = pending_questions(&questions, &processed)
            .iter()
            .map(|q| q.question_id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }
}
