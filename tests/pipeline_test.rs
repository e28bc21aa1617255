use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use exam_assistant::error::{Error, Result};
use exam_assistant::models::document::DocumentChunk;
use exam_assistant::models::question::{AiAnalysis, ExamQuestion, Verdict};
use exam_assistant::services::ai_service::{AIService, GenerativeModel, TRANSLATION_FAILED};
use exam_assistant::services::embed_service::{EmbedService, EmbeddingModel};
use exam_assistant::services::index_service::build_index;
use exam_assistant::services::retrieval_service::HybridRetriever;
use exam_assistant::services::verification_service::{PipelineOptions, VerificationService};
use exam_assistant::utils::retry::RetryPolicy;

const VERIFICATION_REPLY: &str = r#"Here you go:
```json
{"related_docs": [{"title": "Identity Resolution", "url": "https://help.example.com/ir", "reason": "defines match rules", "supporting_text": "Match rules link profiles."}],
 "ai_verification": {"status": "一致", "justification": "The guide confirms option B."}}
```"#;

/// Answers translation prompts with fixed Japanese text and verification prompts with JSON.
struct ScriptedModel {
    calls: AtomicUsize,
    fail: bool,
}

impl ScriptedModel {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail,
        })
    }
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Upstream("quota exceeded".into()));
        }
        if prompt.contains("# Candidate documents") {
            Ok(VERIFICATION_REPLY.to_string())
        } else {
            Ok("翻訳された解説".to_string())
        }
    }
}

/// Every text lands near the origin; the query lands on the first axis.
struct AxisEmbedder;

#[async_trait]
impl EmbeddingModel for AxisEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| vec![t.len() as f32 / 100.0, 0.0]).collect())
    }
}

fn question_seven() -> ExamQuestion {
    ExamQuestion {
        question_id: 7,
        question_text: "Which feature links customer profiles across sources?".into(),
        choices: [
            ("A", "Data streams"),
            ("B", "Identity resolution"),
            ("C", "Calculated insights"),
            ("D", "Segments"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<BTreeMap<_, _>>(),
        correct_answer: "B".into(),
        explanation: Some("Identity resolution uses match rules to link profiles.".into()),
        japanese_explanation: None,
        ai_analysis: None,
    }
}

fn retriever() -> HybridRetriever {
    let chunks: Vec<DocumentChunk> = (0..12)
        .map(|i| DocumentChunk {
            text: format!("Identity resolution rule {} links customer profiles", i),
            source: format!("https://help.example.com/ir/{}", i),
            title: format!("Identity Resolution {}", i),
        })
        .collect();
    let vectors = (0..12).map(|i| vec![i as f32, 1.0]).collect();
    let index = build_index(chunks, vectors).expect("index");
    let embedder = EmbedService::new(Arc::new(AxisEmbedder), RetryPolicy::none(), Duration::ZERO);
    HybridRetriever::new(Arc::new(index), embedder, 30, 10)
}

fn service(model: Arc<ScriptedModel>) -> VerificationService {
    let ai = AIService::new(model, RetryPolicy::none(), Duration::ZERO);
    VerificationService::new(ai, retriever(), "- Identity Resolution: ID解決".into())
}

fn options() -> PipelineOptions {
    PipelineOptions {
        max_concurrent: 3,
        dispatch_delay: Duration::ZERO,
    }
}

#[tokio::test]
async fn hybrid_search_returns_at_most_ten_unique_chunks() {
    let hits = retriever().search("identity resolution customer profiles").await;
    assert!(!hits.is_empty());
    assert!(hits.len() <= 10);
    let unique: HashSet<&str> = hits.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(unique.len(), hits.len());
}

#[tokio::test]
async fn question_seven_is_verified_end_to_end() {
    let model = ScriptedModel::new(false);
    let (results, summary) = service(model.clone())
        .run_pipeline(&[question_seven()], Vec::new(), options())
        .await;

    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    assert_eq!(summary.submitted, 1);
    assert_eq!(summary.succeeded, 1);
    assert!(summary.errored.is_empty());

    let q = &results[0];
    assert_eq!(q.question_id, 7);
    assert_eq!(q.japanese_explanation.as_deref(), Some("翻訳された解説"));
    let analysis = q.ai_analysis.as_ref().unwrap();
    assert_eq!(analysis.ai_verification.status, Verdict::Matches);
    assert_eq!(analysis.related_docs.len(), 1);
    assert_eq!(analysis.related_docs[0].url, "https://help.example.com/ir");
}

#[tokio::test]
async fn processed_questions_make_no_model_calls() {
    let model = ScriptedModel::new(false);
    let mut done = question_seven();
    done.ai_analysis = Some(AiAnalysis::indeterminate("nothing relevant"));

    let (results, summary) = service(model.clone())
        .run_pipeline(&[question_seven()], vec![done.clone()], options())
        .await;

    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    assert_eq!(summary.already_processed, 1);
    assert_eq!(summary.submitted, 0);
    assert_eq!(results, vec![done]);
}

#[tokio::test]
async fn failures_are_stored_as_errors_and_retried_later() {
    let failing = ScriptedModel::new(true);
    let (results, summary) = service(failing)
        .run_pipeline(&[question_seven()], Vec::new(), options())
        .await;
    assert_eq!(summary.errored, vec![7]);
    assert_eq!(results[0].verdict(), Some(Verdict::Error));
    assert!(results[0]
        .japanese_explanation
        .as_deref()
        .unwrap()
        .starts_with(TRANSLATION_FAILED));

    let model = ScriptedModel::new(false);
    let (results, summary) = service(model.clone())
        .run_pipeline(&[question_seven()], results, options())
        .await;
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(results[0].verdict(), Some(Verdict::Matches));
}
