use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::question::{RelatedDoc, Verdict};
use crate::models::session::{NavOutcome, Page, QuestionStatus};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitAnswerRequest {
    #[validate(length(min = 1, message = "select at least one choice"))]
    pub selections: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionListItem {
    pub question_id: i64,
    pub label: String,
    pub status: QuestionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceView {
    pub key: String,
    pub text: String,
    /// `Some(true)` for a selected correct choice, `Some(false)` for a selected wrong one.
    pub mark: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackView {
    pub is_correct: bool,
    pub user_answers: Vec<String>,
    pub correct_answers: Vec<String>,
    pub verdict: Option<Verdict>,
    pub justification: String,
    pub explanation: String,
    pub related_docs: Vec<RelatedDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionView {
    pub question_id: i64,
    pub header: String,
    pub question_text: String,
    pub choices: Vec<ChoiceView>,
    pub required_count: usize,
    pub answer_submitted: bool,
    pub has_previous: bool,
    pub has_next: bool,
    pub feedback: Option<FeedbackView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlaggedQuestion {
    pub question_id: i64,
    pub question_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub page: Page,
    pub review_mode: bool,
    pub outcome: Option<NavOutcome>,
    pub message: Option<String>,
    pub answered_count: usize,
    pub wrong_count: usize,
    pub total_questions: usize,
    pub flagged: Vec<FlaggedQuestion>,
    pub question: Option<QuestionView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAnswerResponse {
    pub is_correct: bool,
    pub session: SessionResponse,
}
