use crate::dto::quiz_dto::{
    ChoiceView, FeedbackView, FlaggedQuestion, QuestionListItem, QuestionView, SessionResponse,
};
use crate::error::{Error, Result};
use crate::models::question::ExamQuestion;
use crate::models::session::{NavOutcome, QuestionBank, QuizSession, QuestionStatus};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

const NO_JUSTIFICATION: &str = "検証の理由がありません。";
const NO_JAPANESE_EXPLANATION: &str = "（日本語の解説が見つかりません）";
const ALL_ANSWERED: &str = "全ての問題を解きました！";
const LABEL_LIMIT: usize = 60;

/// Process-local quiz sessions over one question bank.
#[derive(Clone)]
pub struct QuizService {
    bank: Arc<QuestionBank>,
    sessions: Arc<RwLock<HashMap<Uuid, QuizSession>>>,
}

impl QuizService {
    pub fn new(bank: QuestionBank) -> Self {
        Self {
            bank: Arc::new(bank),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn bank(&self) -> &QuestionBank {
        &self.bank
    }

    pub async fn create_session(&self) -> SessionResponse {
        let id = Uuid::new_v4();
        let session = QuizSession::new();
        let response = self.session_view(id, &session, None);
        self.sessions.write().await.insert(id, session);
        tracing::info!(session_id = %id, "Quiz session created");
        response
    }

    pub async fn get_session(&self, id: Uuid) -> Result<SessionResponse> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))?;
        Ok(self.session_view(id, session, None))
    }

    pub async fn delete_session(&self, id: Uuid) -> Result<()> {
        self.sessions
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))?;
        tracing::info!(session_id = %id, "Quiz session deleted");
        Ok(())
    }

    /// Sidebar entries for every question, with the session's markers.
    pub async fn question_list(&self, id: Uuid) -> Result<Vec<QuestionListItem>> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))?;
        Ok(question_list(&self.bank, Some(session)))
    }

    pub async fn begin(&self, id: Uuid) -> Result<SessionResponse> {
        self.transition(id, |session, bank| session.begin(bank)).await
    }

    pub async fn next(&self, id: Uuid) -> Result<SessionResponse> {
        self.transition(id, |session, bank| session.next(bank)).await
    }

    pub async fn previous(&self, id: Uuid) -> Result<SessionResponse> {
        self.transition(id, |session, _| session.previous()).await
    }

    pub async fn review(&self, id: Uuid) -> Result<SessionResponse> {
        self.transition(id, |session, _| {
            let mut rng = StdRng::from_entropy();
            session.start_review(&mut rng)
        })
        .await
    }

    pub async fn jump(&self, id: Uuid, question_id: i64) -> Result<SessionResponse> {
        if !self.bank.contains(question_id) {
            return Err(Error::NotFound(format!("question {}", question_id)));
        }
        self.transition(id, |session, bank| session.go_to(bank, question_id))
            .await
    }

    /// Records the selections; a rejected submission leaves the session as it was.
    pub async fn answer(
        &self,
        id: Uuid,
        selections: &[String],
    ) -> Result<(bool, SessionResponse)> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))?;
        let (session, result) = session.submit_answer(&self.bank, selections);
        let response = self.session_view(id, &session, None);
        sessions.insert(id, session);

        let is_correct = result.map_err(|e| Error::BadRequest(e.to_string()))?;
        tracing::debug!(session_id = %id, is_correct, "Answer recorded");
        Ok((is_correct, response))
    }

    async fn transition<F>(&self, id: Uuid, step: F) -> Result<SessionResponse>
    where
        F: FnOnce(QuizSession, &QuestionBank) -> (QuizSession, NavOutcome),
    {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))?;
        let (session, outcome) = step(session, &self.bank);
        let response = self.session_view(id, &session, Some(outcome));
        sessions.insert(id, session);
        Ok(response)
    }

    fn session_view(
        &self,
        id: Uuid,
        session: &QuizSession,
        outcome: Option<NavOutcome>,
    ) -> SessionResponse {
        let message = match outcome {
            Some(NavOutcome::Completed) => Some(ALL_ANSWERED.to_string()),
            _ => None,
        };
        let flagged = session
            .flagged_questions
            .iter()
            .filter_map(|qid| self.bank.get(*qid))
            .map(|q| FlaggedQuestion {
                question_id: q.question_id,
                question_text: q.question_text.clone(),
            })
            .collect();
        let question = session
            .current_question_id()
            .and_then(|qid| self.bank.get(qid))
            .map(|q| question_view(&self.bank, session, q));

        SessionResponse {
            session_id: id,
            page: session.page,
            review_mode: session.review_mode,
            outcome,
            message,
            answered_count: session.answered_ids.len(),
            wrong_count: session.wrong_answer_ids.len(),
            total_questions: self.bank.len(),
            flagged,
            question,
        }
    }
}

/// `問題 N`, or the review position when reviewing.
pub fn question_header(session: &QuizSession, question_id: i64) -> String {
    match (session.review_mode, session.current_index) {
        (true, Some(idx)) => format!(
            "復習問題 {}/{} (元の問 {})",
            idx + 1,
            session.review_history.len(),
            question_id
        ),
        _ => format!("問題 {}", question_id),
    }
}

pub fn question_view(
    bank: &QuestionBank,
    session: &QuizSession,
    question: &ExamQuestion,
) -> QuestionView {
    let correct: BTreeSet<String> = question.correct_keys().into_iter().collect();
    let selected: BTreeSet<&String> = session.user_answers.iter().collect();
    let submitted = session.answer_submitted;

    let choices = question
        .choices
        .iter()
        .map(|(key, text)| ChoiceView {
            key: key.clone(),
            text: text.clone(),
            mark: (submitted && selected.contains(key)).then(|| correct.contains(key)),
        })
        .collect();

    QuestionView {
        question_id: question.question_id,
        header: question_header(session, question.question_id),
        question_text: question.question_text.clone(),
        choices,
        required_count: question.correct_count().max(1),
        answer_submitted: submitted,
        has_previous: session.current_index.map(|i| i > 0).unwrap_or(false),
        has_next: session.has_next(bank),
        feedback: submitted.then(|| feedback_view(session, question)),
    }
}

fn feedback_view(session: &QuizSession, question: &ExamQuestion) -> FeedbackView {
    let correct_answers = question.correct_keys();
    let analysis = question.ai_analysis.as_ref();
    FeedbackView {
        is_correct: session.user_answers == correct_answers,
        user_answers: session.user_answers.clone(),
        correct_answers,
        verdict: question.verdict(),
        justification: analysis
            .map(|a| a.ai_verification.justification.clone())
            .filter(|j| !j.trim().is_empty())
            .unwrap_or_else(|| NO_JUSTIFICATION.to_string()),
        explanation: question
            .japanese_explanation
            .clone()
            .unwrap_or_else(|| NO_JAPANESE_EXPLANATION.to_string()),
        related_docs: analysis.map(|a| a.related_docs.clone()).unwrap_or_default(),
    }
}

/// Every question in id order; without a session all are unanswered.
pub fn question_list(bank: &QuestionBank, session: Option<&QuizSession>) -> Vec<QuestionListItem> {
    bank.iter()
        .map(|q| {
            let status = session
                .map(|s| s.status_of(q.question_id))
                .unwrap_or(QuestionStatus::Unanswered);
            let text: String = q
                .question_text
                .replace('\n', " ")
                .chars()
                .take(LABEL_LIMIT)
                .collect();
            QuestionListItem {
                question_id: q.question_id,
                label: format!("問{}: {}", q.question_id, text),
                status,
            }
        })
        .collect()
}
