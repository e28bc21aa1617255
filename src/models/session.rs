//! Quiz progress as an explicit value.
//!
//! Every transition takes the session by value and hands it back together
//! with an outcome, so the whole flow can be driven without a UI.

use crate::models::question::ExamQuestion;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The final question set, keyed and ordered by `question_id`.
#[derive(Debug, Clone, Default)]
pub struct QuestionBank {
    questions: BTreeMap<i64, ExamQuestion>,
}

impl QuestionBank {
    pub fn new(questions: Vec<ExamQuestion>) -> Self {
        let mut map = BTreeMap::new();
        for q in questions {
            if map.contains_key(&q.question_id) {
                tracing::warn!(
                    question_id = q.question_id,
                    "Duplicate question id, keeping the later record"
                );
            }
            map.insert(q.question_id, q);
        }
        Self { questions: map }
    }

    pub fn get(&self, id: i64) -> Option<&ExamQuestion> {
        self.questions.get(&id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.questions.contains_key(&id)
    }

    pub fn first_id(&self) -> Option<i64> {
        self.questions.keys().next().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExamQuestion> {
        self.questions.values()
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Page {
    Start,
    Quiz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Unanswered,
    Correct,
    Wrong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavOutcome {
    Moved,
    /// Every question has been visited; the caller shows a completion notice.
    Completed,
    AtEnd,
    AtStart,
    UnknownQuestion,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("no question is currently selected")]
    NoCurrentQuestion,
    #[error("this question has already been answered")]
    AlreadySubmitted,
    #[error("select at least one choice")]
    Empty,
    #[error("select exactly {expected} choice(s), got {actual}")]
    WrongCount { expected: usize, actual: usize },
    #[error("unknown choice: {0}")]
    UnknownChoice(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuizSession {
    pub page: Page,
    pub history: Vec<i64>,
    pub current_index: Option<usize>,
    pub answer_submitted: bool,
    pub user_answers: Vec<String>,
    pub all_user_answers: BTreeMap<i64, Vec<String>>,
    pub answered_ids: BTreeSet<i64>,
    pub wrong_answer_ids: BTreeSet<i64>,
    pub review_mode: bool,
    pub review_history: Vec<i64>,
    pub flagged_questions: Vec<i64>,
}

impl Default for QuizSession {
    fn default() -> Self {
        Self::new()
    }
}

impl QuizSession {
    pub fn new() -> Self {
        Self {
            page: Page::Start,
            history: Vec::new(),
            current_index: None,
            answer_submitted: false,
            user_answers: Vec::new(),
            all_user_answers: BTreeMap::new(),
            answered_ids: BTreeSet::new(),
            wrong_answer_ids: BTreeSet::new(),
            review_mode: false,
            review_history: Vec::new(),
            flagged_questions: Vec::new(),
        }
    }

    fn active_list(&self) -> &[i64] {
        if self.review_mode {
            &self.review_history
        } else {
            &self.history
        }
    }

    pub fn current_question_id(&self) -> Option<i64> {
        if self.page != Page::Quiz {
            return None;
        }
        let idx = self.current_index?;
        self.active_list().get(idx).copied()
    }

    pub fn status_of(&self, id: i64) -> QuestionStatus {
        if self.wrong_answer_ids.contains(&id) {
            QuestionStatus::Wrong
        } else if self.answered_ids.contains(&id) {
            QuestionStatus::Correct
        } else {
            QuestionStatus::Unanswered
        }
    }

    /// Whether a "next" step is available from the current position.
    pub fn has_next(&self, bank: &QuestionBank) -> bool {
        let Some(idx) = self.current_index else {
            return false;
        };
        let is_last = idx + 1 >= self.active_list().len();
        !is_last || (!self.review_mode && self.history.len() < bank.len())
    }

    pub fn begin(self, bank: &QuestionBank) -> (Self, NavOutcome) {
        match bank.first_id() {
            Some(first) => self.go_to(bank, first),
            None => (self, NavOutcome::Unchanged),
        }
    }

    pub fn go_to(mut self, bank: &QuestionBank, id: i64) -> (Self, NavOutcome) {
        if !bank.contains(id) {
            return (self, NavOutcome::UnknownQuestion);
        }
        self.page = Page::Quiz;
        self.review_mode = false;
        self.answer_submitted = self.answered_ids.contains(&id);
        let idx = match self.history.iter().position(|h| *h == id) {
            Some(idx) => idx,
            None => {
                self.history.push(id);
                self.history.len() - 1
            }
        };
        self.current_index = Some(idx);
        self.user_answers = self.all_user_answers.get(&id).cloned().unwrap_or_default();
        (self, NavOutcome::Moved)
    }

    /// Records an answer for the current question.
    ///
    /// Rejections leave the session untouched. On success returns whether the
    /// selection set equals the correct set.
    pub fn submit_answer(
        mut self,
        bank: &QuestionBank,
        selections: &[String],
    ) -> (Self, Result<bool, SubmitError>) {
        let question = match self.current_question_id().and_then(|id| bank.get(id)) {
            Some(q) => q,
            None => return (self, Err(SubmitError::NoCurrentQuestion)),
        };
        if self.answer_submitted {
            return (self, Err(SubmitError::AlreadySubmitted));
        }

        let mut selected: Vec<String> = selections
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        selected.sort();
        selected.dedup();

        if selected.is_empty() {
            return (self, Err(SubmitError::Empty));
        }
        if let Some(unknown) = selected.iter().find(|s| !question.choices.contains_key(*s)) {
            let unknown = unknown.clone();
            return (self, Err(SubmitError::UnknownChoice(unknown)));
        }
        let expected = question.correct_count().max(1);
        if selected.len() != expected {
            let actual = selected.len();
            return (self, Err(SubmitError::WrongCount { expected, actual }));
        }

        let id = question.question_id;
        let correct = selected == question.correct_keys();
        let doubtful = question.verdict().map(|v| v.is_doubtful()).unwrap_or(false);

        self.all_user_answers.insert(id, selected.clone());
        self.user_answers = selected;
        self.answer_submitted = true;
        self.answered_ids.insert(id);
        if correct {
            self.wrong_answer_ids.remove(&id);
        } else {
            self.wrong_answer_ids.insert(id);
        }
        if doubtful && !self.flagged_questions.contains(&id) {
            self.flagged_questions.push(id);
        }
        (self, Ok(correct))
    }

    pub fn next(mut self, bank: &QuestionBank) -> (Self, NavOutcome) {
        let Some(idx) = self.current_index.filter(|_| self.page == Page::Quiz) else {
            return (self, NavOutcome::Unchanged);
        };

        if idx + 1 < self.active_list().len() {
            self.current_index = Some(idx + 1);
        } else if !self.review_mode {
            let unseen = bank.iter().map(|q| q.question_id).find(|id| !self.history.contains(id));
            match unseen {
                Some(id) => {
                    self.history.push(id);
                    self.current_index = Some(self.history.len() - 1);
                }
                None => return (self, NavOutcome::Completed),
            }
        } else {
            return (self, NavOutcome::AtEnd);
        }

        self.answer_submitted = false;
        self.user_answers.clear();
        (self, NavOutcome::Moved)
    }

    pub fn previous(mut self) -> (Self, NavOutcome) {
        let idx = match self.current_index {
            Some(idx) if idx > 0 && self.page == Page::Quiz => idx - 1,
            _ => return (self, NavOutcome::AtStart),
        };
        self.current_index = Some(idx);
        if let Some(id) = self.current_question_id() {
            self.answer_submitted = self.answered_ids.contains(&id);
            self.user_answers = self.all_user_answers.get(&id).cloned().unwrap_or_default();
        }
        (self, NavOutcome::Moved)
    }

    /// Switches to a shuffled pass over the wrongly answered questions.
    pub fn start_review<R: Rng + ?Sized>(mut self, rng: &mut R) -> (Self, NavOutcome) {
        if self.wrong_answer_ids.is_empty() {
            return (self, NavOutcome::Unchanged);
        }
        let mut review: Vec<i64> = self.wrong_answer_ids.iter().copied().collect();
        review.shuffle(rng);
        self.page = Page::Quiz;
        self.review_mode = true;
        self.review_history = review;
        self.current_index = Some(0);
        self.answer_submitted = false;
        self.user_answers.clear();
        (self, NavOutcome::Moved)
    }
}
