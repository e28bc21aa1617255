use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamQuestion {
    pub question_id: i64,
    pub question_text: String,
    #[serde(default)]
    pub choices: BTreeMap<String, String>,
    #[serde(default)]
    pub correct_answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub japanese_explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<AiAnalysis>,
}

impl ExamQuestion {
    /// Correct choice letters, sorted and deduplicated.
    pub fn correct_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .correct_answer
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn correct_count(&self) -> usize {
        self.correct_keys().len()
    }

    /// `"B. text, D. text"` for prompts and feedback.
    pub fn correct_answer_display(&self) -> String {
        self.correct_keys()
            .iter()
            .map(|key| {
                let text = self
                    .choices
                    .get(key)
                    .map(String::as_str)
                    .unwrap_or("(unknown choice)");
                format!("{}. {}", key, text)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn correct_answer_texts(&self) -> Vec<String> {
        self.correct_keys()
            .iter()
            .filter_map(|key| self.choices.get(key).cloned())
            .collect()
    }

    pub fn verdict(&self) -> Option<Verdict> {
        self.ai_analysis
            .as_ref()
            .map(|analysis| analysis.ai_verification.status)
    }

    /// Unanalysed questions and ones whose last analysis errored are picked up again.
    pub fn needs_verification(&self) -> bool {
        matches!(self.verdict(), None | Some(Verdict::Error))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AiAnalysis {
    #[serde(default)]
    pub related_docs: Vec<RelatedDoc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_docs: Vec<ExcludedDoc>,
    #[serde(default)]
    pub ai_verification: AiVerification,
}

impl AiAnalysis {
    pub fn error(justification: impl Into<String>) -> Self {
        Self {
            related_docs: Vec::new(),
            excluded_docs: Vec::new(),
            ai_verification: AiVerification {
                status: Verdict::Error,
                justification: justification.into(),
            },
        }
    }

    pub fn indeterminate(justification: impl Into<String>) -> Self {
        Self {
            related_docs: Vec::new(),
            excluded_docs: Vec::new(),
            ai_verification: AiVerification {
                status: Verdict::Indeterminate,
                justification: justification.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RelatedDoc {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub supporting_text: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExcludedDoc {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AiVerification {
    #[serde(default)]
    pub status: Verdict,
    #[serde(default)]
    pub justification: String,
}

/// Outcome of checking a declared answer against retrieved reference text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Verdict {
    Matches,
    PossibleContradiction,
    #[default]
    Indeterminate,
    Error,
}

const NO_CONTRADICTION: [&str; 4] = ["矛盾なし", "矛盾はない", "矛盾しない", "矛盾はありません"];

impl Verdict {
    pub fn code(&self) -> &'static str {
        match self {
            Verdict::Matches => "一致",
            Verdict::PossibleContradiction => "矛盾の可能性あり",
            Verdict::Indeterminate => "判断不能",
            Verdict::Error => "エラー",
        }
    }

    /// Maps free-form model output onto the closed set; unknown text is `Indeterminate`.
    pub fn from_model_text(raw: &str) -> Self {
        let text = raw.trim();
        let lower = text.to_lowercase();
        let exact = [
            Verdict::Matches,
            Verdict::PossibleContradiction,
            Verdict::Indeterminate,
            Verdict::Error,
        ]
        .into_iter()
        .find(|v| v.code() == text);
        if let Some(verdict) = exact {
            return verdict;
        }
        if NO_CONTRADICTION.iter().any(|n| text.contains(n))
            || lower.contains("no contradiction")
            || lower.contains("not contradict")
        {
            return Verdict::Matches;
        }
        if text.contains("エラー") || lower == "error" || lower == "format_error" {
            Verdict::Error
        } else if text.contains("矛盾") || lower.contains("contradict") {
            Verdict::PossibleContradiction
        } else if text.contains("判断不能") || lower.contains("indeterminate") {
            Verdict::Indeterminate
        } else if text.contains("一致") || lower == "matches" || lower == "match" {
            Verdict::Matches
        } else {
            Verdict::Indeterminate
        }
    }

    /// Verdicts a student should double-check against the official docs.
    pub fn is_doubtful(&self) -> bool {
        matches!(self, Verdict::PossibleContradiction | Verdict::Indeterminate)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for Verdict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for Verdict {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Verdict::from_model_text(&raw))
    }
}
