use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::glossary::GlossaryEntry;
use crate::utils::retry::{retry, RetryPolicy};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

pub const NO_EXPLANATION: &str = "（解説なし）";
pub const TRANSLATION_FAILED: &str = "（翻訳失敗）";

/// Glossary entries quoted in translation prompts.
const GLOSSARY_PROMPT_LIMIT: usize = 50;

/// A text-generation backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Chat model behind an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiCompatibleModel {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleModel {
    pub fn new(client: Client, api_base: &str, api_key: &str, model: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    async fn chat(&self, payload: JsonValue) -> Result<String> {
        let res = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!("model API error {}: {}", status, text)));
        }

        let body: JsonValue = res.json().await?;
        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::Upstream("empty response from model API".to_string()))
    }
}

#[async_trait]
impl GenerativeModel for OpenAiCompatibleModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let payload = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.2
        });
        self.chat(payload).await
    }
}

/// Model calls with pacing and retries applied.
#[derive(Clone)]
pub struct AIService {
    model: Arc<dyn GenerativeModel>,
    policy: RetryPolicy,
    dispatch_delay: Duration,
}

impl AIService {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        policy: RetryPolicy,
        dispatch_delay: Duration,
    ) -> Self {
        Self {
            model,
            policy,
            dispatch_delay,
        }
    }

    /// Builds a service for `model_name` from the API settings in `config`.
    pub fn from_config(config: &Config, client: Client, model_name: &str) -> Result<Self> {
        let api_key = config.require_api_key()?;
        let model = OpenAiCompatibleModel::new(client, &config.llm_api_base, api_key, model_name);
        Ok(Self::new(
            Arc::new(model),
            RetryPolicy::linear(config.max_retries, Duration::from_secs(1)),
            config.request_delay(),
        ))
    }

    pub async fn generate_with_retry(&self, prompt: &str) -> Result<String> {
        let model = self.model.clone();
        let delay = self.dispatch_delay;
        retry(self.policy, "generate", |_| {
            let model = model.clone();
            async move {
                tokio::time::sleep(delay).await;
                model.generate(prompt).await
            }
        })
        .await
        .map_err(|e| Error::Upstream(e.to_string()))
    }

    /// Japanese rendering of an English explanation.
    ///
    /// Never fails: a missing explanation yields a placeholder and a failed
    /// call yields a marker followed by the original text.
    pub async fn translate_explanation(&self, explanation: Option<&str>, glossary: &str) -> String {
        let Some(explanation) = explanation.map(str::trim).filter(|e| !e.is_empty()) else {
            return NO_EXPLANATION.to_string();
        };
        let prompt = build_translation_prompt(explanation, glossary);
        match self.generate_with_retry(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Translation failed, keeping the original explanation");
                format!("{}\n{}", TRANSLATION_FAILED, explanation)
            }
        }
    }
}

/// `- en_term: ja_term` lines for the first entries of the glossary.
pub fn glossary_prompt_block(entries: &[GlossaryEntry]) -> String {
    entries
        .iter()
        .take(GLOSSARY_PROMPT_LIMIT)
        .map(|e| format!("- {}: {}", e.en_term, e.ja_term))
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_translation_prompt(explanation: &str, glossary: &str) -> String {
    format!(
        "You are a professional technical translator for certification exam material.\n\
Translate the English explanation below into natural, precise Japanese.\n\
\n\
# Rules\n\
- Use the terminology list for product terms.\n\
- Output only the translation. No notes, footnote markers or commentary.\n\
- Keep the logical structure of the original.\n\
\n\
# Terminology\n\
{}\n\
\n\
# English explanation\n\
{}\n\
\n\
# Japanese translation\n",
        glossary, explanation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::*;

    fn service(mock: MockGenerativeModel, attempts: u32) -> AIService {
        AIService::new(
            Arc::new(mock),
            RetryPolicy::fixed(attempts, Duration::ZERO),
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn retries_then_returns_text() {
        let mut mock = MockGenerativeModel::new();
        let mut calls = 0;
        mock.expect_generate().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(Error::Upstream("rate limited".into()))
            } else {
                Ok("done".into())
            }
        });
        let ai = service(mock, 3);
        assert_eq!(ai.generate_with_retry("hi").await.unwrap(), "done");
    }

    #[tokio::test]
    async fn missing_explanation_skips_the_call() {
        let mut mock = MockGenerativeModel::new();
        mock.expect_generate().never();
        let ai = service(mock, 3);
        assert_eq!(ai.translate_explanation(None, "").await, NO_EXPLANATION);
        assert_eq!(ai.translate_explanation(Some("  "), "").await, NO_EXPLANATION);
    }

    #[tokio::test]
    async fn failed_translation_keeps_original() {
        let mut mock = MockGenerativeModel::new();
        mock.expect_generate()
            .with(function(|p: &str| p.contains("- Segment: セグメント")))
            .times(2)
            .returning(|_| Err(Error::Upstream("down".into())));
        let ai = service(mock, 2);
        let glossary = glossary_prompt_block(&[GlossaryEntry {
            en_term: "Segment".into(),
            ja_term: "セグメント".into(),
            ..Default::default()
        }]);
        let out = ai.translate_explanation(Some("Segments group profiles."), &glossary).await;
        assert_eq!(out, format!("{}\nSegments group profiles.", TRANSLATION_FAILED));
    }

    #[test]
    fn glossary_block_is_capped() {
        let entries: Vec<GlossaryEntry> = (0..60)
            .map(|i| GlossaryEntry {
                en_term: format!("term{}", i),
                ja_term: format!("用語{}", i),
                ..Default::default()
            })
            .collect();
        let block = glossary_prompt_block(&entries);
        assert_eq!(block.lines().count(), GLOSSARY_PROMPT_LIMIT);
        assert!(block.starts_with("- term0: 用語0"));
    }
}
