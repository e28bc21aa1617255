use crate::config::Config;
use crate::error::{Error, Result};
use crate::utils::retry::{retry, RetryPolicy};
use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// A text-embedding backend. Returns one vector per input, in input order.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embeddings behind an OpenAI-compatible `/embeddings` endpoint.
#[derive(Clone)]
pub struct OpenAiCompatibleEmbedder {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleEmbedder {
    pub fn new(client: Client, api_base: &str, api_key: &str, model: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiCompatibleEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        #[derive(serde::Serialize)]
        struct EmbReq<'a> {
            model: &'a str,
            input: &'a [String],
        }
        #[derive(serde::Deserialize)]
        struct EmbData {
            index: Option<usize>,
            embedding: Vec<f32>,
        }
        #[derive(serde::Deserialize)]
        struct EmbResp {
            data: Vec<EmbData>,
        }

        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = EmbReq {
            model: &self.model,
            input: texts,
        };
        let resp = self
            .client
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .context("embeddings request failed")?;

        let status = resp.status();
        let txt = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::Upstream(format!(
                "embeddings status {}: {}",
                status.as_u16(),
                txt
            )));
        }
        let mut parsed: EmbResp = serde_json::from_str(&txt).context("embeddings parse failed")?;
        parsed.data.sort_by_key(|d| d.index.unwrap_or(0));
        if parsed.data.len() != texts.len() {
            return Err(Error::Upstream(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Paced, retried access to an [`EmbeddingModel`].
#[derive(Clone)]
pub struct EmbedService {
    model: Arc<dyn EmbeddingModel>,
    policy: RetryPolicy,
    dispatch_delay: Duration,
}

impl EmbedService {
    pub fn new(
        model: Arc<dyn EmbeddingModel>,
        policy: RetryPolicy,
        dispatch_delay: Duration,
    ) -> Self {
        Self {
            model,
            policy,
            dispatch_delay,
        }
    }

    pub fn from_config(config: &Config, client: Client) -> Result<Self> {
        let api_key = config.require_api_key()?;
        let model = OpenAiCompatibleEmbedder::new(
            client,
            &config.llm_api_base,
            api_key,
            &config.embedding_model,
        );
        Ok(Self::new(
            Arc::new(model),
            RetryPolicy::linear(config.max_retries, Duration::from_secs(1)),
            config.request_delay(),
        ))
    }

    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.model.clone();
        let delay = self.dispatch_delay;
        retry(self.policy, "embed", |_| {
            let model = model.clone();
            async move {
                tokio::time::sleep(delay).await;
                model.embed(texts).await
            }
        })
        .await
        .map_err(|e| Error::Upstream(e.to_string()))
    }

    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_texts(&[query.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::Upstream("no embedding returned for query".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn query_embedding_is_single_vector() {
        let mut mock = MockEmbeddingModel::new();
        mock.expect_embed()
            .times(1)
            .returning(|texts| Ok(texts.iter().map(|t| vec![t.len() as f32]).collect()));
        let service = EmbedService::new(Arc::new(mock), RetryPolicy::none(), Duration::ZERO);
        assert_eq!(service.embed_query("abc").await.unwrap(), vec![3.0]);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_upstream_error() {
        let mut mock = MockEmbeddingModel::new();
        mock.expect_embed()
            .times(2)
            .returning(|_| Err(Error::Upstream("quota".into())));
        let service = EmbedService::new(
            Arc::new(mock),
            RetryPolicy::fixed(2, Duration::ZERO),
            Duration::ZERO,
        );
        let err = service.embed_texts(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::Upstream(msg) if msg.contains("quota")));
    }
}
