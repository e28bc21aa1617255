use crate::index::tokenizer::tokenize;
use crate::index::KnowledgeIndex;
use crate::models::document::DocumentChunk;
use crate::services::embed_service::EmbedService;
use std::collections::HashSet;
use std::sync::Arc;

/// Dense + keyword retrieval over one [`KnowledgeIndex`].
#[derive(Clone)]
pub struct HybridRetriever {
    index: Arc<KnowledgeIndex>,
    embedder: EmbedService,
    keyword_top_n: usize,
    final_top_k: usize,
}

impl HybridRetriever {
    pub fn new(
        index: Arc<KnowledgeIndex>,
        embedder: EmbedService,
        keyword_top_n: usize,
        final_top_k: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            keyword_top_n,
            final_top_k,
        }
    }

    /// At most `final_top_k` distinct chunks, vector hits first.
    ///
    /// An embedding failure degrades to keyword-only results.
    pub async fn search(&self, query: &str) -> Vec<DocumentChunk> {
        let keyword = self.keyword_candidates(query);
        let vector = match self.vector_candidates(query).await {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!(error = %e, "Vector search failed, using keyword results only");
                Vec::new()
            }
        };
        merge_candidates(vector, keyword, self.final_top_k)
    }

    fn keyword_candidates(&self, query: &str) -> Vec<DocumentChunk> {
        self.index
            .sparse
            .top_n(&tokenize(query), self.keyword_top_n)
            .into_iter()
            .filter_map(|row| self.index.chunks.get(row).cloned())
            .collect()
    }

    async fn vector_candidates(&self, query: &str) -> crate::error::Result<Vec<DocumentChunk>> {
        let vector = self.embedder.embed_query(query).await?;
        let hits = self.index.dense.search(&vector, self.final_top_k)?;
        Ok(hits
            .into_iter()
            .filter_map(|(row, _)| self.index.chunks.get(row).cloned())
            .collect())
    }
}

/// Vector hits then keyword hits, first occurrence of each text kept, truncated to `k`.
pub fn merge_candidates(
    vector: Vec<DocumentChunk>,
    keyword: Vec<DocumentChunk>,
    k: usize,
) -> Vec<DocumentChunk> {
    let mut seen = HashSet::new();
    vector
        .into_iter()
        .chain(keyword)
        .filter(|chunk| seen.insert(chunk.text.clone()))
        .take(k)
        .collect()
}
