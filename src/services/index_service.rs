use crate::error::{Error, Result};
use crate::index::bm25::Bm25Index;
use crate::index::dense::FlatL2Index;
use crate::index::splitter::TextSplitter;
use crate::index::tokenizer::tokenize;
use crate::index::KnowledgeIndex;
use crate::models::document::{DocumentChunk, SourceDocument};
use crate::services::embed_service::EmbedService;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
    pub batch_delay: Duration,
}

/// Documents with textual content from every readable YAML file in `paths`.
pub fn load_documents(paths: &[PathBuf]) -> Vec<SourceDocument> {
    let mut docs = Vec::new();
    for path in paths {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Document file not found, skipping");
            continue;
        }
        match read_documents(path) {
            Ok(found) => {
                let before = docs.len();
                docs.extend(found.into_iter().filter(|d| d.body().is_some()));
                tracing::info!(
                    path = %path.display(),
                    documents = docs.len() - before,
                    "Loaded documents"
                );
            }
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "Unreadable document file, skipping"
            ),
        }
    }
    docs
}

/// Reads a document list, tolerating entries that are not documents.
fn read_documents(path: &Path) -> Result<Vec<SourceDocument>> {
    let text = std::fs::read_to_string(path)?;
    let value: serde_yaml::Value = serde_yaml::from_str(&text)?;
    let serde_yaml::Value::Sequence(items) = value else {
        return Err(Error::BadRequest(format!(
            "{} does not contain a document list",
            path.display()
        )));
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_yaml::from_value::<SourceDocument>(item).ok())
        .collect())
}

pub fn build_chunks(docs: &[SourceDocument], splitter: &TextSplitter) -> Vec<DocumentChunk> {
    docs.iter()
        .filter_map(|doc| doc.body().map(|body| (doc, body)))
        .flat_map(|(doc, body)| {
            splitter
                .split(body)
                .into_iter()
                .map(move |fragment| DocumentChunk::from_fragment(doc, &fragment))
        })
        .collect()
}

/// Embeds chunks batch by batch. Chunks of a failed batch are dropped.
pub async fn embed_chunks(
    embedder: &EmbedService,
    chunks: Vec<DocumentChunk>,
    batch_size: usize,
    batch_delay: Duration,
) -> (Vec<DocumentChunk>, Vec<Vec<f32>>) {
    let total = chunks.len();
    let mut kept = Vec::with_capacity(total);
    let mut vectors = Vec::with_capacity(total);
    let mut done = 0;

    for batch in chunks.chunks(batch_size.max(1)) {
        tokio::time::sleep(batch_delay).await;
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        done += batch.len();
        match embedder.embed_texts(&texts).await {
            Ok(embedded) if embedded.len() == batch.len() => {
                kept.extend(batch.iter().cloned());
                vectors.extend(embedded);
                tracing::info!(done, total, "Embedded batch");
            }
            Ok(embedded) => tracing::warn!(
                expected = batch.len(),
                got = embedded.len(),
                "Embedding count mismatch, dropping batch"
            ),
            Err(e) => tracing::warn!(
                error = %e,
                size = batch.len(),
                "Embedding batch failed, dropping it"
            ),
        }
    }
    (kept, vectors)
}

/// Builds both indices over the same chunk order.
pub fn build_index(chunks: Vec<DocumentChunk>, vectors: Vec<Vec<f32>>) -> Result<KnowledgeIndex> {
    let dimension = vectors
        .first()
        .map(Vec::len)
        .ok_or_else(|| Error::Index("no vectors to index".to_string()))?;
    let mut dense = FlatL2Index::new(dimension);
    dense.add(vectors)?;
    let corpus: Vec<Vec<String>> = chunks.iter().map(|c| tokenize(&c.text)).collect();
    let sparse = Bm25Index::new(&corpus);
    KnowledgeIndex::new(chunks, dense, sparse)
}

/// Load, split, embed, index and persist to `out_dir`.
pub async fn vectorize(
    embedder: &EmbedService,
    inputs: &[PathBuf],
    options: &IndexOptions,
    out_dir: &Path,
) -> Result<KnowledgeIndex> {
    let docs = load_documents(inputs);
    if docs.is_empty() {
        return Err(Error::NotFound("no documents with content in the input files".to_string()));
    }
    let splitter = TextSplitter::new(options.chunk_size, options.chunk_overlap);
    let chunks = build_chunks(&docs, &splitter);
    tracing::info!(documents = docs.len(), chunks = chunks.len(), "Split documents");

    let (chunks, vectors) =
        embed_chunks(embedder, chunks, options.batch_size, options.batch_delay).await;
    if chunks.is_empty() {
        return Err(Error::Upstream("every embedding batch failed".to_string()));
    }
    let index = build_index(chunks, vectors)?;
    index.save(out_dir)?;
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::embed_service::MockEmbeddingModel;
    use crate::utils::retry::RetryPolicy;
    use std::sync::Arc;

    fn doc(title: &str, content: Option<&str>) -> SourceDocument {
        SourceDocument {
            url: Some(format!("https://help.example.com/{}", title)),
            title: Some(title.to_string()),
            content: content.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn documents_without_content_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.yaml");
        std::fs::write(
            &path,
            "- title: A\n  url: https://a\n  content: Alpha text\n- title: B\n  content: ''\n- just a string\n",
        )
        .unwrap();
        let missing = dir.path().join("missing.yaml");

        let docs = load_documents(&[missing, path]);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title(), "A");
    }

    #[test]
    fn chunks_carry_document_metadata() {
        let splitter = TextSplitter::new(1000, 100);
        let docs = [doc("ir", Some("Identity resolution.")), doc("none", None)];
        let chunks = build_chunks(&docs, &splitter);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source, "https://help.example.com/ir");
        assert!(chunks[0].text.ends_with("Identity resolution."));
    }

    #[tokio::test]
    async fn failed_batches_are_dropped() {
        let mut mock = MockEmbeddingModel::new();
        let mut call = 0;
        mock.expect_embed().times(3).returning(move |texts| {
            call += 1;
            if call == 2 {
                Err(crate::error::Error::Upstream("quota".into()))
            } else {
                Ok(texts.iter().map(|_| vec![call as f32, 0.0]).collect())
            }
        });
        let embedder = EmbedService::new(Arc::new(mock), RetryPolicy::none(), Duration::ZERO);
        let chunks: Vec<DocumentChunk> = (0..5)
            .map(|i| DocumentChunk::from_fragment(&doc("d", Some("x")), &format!("part {}", i)))
            .collect();

        let (kept, vectors) = embed_chunks(&embedder, chunks, 2, Duration::ZERO).await;
        assert_eq!(kept.len(), 3);
        assert_eq!(vectors.len(), 3);
        assert!(kept[2].text.ends_with("part 4"));

        let index = build_index(kept, vectors).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.dense.dimension(), 2);
    }

    #[test]
    fn empty_vectors_cannot_be_indexed() {
        assert!(matches!(build_index(Vec::new(), Vec::new()), Err(Error::Index(_))));
    }
}
