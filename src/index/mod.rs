pub mod bm25;
pub mod dense;
pub mod splitter;
pub mod tokenizer;

use crate::error::{Error, Result};
use crate::models::document::DocumentChunk;
use bm25::Bm25Index;
use dense::FlatL2Index;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

pub const CHUNKS_FILE: &str = "chunks.json";
pub const DENSE_FILE: &str = "dense_index.json";
pub const SPARSE_FILE: &str = "bm25_index.json";

/// Chunk metadata plus the two indices built over it.
///
/// Row `i` of `dense` and document `i` of `sparse` both refer to `chunks[i]`.
#[derive(Debug, Clone)]
pub struct KnowledgeIndex {
    pub chunks: Vec<DocumentChunk>,
    pub dense: FlatL2Index,
    pub sparse: Bm25Index,
}

impl KnowledgeIndex {
    pub fn new(chunks: Vec<DocumentChunk>, dense: FlatL2Index, sparse: Bm25Index) -> Result<Self> {
        let index = Self {
            chunks,
            dense,
            sparse,
        };
        index.validate()?;
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn validate(&self) -> Result<()> {
        let (chunks, rows, docs) = (self.chunks.len(), self.dense.len(), self.sparse.len());
        if chunks != rows || chunks != docs {
            return Err(Error::Index(format!(
                "chunk count {} does not match dense rows {} and keyword documents {}",
                chunks, rows, docs
            )));
        }
        Ok(())
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        write_json(&dir.join(CHUNKS_FILE), &self.chunks)?;
        write_json(&dir.join(DENSE_FILE), &self.dense)?;
        write_json(&dir.join(SPARSE_FILE), &self.sparse)?;
        tracing::info!(dir = %dir.display(), chunks = self.chunks.len(), "Saved knowledge index");
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        for name in [CHUNKS_FILE, DENSE_FILE, SPARSE_FILE] {
            let path = dir.join(name);
            if !path.exists() {
                return Err(Error::NotFound(format!(
                    "index file {} (run the vectorize command first)",
                    path.display()
                )));
            }
        }
        let chunks: Vec<DocumentChunk> = read_json(&dir.join(CHUNKS_FILE))?;
        let dense: FlatL2Index = read_json(&dir.join(DENSE_FILE))?;
        let sparse: Bm25Index = read_json(&dir.join(SPARSE_FILE))?;
        let index = Self::new(chunks, dense, sparse)?;
        tracing::info!(dir = %dir.display(), chunks = index.len(), "Loaded knowledge index");
        Ok(index)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec(value)?;
    std::fs::write(path, data)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}
