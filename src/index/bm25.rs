//! Okapi BM25 over pre-tokenized documents.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const K1: f64 = 1.5;
const B: f64 = 0.75;
const EPSILON: f64 = 0.25;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Index {
    k1: f64,
    b: f64,
    avgdl: f64,
    doc_len: Vec<usize>,
    doc_freqs: Vec<HashMap<String, usize>>,
    idf: HashMap<String, f64>,
}

impl Bm25Index {
    pub fn new(corpus: &[Vec<String>]) -> Self {
        let mut doc_len = Vec::with_capacity(corpus.len());
        let mut doc_freqs = Vec::with_capacity(corpus.len());
        let mut containing: HashMap<String, usize> = HashMap::new();

        for doc in corpus {
            doc_len.push(doc.len());
            let mut freqs: HashMap<String, usize> = HashMap::new();
            for token in doc {
                *freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for token in freqs.keys() {
                *containing.entry(token.clone()).or_insert(0) += 1;
            }
            doc_freqs.push(freqs);
        }

        let total_len: usize = doc_len.iter().sum();
        let avgdl = if corpus.is_empty() {
            0.0
        } else {
            total_len as f64 / corpus.len() as f64
        };

        let n = corpus.len() as f64;
        let mut idf = HashMap::with_capacity(containing.len());
        let mut idf_sum = 0.0;
        let mut negative = Vec::new();
        for (token, df) in containing {
            let df = df as f64;
            let value = (n - df + 0.5).ln() - (df + 0.5).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(token.clone());
            }
            idf.insert(token, value);
        }
        if !idf.is_empty() {
            // Terms present in most documents would otherwise score negatively.
            let floor = EPSILON * (idf_sum / idf.len() as f64);
            for token in negative {
                idf.insert(token, floor);
            }
        }

        Self {
            k1: K1,
            b: B,
            avgdl,
            doc_len,
            doc_freqs,
            idf,
        }
    }

    pub fn len(&self) -> usize {
        self.doc_len.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_len.is_empty()
    }

    /// One score per document, in corpus order.
    pub fn scores(&self, query: &[String]) -> Vec<f64> {
        let mut scores = vec![0.0; self.len()];
        if self.avgdl == 0.0 {
            return scores;
        }
        for token in query {
            let Some(idf) = self.idf.get(token) else {
                continue;
            };
            for (i, freqs) in self.doc_freqs.iter().enumerate() {
                let tf = *freqs.get(token).unwrap_or(&0) as f64;
                if tf == 0.0 {
                    continue;
                }
                let norm = 1.0 - self.b + self.b * self.doc_len[i] as f64 / self.avgdl;
                scores[i] += idf * (tf * (self.k1 + 1.0)) / (tf + self.k1 * norm);
            }
        }
        scores
    }

    /// Document positions of the `n` highest scores, best first, ties by position.
    pub fn top_n(&self, query: &[String], n: usize) -> Vec<usize> {
        let scores = self.scores(query);
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|a, b| {
            scores[*b]
                .partial_cmp(&scores[*a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order.truncate(n);
        order
    }
}
