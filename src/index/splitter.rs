//! Recursive character splitting with overlap.
//!
//! Text is split on the first separator that occurs in it; pieces that are
//! still too long are split again with the remaining separators. Adjacent
//! small pieces are merged back up to `chunk_size` characters, carrying up to
//! `chunk_overlap` characters from the end of one chunk into the next.

use std::collections::VecDeque;

pub const DEFAULT_SEPARATORS: [&str; 6] = ["\n\n", "\n", "。", "、", " ", ""];

#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &self.separators)
    }

    fn split_with(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut remaining: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = "";
                break;
            }
            if text.contains(sep.as_str()) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut small: Vec<String> = Vec::new();
        for piece in split_keep_separator(text, separator) {
            if char_len(&piece) < self.chunk_size {
                small.push(piece);
                continue;
            }
            if !small.is_empty() {
                chunks.extend(self.merge(&small));
                small.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_with(&piece, remaining));
            }
        }
        if !small.is_empty() {
            chunks.extend(self.merge(&small));
        }
        chunks
    }

    fn merge(&self, pieces: &[String]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !current.is_empty() {
                push_joined(&mut docs, &current);
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match current.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }
            current.push_back(piece);
            total += len;
        }
        push_joined(&mut docs, &current);
        docs
    }
}

fn push_joined(docs: &mut Vec<String>, current: &VecDeque<&str>) {
    let joined: String = current.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

/// Splits so that each separator stays at the start of the piece that follows it.
fn split_keep_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(|c| c.to_string()).collect();
    }
    let mut pieces = Vec::new();
    let mut last = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > last {
            pieces.push(text[last..idx].to_string());
        }
        last = idx;
    }
    pieces.push(text[last..].to_string());
    pieces.retain(|p| !p.is_empty());
    pieces
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let splitter = TextSplitter::new(100, 10);
        assert_eq!(splitter.split("  hello world  "), vec!["hello world"]);
    }

    #[test]
    fn chunks_respect_size_limit() {
        let splitter = TextSplitter::new(40, 10);
        let text = "Data streams ingest records.\n\nIdentity resolution unifies profiles across sources.\nSegments target audiences. Activations publish segments.";
        let chunks = splitter.split(text);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 40), "{:?}", chunks);
    }

    #[test]
    fn japanese_sentences_split_on_full_stop() {
        let splitter = TextSplitter::new(12, 0);
        let chunks = splitter.split("データを取り込みます。プロファイルを統合します。");
        assert_eq!(chunks[0], "データを取り込みます");
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= 12), "{:?}", chunks);
    }

    #[test]
    fn overlap_repeats_tail_words() {
        let splitter = TextSplitter::new(20, 8);
        let chunks = splitter.split("alpha beta gamma delta epsilon zeta eta theta");
        assert!(chunks.len() >= 2);
        let first_tail = chunks[0].split_whitespace().last().unwrap().to_string();
        assert!(chunks[1].contains(&first_tail), "{:?}", chunks);
    }

    #[test]
    fn unbreakable_text_falls_back_to_characters() {
        let splitter = TextSplitter::new(5, 0);
        let chunks = splitter.split("abcdefghijkl");
        assert_eq!(chunks, vec!["abcde", "fghij", "kl"]);
    }
}
