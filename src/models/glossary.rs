use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GlossaryEntry {
    #[serde(default)]
    pub en_term: String,
    #[serde(default)]
    pub ja_term: String,
    #[serde(default)]
    pub en_description: String,
    #[serde(default)]
    pub ja_description: String,
}

impl GlossaryEntry {
    pub fn dedup_key(&self) -> String {
        self.en_term.trim().to_lowercase()
    }
}

/// A single-language term scraped from one glossary page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlossaryTerm {
    pub term: String,
    pub description: String,
}

/// Zips the Japanese and English pages of the same glossary by position.
pub fn pair_terms(ja: &[GlossaryTerm], en: &[GlossaryTerm]) -> Vec<GlossaryEntry> {
    if ja.len() != en.len() {
        tracing::warn!(
            ja = ja.len(),
            en = en.len(),
            "Glossary term counts differ, pairing the first {} entries",
            ja.len().min(en.len())
        );
    }
    ja.iter()
        .zip(en.iter())
        .map(|(ja, en)| GlossaryEntry {
            en_term: en.term.clone(),
            ja_term: ja.term.clone(),
            en_description: en.description.clone(),
            ja_description: ja.description.clone(),
        })
        .collect()
}
