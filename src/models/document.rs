use serde::{Deserialize, Serialize};

/// A scraped article or PDF section, as stored in the documentation YAML files.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_document: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl SourceDocument {
    pub fn source(&self) -> &str {
        self.url
            .as_deref()
            .or(self.source_document.as_deref())
            .unwrap_or("N/A")
    }

    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or("N/A")
    }

    /// Non-empty textual content, if any.
    pub fn body(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.trim().is_empty())
    }
}

/// The unit of retrieval. Position in the chunk list is the row id in both indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub text: String,
    pub source: String,
    pub title: String,
}

impl DocumentChunk {
    pub fn from_fragment(doc: &SourceDocument, fragment: &str) -> Self {
        let source = doc.source().to_string();
        let title = doc.title().to_string();
        Self {
            text: format!("Source: {}\nTitle: {}\n\n{}", source, title, fragment),
            source,
            title,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_carries_source_prefix() {
        let doc = SourceDocument {
            url: None,
            source_document: Some("guide.pdf".into()),
            title: Some("Identity Resolution".into()),
            content: Some("body".into()),
        };
        let chunk = DocumentChunk::from_fragment(&doc, "Match rules link profiles.");
        assert_eq!(chunk.source, "guide.pdf");
        assert!(chunk.text.starts_with("Source: guide.pdf\nTitle: Identity Resolution\n\n"));
        assert!(chunk.text.ends_with("Match rules link profiles."));
    }

    #[test]
    fn blank_content_has_no_body() {
        let doc = SourceDocument {
            content: Some("   ".into()),
            ..Default::default()
        };
        assert!(doc.body().is_none());
        assert_eq!(doc.source(), "N/A");
    }
}
