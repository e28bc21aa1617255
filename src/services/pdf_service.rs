use crate::error::{Error, Result};
use crate::models::document::SourceDocument;
use pdfium_render::prelude::*;
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Pages searched for a printed table of contents.
const TOC_PAGE_LIMIT: usize = 10;

static RE_TOC_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:Chapter\s+\d+\s*)?([A-Za-z\s,]{5,}|[ぁ-んァ-ン一-龥\s]{5,})\s*\.*")
        .expect("static regex")
});
static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

pub struct PdfService {
    pdfium: Pdfium,
}

impl PdfService {
    /// Binds to a pdfium library next to the executable, or the system one.
    pub fn new() -> Result<Self> {
        let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| Error::Pdf(format!("failed to load the pdfium library: {}", e)))?;
        Ok(Self {
            pdfium: Pdfium::new(bindings),
        })
    }

    /// Sections of every `*.pdf` in `dir`. Unreadable files are logged and skipped.
    pub fn parse_directory(&self, dir: &Path) -> Result<Vec<SourceDocument>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("pdf"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        if files.is_empty() {
            return Err(Error::NotFound(format!("no PDF files in {}", dir.display())));
        }

        let mut sections = Vec::new();
        for path in files {
            match self.parse_pdf(&path) {
                Ok(found) => {
                    tracing::info!(file = %path.display(), sections = found.len(), "Parsed PDF");
                    sections.extend(found);
                }
                Err(e) => {
                    tracing::warn!(
                        file = %path.display(),
                        error = %e,
                        "Failed to parse PDF, skipping"
                    )
                }
            }
        }
        Ok(sections)
    }

    pub fn parse_pdf(&self, path: &Path) -> Result<Vec<SourceDocument>> {
        let document = self
            .pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| Error::Pdf(format!("failed to open {}: {}", path.display(), e)))?;

        let mut pages = Vec::new();
        for page in document.pages().iter() {
            let text = page
                .text()
                .map_err(|e| Error::Pdf(format!("failed to read page text: {}", e)))?;
            pages.push(text.all());
        }

        let mut titles: Vec<String> = document
            .bookmarks()
            .iter()
            .filter_map(|bookmark| bookmark.title())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if titles.is_empty() {
            tracing::debug!(file = %path.display(), "No bookmarks, reading the contents page");
            titles = toc_from_text(&pages);
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document.pdf");
        Ok(structure_sections(&pages.join("\n"), &titles, file_name))
    }
}

/// Section titles from a printed contents page within the first pages.
pub fn toc_from_text(pages: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut titles = Vec::new();
    for text in pages.iter().take(TOC_PAGE_LIMIT) {
        if !(text.to_uppercase().contains("CONTENTS") || text.contains("目次")) {
            continue;
        }
        for line in text.lines() {
            let Some(cap) = RE_TOC_LINE.captures(line) else {
                continue;
            };
            let title = cap[1].trim();
            let is_heading = title.eq_ignore_ascii_case("contents");
            let is_number = title.chars().all(|c| c.is_ascii_digit());
            let long_enough = title.chars().count() > 4;
            if !is_heading && long_enough && !is_number && seen.insert(title.to_string()) {
                titles.push(title.to_string());
            }
        }
    }
    titles
}

/// Splits `full_text` at lines matching one of `titles`.
///
/// Text before the first title becomes an "Introduction" section. Without
/// titles the whole text is one section named after the file.
pub fn structure_sections(full_text: &str, titles: &[String], source: &str) -> Vec<SourceDocument> {
    let section = |title: String, content: &str| SourceDocument {
        url: None,
        source_document: Some(source.to_string()),
        title: Some(title),
        content: Some(content.trim().to_string()),
    };

    let stem = Path::new(source)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(source)
        .to_string();
    let whole = || vec![section(stem.clone(), full_text)];
    if titles.is_empty() {
        return whole();
    }

    let pattern = titles
        .iter()
        .map(|t| format!(r"\n\s*{}\s*\n", regex::escape(t)))
        .collect::<Vec<_>>()
        .join("|");
    let Ok(splitter) = RegexBuilder::new(&pattern).case_insensitive(true).build() else {
        tracing::warn!(source, "Section titles do not form a usable pattern, keeping one section");
        return whole();
    };

    let matches: Vec<regex::Match> = splitter.find_iter(full_text).collect();
    let mut sections = Vec::new();
    let intro_end = matches.first().map(|m| m.start()).unwrap_or(full_text.len());
    if !full_text[..intro_end].trim().is_empty() {
        sections.push(section("Introduction".to_string(), &full_text[..intro_end]));
    }
    for (i, m) in matches.iter().enumerate() {
        let end = matches.get(i + 1).map(|n| n.start()).unwrap_or(full_text.len());
        let content = &full_text[m.end()..end];
        if content.trim().is_empty() {
            continue;
        }
        let title = RE_WHITESPACE.replace_all(m.as_str(), " ").trim().to_string();
        sections.push(section(title, content));
    }
    sections
}
