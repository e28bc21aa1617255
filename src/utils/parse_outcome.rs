/// Result of parsing one scraped page or report section.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    Parsed(T),
    /// The expected structure is absent.
    NotFound,
    /// The structure is present but could not be read.
    Malformed(String),
}

impl<T> ParseOutcome<T> {
    pub fn parsed(self) -> Option<T> {
        match self {
            ParseOutcome::Parsed(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, ParseOutcome::Parsed(_))
    }

    /// Logs non-parsed outcomes against `context` and returns the value, if any.
    pub fn log_skipped(self, context: &str) -> Option<T> {
        match self {
            ParseOutcome::Parsed(value) => Some(value),
            ParseOutcome::NotFound => {
                tracing::warn!(context, "Expected content not found, skipping");
                None
            }
            ParseOutcome::Malformed(reason) => {
                tracing::warn!(context, reason = %reason, "Malformed content, skipping");
                None
            }
        }
    }
}
