//! Tolerant extraction of a JSON object from free-form model output.

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum JsonExtractError {
    #[error("no JSON object found in model output")]
    NoObject,
    #[error("JSON object is not closed")]
    Unbalanced,
    #[error("invalid JSON object: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Parses the first balanced `{...}` span in `text`.
///
/// Braces inside string literals are ignored, so surrounding prose, code
/// fences and trailing commentary do not matter.
pub fn extract_json_object(text: &str) -> Result<Value, JsonExtractError> {
    let span = first_object_span(text)?;
    Ok(serde_json::from_str(span)?)
}

fn first_object_span(text: &str) -> Result<&str, JsonExtractError> {
    let start = text.find('{').ok_or(JsonExtractError::NoObject)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Ok(&text[start..end]);
                }
            }
            _ => {}
        }
    }
    Err(JsonExtractError::Unbalanced)
}
