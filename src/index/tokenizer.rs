use regex::Regex;
use std::sync::LazyLock;

static RE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9]+|[\u{3040}-\u{309F}\u{30A0}-\u{30FF}\u{4E00}-\u{9FFF}]+")
        .expect("static regex")
});

/// Lower-cased runs of ASCII alphanumerics or kana/kanji.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    RE_TOKEN
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_mixed_scripts() {
        assert_eq!(
            tokenize("Data Cloud の ID解決ルール (v2)!"),
            vec!["data", "cloud", "の", "id", "解決ルール", "v2"]
        );
    }

    #[test]
    fn punctuation_only_yields_nothing() {
        assert!(tokenize("、。!? -- ").is_empty());
    }
}
